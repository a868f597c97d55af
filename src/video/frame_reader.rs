use crossbeam_channel::{SendTimeoutError, Sender};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{PlayerError, StreamKind};
use crate::playback::events::{PlayerEvent, Subscription};
use crate::playback::supervisor::read_full;
use crate::video::{StreamInfo, VideoFrame};

/// Cuts the raw RGB24 byte stream of the video decoder into timestamped frames.
pub struct FrameReader {
    width: u32,
    height: u32,
    frame_bytes: usize,
    fps: f64,
    start_offset: f64,
    running: Arc<AtomicBool>,
    push_retry: Duration,
}

impl FrameReader {
    pub fn new(info: &StreamInfo, start_offset: f64, running: Arc<AtomicBool>, push_retry: Duration) -> Self {
        Self {
            width: info.width,
            height: info.height,
            frame_bytes: info.frame_bytes(),
            fps: info.fps,
            start_offset,
            running,
            push_retry,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Read frames until the stream ends or the pipeline stops. Returns the number of frames read.
    ///
    /// A frame that cannot be completed is discarded, never padded.
    pub fn run<R: Read>(&self, mut reader: R, queue: &Sender<VideoFrame>, subscription: &Subscription) -> u64 {
        let frame_bytes = self.frame_bytes;
        let mut frame_index: u64 = 0;

        while self.is_running() {
            let mut pixels = vec![0u8; frame_bytes];
            match read_full(&mut reader, &mut pixels) {
                Ok(n) if n == frame_bytes => {}
                Ok(n) => {
                    if n > 0 {
                        log::debug!("Discarding partial frame ({} of {} bytes)", n, frame_bytes);
                    }
                    break;
                }
                Err(e) => {
                    log::debug!("Video stream read failed: {}", e);
                    break;
                }
            }

            let frame = VideoFrame {
                presentation_time: self.start_offset + frame_index as f64 / self.fps,
                width: self.width,
                height: self.height,
                pixels,
            };
            frame_index += 1;

            if !self.push(queue, frame) {
                break;
            }
        }

        if frame_index == 0 && self.is_running() {
            let err = PlayerError::StreamEnded(StreamKind::Video);
            log::error!("{}", err);
            subscription.emit(PlayerEvent::Error(err.to_string()));
        } else {
            log::debug!("Video reader finished after {} frames", frame_index);
        }
        frame_index
    }

    /// Blocks while the queue is full. Returns false once the frame has to be abandoned.
    fn push(&self, queue: &Sender<VideoFrame>, mut frame: VideoFrame) -> bool {
        loop {
            match queue.send_timeout(frame, self.push_retry) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if !self.is_running() {
                        return false;
                    }
                    frame = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::events::event_channel;
    use crate::video::FrameSlot;
    use crossbeam_channel::bounded;
    use std::io::Cursor;
    use std::thread;

    fn info(width: u32, height: u32, fps: f64) -> StreamInfo {
        StreamInfo {
            url: "test".to_string(),
            duration: 0.0,
            fps,
            width,
            height,
        }
    }

    fn subscription() -> (Subscription, tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, rx) = event_channel();
        (Subscription::new(events, Arc::new(FrameSlot::new())), rx)
    }

    #[test]
    fn test_frames_are_timestamped_from_offset() {
        let running = Arc::new(AtomicBool::new(true));
        let reader = FrameReader::new(&info(2, 2, 4.0), 10.0, running, Duration::from_millis(5));
        let (tx, rx) = bounded(16);
        let (sub, _events) = subscription();

        let data: Vec<u8> = (0..(12 * 3)).map(|i| i as u8).collect();
        assert_eq!(reader.run(Cursor::new(data), &tx, &sub), 3);

        let frames: Vec<VideoFrame> = rx.try_iter().collect();
        let times: Vec<f64> = frames.iter().map(|f| f.presentation_time).collect();
        assert_eq!(times, vec![10.0, 10.25, 10.5]);
        assert_eq!(frames[1].pixels[0], 12);
        assert!(frames.iter().all(|f| f.pixels.len() == 12));
    }

    #[test]
    fn test_partial_trailing_frame_is_discarded() {
        let running = Arc::new(AtomicBool::new(true));
        let reader = FrameReader::new(&info(2, 1, 30.0), 0.0, running, Duration::from_millis(5));
        let (tx, rx) = bounded(16);
        let (sub, _events) = subscription();

        assert_eq!(reader.run(Cursor::new(vec![7u8; 6 * 2 + 4]), &tx, &sub), 2);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_empty_stream_reports_error() {
        let running = Arc::new(AtomicBool::new(true));
        let reader = FrameReader::new(&info(2, 1, 30.0), 0.0, running, Duration::from_millis(5));
        let (tx, _rx) = bounded(4);
        let (sub, mut events) = subscription();

        assert_eq!(reader.run(Cursor::new(vec![1u8; 3]), &tx, &sub), 0);
        match events.try_recv() {
            Ok(PlayerEvent::Error(message)) => assert!(message.contains("video")),
            other => panic!("expected an error event, got {:?}", other),
        }
    }

    #[test]
    fn test_full_queue_blocks_without_dropping() {
        let running = Arc::new(AtomicBool::new(true));
        let reader = FrameReader::new(&info(1, 1, 30.0), 0.0, running.clone(), Duration::from_millis(5));
        let (tx, rx) = bounded(3);
        let (sub, _events) = subscription();

        let handle = thread::spawn(move || reader.run(Cursor::new(vec![0u8; 3 * 10]), &tx, &sub));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(rx.len(), 3);
        assert!(!handle.is_finished());

        let mut received = Vec::new();
        while received.len() < 10 {
            let frame = rx.recv_timeout(Duration::from_secs(2)).expect("reader stalled");
            received.push(frame.presentation_time);
        }
        assert_eq!(handle.join().unwrap(), 10);
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_stop_abandons_blocked_insert() {
        let running = Arc::new(AtomicBool::new(true));
        let reader = FrameReader::new(&info(1, 1, 30.0), 0.0, running.clone(), Duration::from_millis(5));
        let (tx, rx) = bounded(2);
        let (sub, _events) = subscription();

        let handle = thread::spawn(move || reader.run(Cursor::new(vec![0u8; 3 * 10]), &tx, &sub));

        thread::sleep(Duration::from_millis(100));
        running.store(false, Ordering::Release);
        let read = handle.join().unwrap();
        assert_eq!(read, 3);
        assert_eq!(rx.len(), 2);
    }
}
