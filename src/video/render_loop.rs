use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::audio::AudioClock;
use crate::core::SyncConfig;
use crate::playback::events::{PlayerEvent, Subscription};
use crate::video::VideoFrame;

/// Why the render loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderExit {
    /// The running flag was cleared.
    Stopped,
    /// The reader finished and every queued frame was consumed.
    EndOfStream,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Paces decoded frames against the audio clock and hands them to the display sink.
pub struct RenderLoop {
    queue: Receiver<VideoFrame>,
    clock: Arc<AudioClock>,
    running: Arc<AtomicBool>,
    subscription: Subscription,
    sync: SyncConfig,
    frame_duration: f64,
    stats: RenderStats,
}

impl RenderLoop {
    pub fn new(
        queue: Receiver<VideoFrame>,
        clock: Arc<AudioClock>,
        running: Arc<AtomicBool>,
        subscription: Subscription,
        sync: &SyncConfig,
        frame_duration: f64,
    ) -> Self {
        Self {
            queue,
            clock,
            running,
            subscription,
            sync: sync.clone(),
            frame_duration,
            stats: RenderStats::default(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn run(&mut self) -> RenderExit {
        let stale_window = self.sync.stale_frame_factor * self.frame_duration;
        let pop_timeout = self.sync.pop_timeout();
        let pacing_step = self.sync.pacing_step();
        let mut last_update = f64::NEG_INFINITY;

        while self.is_running() {
            let frame = match self.queue.recv_timeout(pop_timeout) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!(
                        "Render loop reached end of stream ({} delivered, {} dropped)",
                        self.stats.delivered, self.stats.dropped
                    );
                    return RenderExit::EndOfStream;
                }
            };

            let audio_pos = self.clock.position();
            let pts = frame.presentation_time;
            if pts < audio_pos - stale_window {
                self.stats.dropped += 1;
                log::trace!("Dropping stale frame at {:.3}s (clock {:.3}s)", pts, audio_pos);
                continue;
            }

            let wait = pts - audio_pos;
            if wait > 0.0 {
                let deadline = Instant::now() + std::time::Duration::from_secs_f64(wait);
                while self.is_running() {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::sleep((deadline - now).min(pacing_step));
                }
            }

            if !self.is_running() {
                break;
            }

            self.subscription.present(frame);
            self.stats.delivered += 1;

            if pts - last_update >= self.sync.time_update_interval_secs {
                self.subscription.emit(PlayerEvent::TimeUpdate(pts));
                last_update = pts;
            }
        }

        RenderExit::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::events::EventSink;
    use crate::video::FrameSink;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        frames: Mutex<Vec<f64>>,
        events: Mutex<Vec<PlayerEvent>>,
    }

    impl FrameSink for Recording {
        fn present(&self, frame: VideoFrame) {
            self.frames.lock().unwrap().push(frame.presentation_time);
        }
    }

    impl EventSink for Recording {
        fn notify(&self, event: PlayerEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn frame(pts: f64) -> VideoFrame {
        VideoFrame { presentation_time: pts, width: 1, height: 1, pixels: vec![0, 0, 0] }
    }

    fn render_loop(
        queue: Receiver<VideoFrame>,
        clock: Arc<AudioClock>,
        running: Arc<AtomicBool>,
        fps: f64,
    ) -> (RenderLoop, Arc<Recording>) {
        let sync = SyncConfig { pop_timeout_ms: 10, ..SyncConfig::default() };
        render_loop_with(queue, clock, running, fps, sync)
    }

    fn render_loop_with(
        queue: Receiver<VideoFrame>,
        clock: Arc<AudioClock>,
        running: Arc<AtomicBool>,
        fps: f64,
        sync: SyncConfig,
    ) -> (RenderLoop, Arc<Recording>) {
        let recording = Arc::new(Recording::default());
        let subscription = Subscription::new(recording.clone(), recording.clone());
        (RenderLoop::new(queue, clock, running, subscription, &sync, 1.0 / fps), recording)
    }

    #[test]
    fn test_stale_frames_are_never_delivered() {
        let (tx, rx) = bounded(8);
        for pts in [1.0, 2.0, 9.95, 10.0] {
            tx.send(frame(pts)).unwrap();
        }
        drop(tx);

        // 1 byte per second puts the clock exactly at 10s
        let clock = Arc::new(AudioClock::new(10.0, 1.0));
        let running = Arc::new(AtomicBool::new(true));
        let (mut render, recording) = render_loop(rx, clock, running, 30.0);

        assert_eq!(render.run(), RenderExit::EndOfStream);
        assert_eq!(*recording.frames.lock().unwrap(), vec![9.95, 10.0]);
        assert_eq!(render.stats(), RenderStats { delivered: 2, dropped: 2 });
    }

    #[test]
    fn test_staleness_uses_clock_at_dequeue() {
        let (tx, rx) = bounded(2);
        let clock = Arc::new(AudioClock::new(0.0, 1.0));
        let running = Arc::new(AtomicBool::new(true));
        let sync = SyncConfig { pop_timeout_ms: 2000, ..SyncConfig::default() };
        let (mut render, recording) = render_loop_with(rx, clock.clone(), running, 30.0, sync);

        let handle = thread::spawn(move || {
            let exit = render.run();
            (exit, render.stats())
        });

        // the loop is parked in the pop while the clock moves on
        thread::sleep(Duration::from_millis(50));
        clock.advance(10);
        tx.send(frame(1.0)).unwrap();
        drop(tx);

        let (exit, stats) = handle.join().unwrap();
        assert_eq!(exit, RenderExit::EndOfStream);
        assert_eq!(stats, RenderStats { delivered: 0, dropped: 1 });
        assert!(recording.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_early_frame_waits_for_clock() {
        let (tx, rx) = bounded(2);
        tx.send(frame(0.2)).unwrap();
        drop(tx);

        let clock = Arc::new(AudioClock::new(0.0, 1.0));
        let running = Arc::new(AtomicBool::new(true));
        let (mut render, recording) = render_loop(rx, clock, running, 30.0);

        let started = Instant::now();
        render.run();
        assert!(started.elapsed() >= Duration::from_millis(190));
        assert_eq!(recording.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stop_interrupts_pacing() {
        let (tx, rx) = bounded(2);
        tx.send(frame(60.0)).unwrap();

        let clock = Arc::new(AudioClock::new(0.0, 1.0));
        let running = Arc::new(AtomicBool::new(true));
        let (mut render, recording) = render_loop(rx, clock, running.clone(), 30.0);

        let handle = thread::spawn(move || render.run());
        thread::sleep(Duration::from_millis(50));
        let stop_requested = Instant::now();
        running.store(false, Ordering::Release);

        assert_eq!(handle.join().unwrap(), RenderExit::Stopped);
        assert!(stop_requested.elapsed() < Duration::from_millis(500));
        assert!(recording.frames.lock().unwrap().is_empty());
        drop(tx);
    }

    #[test]
    fn test_time_updates_are_throttled() {
        let (tx, rx) = bounded(64);
        for i in 0..40 {
            tx.send(frame(i as f64 / 10.0)).unwrap();
        }
        drop(tx);

        // clock far ahead of pacing but inside the staleness window of a 0.1 fps stream
        let clock = Arc::new(AudioClock::new(4.0, 1.0));
        let running = Arc::new(AtomicBool::new(true));
        let (mut render, recording) = render_loop(rx, clock, running, 0.1);

        render.run();
        let frames = recording.frames.lock().unwrap();
        assert_eq!(frames.len(), 40);
        assert!(frames.windows(2).all(|w| w[0] <= w[1]));

        let updates: Vec<f64> = recording
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::TimeUpdate(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_queue_does_not_block_stop() {
        let (_tx, rx) = bounded::<VideoFrame>(2);
        let clock = Arc::new(AudioClock::new(0.0, 1.0));
        let running = Arc::new(AtomicBool::new(true));
        let (mut render, _) = render_loop(rx, clock, running.clone(), 30.0);

        let handle = thread::spawn(move || render.run());
        thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::Release);
        assert_eq!(handle.join().unwrap(), RenderExit::Stopped);
    }
}
