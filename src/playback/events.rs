use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::playback::PlaybackState;
use crate::video::{FrameSink, VideoFrame};

/// Notifications delivered from the playback workers to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    DurationFound(f64),
    TimeUpdate(f64),
    StateChanged(PlaybackState),
    Error(String),
    EndOfStream,
}

/// Thread-safe handoff for `PlayerEvent`s. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: PlayerEvent);
}

impl EventSink for mpsc::UnboundedSender<PlayerEvent> {
    fn notify(&self, event: PlayerEvent) {
        if let Err(e) = self.send(event) {
            log::debug!("Event receiver dropped, discarding {:?}", e.0);
        }
    }
}

/// Channel whose receiving end is drained by the UI thread with `try_recv`.
pub fn event_channel() -> (Arc<dyn EventSink>, mpsc::UnboundedReceiver<PlayerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

/// Per-pipeline connection to the session's event and display sinks.
///
/// `detach` waits for any in-flight delivery, after which nothing from this pipeline
/// reaches the sinks.
#[derive(Clone)]
pub struct Subscription {
    attached: Arc<RwLock<bool>>,
    events: Arc<dyn EventSink>,
    frames: Arc<dyn FrameSink>,
}

impl Subscription {
    pub fn new(events: Arc<dyn EventSink>, frames: Arc<dyn FrameSink>) -> Self {
        Self {
            attached: Arc::new(RwLock::new(true)),
            events,
            frames,
        }
    }

    pub fn emit(&self, event: PlayerEvent) -> bool {
        let attached = match self.attached.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *attached {
            self.events.notify(event);
        }
        *attached
    }

    pub fn present(&self, frame: VideoFrame) -> bool {
        let attached = match self.attached.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *attached {
            self.frames.present(frame);
        }
        *attached
    }

    pub fn detach(&self) {
        match self.attached.write() {
            Ok(mut attached) => *attached = false,
            Err(poisoned) => *poisoned.into_inner() = false,
        }
    }

    pub fn is_attached(&self) -> bool {
        match self.attached.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::FrameSlot;

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = event_channel();
        sink.notify(PlayerEvent::DurationFound(120.0));
        sink.notify(PlayerEvent::TimeUpdate(1.0));

        assert_eq!(rx.try_recv().ok(), Some(PlayerEvent::DurationFound(120.0)));
        assert_eq!(rx.try_recv().ok(), Some(PlayerEvent::TimeUpdate(1.0)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detached_subscription_drops_everything() {
        let (sink, mut rx) = event_channel();
        let slot = Arc::new(FrameSlot::new());
        let subscription = Subscription::new(sink, slot.clone());
        let worker_copy = subscription.clone();

        assert!(worker_copy.emit(PlayerEvent::TimeUpdate(3.0)));
        subscription.detach();
        assert!(!worker_copy.is_attached());
        assert!(!worker_copy.emit(PlayerEvent::TimeUpdate(4.0)));
        assert!(!worker_copy.present(VideoFrame {
            presentation_time: 4.0,
            width: 1,
            height: 1,
            pixels: vec![0, 0, 0],
        }));

        assert_eq!(rx.try_recv().ok(), Some(PlayerEvent::TimeUpdate(3.0)));
        assert!(rx.try_recv().is_err());
        assert_eq!(slot.presented(), 0);
    }
}
