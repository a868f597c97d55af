use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One decoded RGB24 frame and the timeline position it belongs at.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub presentation_time: f64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl VideoFrame {
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn to_rgba(&self) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for chunk in self.pixels.chunks_exact(3) {
            rgba.extend_from_slice(chunk);
            rgba.push(255);
        }
        rgba
    }
}

/// Display surface for decoded frames. Must return quickly: it runs on the render loop.
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: VideoFrame);
}

type Waker = Box<dyn Fn() + Send + Sync>;

/// Latest-frame-wins mailbox between the render loop and a UI that polls on its own schedule.
pub struct FrameSlot {
    latest: Mutex<Option<VideoFrame>>,
    presented: AtomicU64,
    waker: Option<Waker>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            presented: AtomicU64::new(0),
            waker: None,
        }
    }

    /// Same as `new`, calling `waker` after every presented frame (e.g. to request a repaint).
    pub fn with_waker(waker: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            waker: Some(Box::new(waker)),
            ..Self::new()
        }
    }

    pub fn take(&self) -> Option<VideoFrame> {
        match self.latest.lock() {
            Ok(mut latest) => latest.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Total frames presented since creation, including ones replaced before being taken.
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for FrameSlot {
    fn present(&self, frame: VideoFrame) {
        match self.latest.lock() {
            Ok(mut latest) => *latest = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
        self.presented.fetch_add(1, Ordering::Relaxed);
        if let Some(waker) = &self.waker {
            waker();
        }
    }
}
