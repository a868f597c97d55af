//! Audio-clocked playback of remote or local video through external ffmpeg decoders.

pub mod audio;
pub mod core;
pub mod playback;
pub mod video;

pub use crate::core::{PlayerConfig, PlayerError, ResolveError, Result};
pub use crate::playback::{event_channel, EventSink, PlaybackSession, PlaybackState, PlayerEvent};
pub use crate::video::{FrameSink, FrameSlot, StreamInfo, VideoFrame};
