pub mod events;
pub mod pipeline;
pub mod session;
pub mod supervisor;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

pub use events::{event_channel, EventSink, PlayerEvent, Subscription};
pub use pipeline::{Pipeline, PipelineEnd};
pub use session::{PlaybackSession, PlaybackState};
pub use supervisor::{DecodeStreams, DecodeSupervisor};
