pub mod frame;
pub mod frame_reader;
pub mod prober;
pub mod render_loop;

pub use frame::{FrameSink, FrameSlot, VideoFrame};
pub use frame_reader::FrameReader;
pub use prober::{parse_frame_rate, StreamInfo, StreamProber};
pub use render_loop::{RenderExit, RenderLoop, RenderStats};
