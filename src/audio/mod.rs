pub mod clock;
pub mod driver;
pub mod output;

pub use clock::{apply_gain, AudioClock, Volume};
pub use driver::AudioDriver;
pub use output::{AudioDeviceManager, AudioOutput, RodioOutput};
