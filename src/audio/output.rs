use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::clock::pcm_to_samples;
use crate::core::{AudioConfig, PlayerError, Result};

/// Where the audio driver sends PCM. `write` blocks until the device has room for the chunk.
pub trait AudioOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
}

/// Looks up cpal output devices by name.
pub struct AudioDeviceManager {
    host: Host,
}

impl AudioDeviceManager {
    pub fn new() -> Self {
        Self { host: cpal::default_host() }
    }

    /// The output device called `name`, or the default device when none matches.
    pub fn get_device_by_name(&self, name: &str) -> Result<Device> {
        let devices = self.host.output_devices().map_err(|e| {
            log::error!("Failed to enumerate output devices: {}", e);
            PlayerError::Device(format!("failed to enumerate output devices: {}", e))
        })?;

        let mut available = Vec::new();
        for device in devices {
            match device.name() {
                Ok(device_name) if device_name == name => {
                    log::debug!("Found requested audio device: {}", name);
                    return Ok(device);
                }
                Ok(device_name) => available.push(device_name),
                Err(e) => log::warn!("Failed to get device name: {}", e),
            }
        }

        log::warn!(
            "Audio device '{}' not found among [{}], falling back to default",
            name,
            available.join(", ")
        );
        self.get_default_device()
    }

    pub fn get_default_device(&self) -> Result<Device> {
        self.host.default_output_device()
            .ok_or_else(|| PlayerError::Device("no default audio output device available".to_string()))
    }
}

/// PCM output through a rodio sink fed with one sample buffer per chunk.
///
/// Holds a `!Send` output stream, so it must be opened on the thread that writes to it.
pub struct RodioOutput {
    _stream: OutputStream,
    sink: Sink,
    channels: u16,
    sample_rate: u32,
    max_queued: usize,
    stall_timeout: Duration,
}

impl RodioOutput {
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let (stream, handle) = match &config.output_device_name {
            Some(name) => {
                let device = AudioDeviceManager::new().get_device_by_name(name)?;
                OutputStream::try_from_device(&device)
            }
            None => OutputStream::try_default(),
        }
        .map_err(|e| PlayerError::Device(format!("failed to open output stream: {}", e)))?;

        let sink = Sink::try_new(&handle)
            .map_err(|e| PlayerError::Device(format!("failed to create audio sink: {}", e)))?;
        sink.play();

        log::info!(
            "Audio output opened ({} Hz, {} channels)",
            config.sample_rate, config.channels
        );

        Ok(Self {
            _stream: stream,
            sink,
            channels: config.channels,
            sample_rate: config.sample_rate,
            max_queued: config.max_queued_chunks.max(1),
            stall_timeout: config.stall_timeout(),
        })
    }
}

impl AudioOutput for RodioOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let samples = pcm_to_samples(pcm);
        if samples.is_empty() {
            return Ok(());
        }
        self.sink.append(SamplesBuffer::new(self.channels, self.sample_rate, samples));

        let started = Instant::now();
        while self.sink.len() > self.max_queued {
            if started.elapsed() > self.stall_timeout {
                return Err(PlayerError::Device(format!(
                    "output stalled with {} chunks queued",
                    self.sink.len()
                )));
            }
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.sink.stop();
        log::debug!("Audio output closed");
    }
}
