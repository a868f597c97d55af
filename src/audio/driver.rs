use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::clock::{apply_gain, AudioClock, Volume};
use crate::audio::output::{AudioOutput, RodioOutput};
use crate::core::{AudioConfig, PlayerError, StreamKind};
use crate::playback::events::{PlayerEvent, Subscription};
use crate::playback::supervisor::read_full;

/// Pumps decoded PCM to the output device and advances the pipeline clock.
pub struct AudioDriver {
    clock: Arc<AudioClock>,
    volume: Arc<Volume>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    config: AudioConfig,
}

/// How the clock is being driven.
enum Mode<'a> {
    Device(&'a mut dyn AudioOutput),
    /// No audible output; the clock follows wall time from `since`, starting at `base` bytes.
    ClockOnly { since: Instant, base: u64, read: u64 },
}

impl AudioDriver {
    pub fn new(
        clock: Arc<AudioClock>,
        volume: Arc<Volume>,
        running: Arc<AtomicBool>,
        cancel: Arc<AtomicBool>,
        config: &AudioConfig,
    ) -> Self {
        Self {
            clock,
            volume,
            running,
            cancel,
            config: config.clone(),
        }
    }

    fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::Acquire) || !self.running.load(Ordering::Acquire)
    }

    /// Opens the output device on the calling thread, then drives until the stream ends.
    pub fn run<R: Read>(&self, reader: R, subscription: &Subscription) -> u64 {
        let mut device = if self.config.enabled {
            match RodioOutput::open(&self.config) {
                Ok(output) => Some(output),
                Err(e) => {
                    log::warn!("{}; continuing without audible output", e);
                    None
                }
            }
        } else {
            log::info!("Audio output disabled, running clock only");
            None
        };

        self.drive(
            reader,
            device.as_mut().map(|d| d as &mut dyn AudioOutput),
            subscription,
        )
    }

    /// Read fixed-size chunks until a short read or stop. Returns the PCM bytes consumed.
    pub fn drive<R: Read>(
        &self,
        mut reader: R,
        output: Option<&mut dyn AudioOutput>,
        subscription: &Subscription,
    ) -> u64 {
        let chunk_bytes = self.config.chunk_bytes.max(self.config.bytes_per_frame());
        let bytes_per_second = self.clock.bytes_per_second();
        let mut mode = match output {
            Some(output) => Mode::Device(output),
            None => Mode::ClockOnly { since: Instant::now(), base: 0, read: 0 },
        };
        let mut consumed: u64 = 0;
        let mut chunk = vec![0u8; chunk_bytes];

        loop {
            if self.should_stop() {
                break;
            }

            let n = match read_full(&mut reader, &mut chunk) {
                Ok(n) => n,
                Err(e) => {
                    log::debug!("Audio stream read failed: {}", e);
                    0
                }
            };
            if self.should_stop() || n < chunk_bytes {
                consumed += n as u64;
                break;
            }
            consumed += n as u64;

            let degraded = match &mut mode {
                Mode::Device(output) => {
                    apply_gain(&mut chunk, self.volume.get());
                    match output.write(&chunk) {
                        Ok(()) => {
                            self.clock.advance(n as u64);
                            None
                        }
                        Err(e) => {
                            log::warn!("{}; switching to clock-only playback", e);
                            let base = self.clock.bytes_played() + n as u64;
                            self.clock.advance_to(base);
                            Some(base)
                        }
                    }
                }
                Mode::ClockOnly { since, base, read } => {
                    *read += n as u64;
                    // hold the decoder to real time, as a device would
                    let due = Duration::from_secs_f64(*read as f64 / bytes_per_second);
                    while since.elapsed() < due && !self.should_stop() {
                        thread::sleep((due - since.elapsed()).min(Duration::from_millis(5)));
                    }
                    let elapsed = since.elapsed().as_secs_f64();
                    self.clock.advance_to(*base + (elapsed * bytes_per_second) as u64);
                    None
                }
            };
            if let Some(base) = degraded {
                mode = Mode::ClockOnly { since: Instant::now(), base, read: 0 };
            }
        }

        if consumed == 0 && !self.should_stop() {
            let err = PlayerError::StreamEnded(StreamKind::Audio);
            log::error!("{}", err);
            subscription.emit(PlayerEvent::Error(err.to_string()));
        } else {
            log::debug!("Audio driver finished after {} bytes", consumed);
        }
        consumed
    }

    /// Keep the clock following wall time after the audio stream has ended, until `until` is set
    /// or the pipeline stops. Video that outlasts its audio track keeps being paced.
    pub fn hold_clock(&self, until: &AtomicBool) {
        let base = self.clock.bytes_played();
        let since = Instant::now();
        let bytes_per_second = self.clock.bytes_per_second();
        log::debug!("Audio ended at {:.3}s, clock continues on wall time", self.clock.position());

        while !self.should_stop() && !until.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(5));
            let elapsed = since.elapsed().as_secs_f64();
            self.clock.advance_to(base + (elapsed * bytes_per_second) as u64);
        }
    }
}
