use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Master clock of one pipeline instance, derived from audio bytes handed to the device.
///
/// Only the audio driver advances it; the render loop reads it without taking a lock.
#[derive(Debug)]
pub struct AudioClock {
    start_offset: f64,
    bytes_per_second: f64,
    bytes_played: AtomicU64,
}

impl AudioClock {
    pub fn new(start_offset: f64, bytes_per_second: f64) -> Self {
        Self {
            start_offset,
            bytes_per_second: if bytes_per_second > 0.0 { bytes_per_second } else { 1.0 },
            bytes_played: AtomicU64::new(0),
        }
    }

    /// Add bytes accepted by the output device.
    pub fn advance(&self, bytes: u64) {
        self.bytes_played.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Move the counter forward to `bytes` if it is behind. Never moves it back.
    pub fn advance_to(&self, bytes: u64) {
        self.bytes_played.fetch_max(bytes, Ordering::AcqRel);
    }

    pub fn bytes_played(&self) -> u64 {
        self.bytes_played.load(Ordering::Acquire)
    }

    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    /// Current playback position in seconds.
    pub fn position(&self) -> f64 {
        self.start_offset + self.bytes_played() as f64 / self.bytes_per_second
    }
}

/// Playback gain shared between the session (writer) and the audio driver (reader).
#[derive(Debug)]
pub struct Volume {
    gain: Mutex<f32>,
}

impl Volume {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: Mutex::new(clamp_gain(gain)),
        }
    }

    pub fn get(&self) -> f32 {
        match self.gain.lock() {
            Ok(gain) => *gain,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Store a new gain, clamped to [0, 1]. Returns the stored value.
    pub fn set(&self, gain: f32) -> f32 {
        let gain = clamp_gain(gain);
        match self.gain.lock() {
            Ok(mut current) => *current = gain,
            Err(poisoned) => *poisoned.into_inner() = gain,
        }
        gain
    }
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        return 0.0;
    }
    gain.clamp(0.0, 1.0)
}

const UNITY_EPSILON: f32 = 1e-3;

pub fn is_unity_gain(gain: f32) -> bool {
    (gain - 1.0).abs() < UNITY_EPSILON
}

/// Scale interleaved s16le PCM in place. Unity gain leaves the bytes untouched.
pub fn apply_gain(pcm: &mut [u8], gain: f32) {
    if is_unity_gain(gain) {
        return;
    }
    let gain = gain as f64;
    for sample in pcm.chunks_exact_mut(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]) as f64;
        let scaled = (value * gain).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}

/// Decode s16le bytes into samples. A trailing odd byte is ignored.
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_clock_position_from_bytes() {
        let clock = AudioClock::new(10.0, 44100.0 * 4.0);
        assert_eq!(clock.position(), 10.0);

        clock.advance(44100 * 4);
        assert!((clock.position() - 11.0).abs() < 1e-9);

        clock.advance(44100 * 2);
        assert!((clock.position() - 11.5).abs() < 1e-9);
    }

    #[test]
    fn test_clock_never_moves_backwards() {
        let clock = AudioClock::new(0.0, 1000.0);
        clock.advance_to(500);
        clock.advance_to(200);
        assert_eq!(clock.bytes_played(), 500);

        let mut last = clock.position();
        for bytes in [100, 900, 300, 1200, 1100] {
            clock.advance_to(bytes);
            let now = clock.position();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_volume_clamps() {
        let volume = Volume::new(3.0);
        assert_eq!(volume.get(), 1.0);
        assert_eq!(volume.set(-0.5), 0.0);
        assert_eq!(volume.set(0.4), 0.4);
        assert_eq!(volume.get(), 0.4);
        assert_eq!(volume.set(f32::NAN), 0.0);
    }

    #[test]
    fn test_apply_gain_rounds_each_sample() {
        let original = [1000i16, -1000, 3, -3, 32767, -32768, 0, 12345];
        for &gain in &[0.0f32, 0.1, 0.25, 0.5, 0.73, 0.99] {
            let mut pcm = to_pcm(&original);
            apply_gain(&mut pcm, gain);
            let scaled = pcm_to_samples(&pcm);
            for (orig, got) in original.iter().zip(scaled.iter()) {
                let expected = (*orig as f64 * gain as f64)
                    .round()
                    .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                assert_eq!(*got, expected, "gain {} sample {}", gain, orig);
            }
        }
    }

    #[test]
    fn test_apply_gain_unity_is_untouched() {
        let original = to_pcm(&[1, -2, 32767, -32768]);
        let mut pcm = original.clone();
        apply_gain(&mut pcm, 1.0);
        assert_eq!(pcm, original);

        apply_gain(&mut pcm, 0.9995);
        assert_eq!(pcm, original);
    }

    #[test]
    fn test_pcm_to_samples_ignores_trailing_byte() {
        let samples = pcm_to_samples(&[0x01, 0x00, 0xff, 0xff, 0x07]);
        assert_eq!(samples, vec![1, -1]);
    }
}
