use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations of the external tools the player drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ytdlp: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ytdlp: PathBuf::from("yt-dlp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    pub probe_timeout_secs: u64,
    pub resolver_timeout_secs: u64,
    pub format_selector: String,
    /// Substrings that mark a source as an already-resolved media endpoint
    pub direct_host_markers: Vec<String>,
    pub reconnect_delay_max_secs: u64,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 15,
            resolver_timeout_secs: 30,
            format_selector: "best[ext=mp4]/best".to_string(),
            direct_host_markers: vec![
                "googlevideo.com".to_string(),
                "videoplayback".to_string(),
            ],
            reconnect_delay_max_secs: 5,
        }
    }
}

impl ResolveConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_secs)
    }
}

/// PCM format requested from the audio decoder, plus output device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_bytes: usize,
    pub enabled: bool,
    pub output_device_name: Option<String>,
    pub max_queued_chunks: usize,
    pub stall_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            chunk_bytes: 4096,
            enabled: true,
            output_device_name: None,
            max_queued_chunks: 2,
            stall_timeout_ms: 1000,
        }
    }
}

impl AudioConfig {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn bytes_per_frame(&self) -> usize {
        Self::BYTES_PER_SAMPLE * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.bytes_per_frame() as f64
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

/// Pacing and backpressure constants for the reader and render loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub queue_capacity: usize,
    /// Frames older than this many frame durations behind the audio clock are dropped
    pub stale_frame_factor: f64,
    pub pacing_step_ms: u64,
    pub pop_timeout_ms: u64,
    pub push_retry_ms: u64,
    pub time_update_interval_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 30,
            stale_frame_factor: 2.0,
            pacing_step_ms: 5,
            pop_timeout_ms: 100,
            push_retry_ms: 50,
            time_update_interval_secs: 1.0,
        }
    }
}

impl SyncConfig {
    pub fn pacing_step(&self) -> Duration {
        Duration::from_millis(self.pacing_step_ms.max(1))
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms.max(1))
    }

    pub fn push_retry(&self) -> Duration {
        Duration::from_millis(self.push_retry_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub render_join_timeout_ms: u64,
    pub audio_join_timeout_ms: u64,
    pub video_join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            render_join_timeout_ms: 5000,
            audio_join_timeout_ms: 3000,
            video_join_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub tools: ToolPaths,
    pub resolve: ResolveConfig,
    pub audio: AudioConfig,
    pub sync: SyncConfig,
    pub shutdown: ShutdownConfig,
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            resolve: ResolveConfig::default(),
            audio: AudioConfig::default(),
            sync: SyncConfig::default(),
            shutdown: ShutdownConfig::default(),
            volume: 1.0,
        }
    }
}

impl PlayerConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load the config at `config_path`. A missing, unreadable or malformed file is replaced with defaults.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            log::info!("No config file found, creating default config");
            let config = Self::default();
            config.save_to(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to save default config: {}", e))?;
            log::info!("Created new config file at {}", config_path.display());
            return Ok(config);
        }

        let problem = match std::fs::read_to_string(config_path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", config_path.display());
                    return Ok(config);
                }
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        log::warn!("Config file exists but has issues ({}), rewriting it with defaults", problem);
        let new_config = Self::default();
        new_config.save_to(config_path)
            .map_err(|save_err| anyhow::anyhow!("Failed to save new config: {}", save_err))?;
        Ok(new_config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nox-player")
            .join("config.json")
    }
}
