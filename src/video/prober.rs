use serde::Deserialize;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::{ResolveConfig, ResolveError, ToolPaths};
use crate::video::VideoFrame;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_FPS: f64 = 30.0;

/// A playable URL plus the geometry and timing the decoders will produce.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub url: String,
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl StreamInfo {
    /// Fallback metadata for a URL that could not be probed.
    pub fn with_defaults(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            duration: 0.0,
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        VideoFrame::byte_len(self.width, self.height)
    }

    pub fn frame_duration(&self) -> f64 {
        1.0 / self.fps
    }
}

/// Parse a frame rate such as "30", "29.97" or "30000/1001".
///
/// Malformed input, a zero denominator or a non-positive result gives 30.0.
pub fn parse_frame_rate(raw: &str) -> f64 {
    let raw = raw.trim();
    let parsed = match raw.split_once('/') {
        Some((num, den)) => match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
            (Ok(num), Ok(den)) if den != 0.0 => Some(num / den),
            _ => None,
        },
        None => raw.parse::<f64>().ok(),
    };

    match parsed {
        Some(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => DEFAULT_FPS,
    }
}

#[derive(Debug, Deserialize)]
struct ResolverOutput {
    url: Option<String>,
    duration: Option<f64>,
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

fn positive_f64(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn positive_u32(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v > 0)
}

/// Parse the JSON description printed by the resolver. Zero or null fields take the defaults.
pub fn parse_resolver_json(stdout: &[u8]) -> Result<StreamInfo, ResolveError> {
    let output: ResolverOutput = serde_json::from_slice(stdout)
        .map_err(|e| ResolveError::MalformedOutput(e.to_string()))?;

    let url = output
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ResolveError::MalformedOutput("missing stream url".to_string()))?;

    Ok(StreamInfo {
        url,
        duration: positive_f64(output.duration).unwrap_or(0.0),
        fps: positive_f64(output.fps).unwrap_or(DEFAULT_FPS),
        width: positive_u32(output.width).unwrap_or(DEFAULT_WIDTH),
        height: positive_u32(output.height).unwrap_or(DEFAULT_HEIGHT),
    })
}

/// Read metadata from ffprobe's JSON. `None` when there is no video stream.
pub fn parse_probe_json(url: &str, stdout: &[u8]) -> Option<StreamInfo> {
    let info: serde_json::Value = serde_json::from_slice(stdout).ok()?;

    let empty_vec = vec![];
    let streams = info["streams"].as_array().unwrap_or(&empty_vec);
    let video = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))?;

    let duration = info["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| video["duration"].as_str().and_then(|s| s.parse::<f64>().ok()))
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let fps = video["avg_frame_rate"]
        .as_str()
        .filter(|r| *r != "0/0")
        .or_else(|| video["r_frame_rate"].as_str())
        .map(parse_frame_rate)
        .unwrap_or(DEFAULT_FPS);

    let dimension = |key: &str, fallback: u32| {
        video[key]
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(fallback)
    };

    Some(StreamInfo {
        url: url.to_string(),
        duration,
        fps,
        width: dimension("width", DEFAULT_WIDTH),
        height: dimension("height", DEFAULT_HEIGHT),
    })
}

struct ToolOutput {
    success: bool,
    status: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run a tool to completion, killing it once `timeout` elapses.
fn run_with_timeout(mut cmd: Command, tool: &str, timeout: Duration) -> Result<ToolOutput, ResolveError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ResolveError::ToolMissing { tool: tool.to_string() },
        _ => ResolveError::Io(e),
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            log::warn!("{} did not finish within {:?}, killing it", tool, timeout);
            let _ = child.kill();
            let _ = child.wait();
            return Err(ResolveError::Timeout {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(Duration::from_millis(20));
    };

    Ok(ToolOutput {
        success: status.success(),
        status: status.to_string(),
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

/// Turns a source reference into a `StreamInfo`.
pub struct StreamProber {
    tools: ToolPaths,
    config: ResolveConfig,
}

impl StreamProber {
    pub fn new(tools: &ToolPaths, config: &ResolveConfig) -> Self {
        Self {
            tools: tools.clone(),
            config: config.clone(),
        }
    }

    pub fn resolve(&self, source: &str) -> Result<StreamInfo, ResolveError> {
        if self.is_direct(source) {
            log::info!("Probing direct source {}", source);
            Ok(self.probe_direct(source))
        } else {
            log::info!("Resolving {} with {}", source, self.tools.ytdlp.display());
            self.resolve_external(source)
        }
    }

    /// Already a media endpoint (known direct host) or a local file.
    pub fn is_direct(&self, source: &str) -> bool {
        self.config
            .direct_host_markers
            .iter()
            .any(|marker| !marker.is_empty() && source.contains(marker.as_str()))
            || Path::new(source).is_file()
    }

    /// Never fails: probe errors and timeouts fall back to default geometry.
    fn probe_direct(&self, url: &str) -> StreamInfo {
        let mut cmd = Command::new(&self.tools.ffprobe);
        cmd.arg("-v").arg("quiet")
            .arg("-print_format").arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(url);

        let result = run_with_timeout(cmd, "ffprobe", self.config.probe_timeout());
        let probed = match result {
            Ok(output) if output.success => parse_probe_json(url, &output.stdout),
            Ok(output) => {
                log::warn!("ffprobe exited with {}", output.status);
                None
            }
            Err(e) => {
                log::warn!("ffprobe failed: {}", e);
                None
            }
        };

        probed.unwrap_or_else(|| {
            log::info!("Using default stream geometry for {}", url);
            StreamInfo::with_defaults(url)
        })
    }

    fn resolve_external(&self, source: &str) -> Result<StreamInfo, ResolveError> {
        let mut cmd = Command::new(&self.tools.ytdlp);
        cmd.arg("--dump-json")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("-f").arg(&self.config.format_selector)
            .arg(source);

        let output = run_with_timeout(cmd, "yt-dlp", self.config.resolver_timeout())?;
        if !output.success {
            return Err(ResolveError::NonZeroExit {
                tool: "yt-dlp".to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let info = parse_resolver_json(&output.stdout)?;
        log::info!(
            "Resolved {}x{} @ {:.2}fps, duration {:.1}s",
            info.width, info.height, info.fps, info.duration
        );
        Ok(info)
    }
}
