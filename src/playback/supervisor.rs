use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use crate::core::{AudioConfig, PlayerError, Result, StreamKind, ToolPaths};

/// Read until `buf` is full or the stream ends. Returns the number of bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn is_network_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn decoder_input(cmd: &mut Command, url: &str, start_offset: f64, reconnect_delay_max: u64) {
    cmd.arg("-nostdin")
        .arg("-loglevel").arg("quiet")
        .arg("-ss").arg(format!("{:.3}", start_offset.max(0.0)));

    // ffmpeg rejects the reconnect options for non-http inputs
    if is_network_url(url) {
        cmd.arg("-reconnect").arg("1")
            .arg("-reconnect_streamed").arg("1")
            .arg("-reconnect_delay_max").arg(reconnect_delay_max.to_string());
    }

    cmd.arg("-i").arg(url);
}

/// Raw RGB24 frames at the source resolution on stdout.
pub fn video_command(ffmpeg: &Path, url: &str, start_offset: f64, reconnect_delay_max: u64) -> Command {
    let mut cmd = Command::new(ffmpeg);
    decoder_input(&mut cmd, url, start_offset, reconnect_delay_max);
    cmd.arg("-an")
        .arg("-f").arg("rawvideo")
        .arg("-pix_fmt").arg("rgb24")
        .arg("pipe:1");
    cmd
}

/// Raw s16le PCM at the configured rate and channel count on stdout.
pub fn audio_command(
    ffmpeg: &Path,
    url: &str,
    start_offset: f64,
    reconnect_delay_max: u64,
    audio: &AudioConfig,
) -> Command {
    let mut cmd = Command::new(ffmpeg);
    decoder_input(&mut cmd, url, start_offset, reconnect_delay_max);
    cmd.arg("-vn")
        .arg("-f").arg("s16le")
        .arg("-ar").arg(audio.sample_rate.to_string())
        .arg("-ac").arg(audio.channels.to_string())
        .arg("pipe:1");
    cmd
}

/// A running decoder. Killed and reaped when dropped.
struct DecodeProcess {
    kind: StreamKind,
    child: Child,
    terminated: bool,
}

impl DecodeProcess {
    fn spawn(kind: StreamKind, mut cmd: Command) -> Result<(Self, ChildStdout)> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|source| PlayerError::ProcessSpawn { kind, source })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PlayerError::ProcessSpawn {
                    kind,
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "decoder stdout was not captured"),
                });
            }
        };

        log::info!("{} decoder started (pid {})", kind, child.id());
        Ok((
            Self {
                kind,
                child,
                terminated: false,
            },
            stdout,
        ))
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn is_running(&mut self) -> bool {
        !self.terminated && matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("{} decoder already exited with {}", self.kind, status);
            }
            _ => {
                if let Err(e) = self.child.kill() {
                    log::warn!("Failed to kill {} decoder: {}", self.kind, e);
                }
                match self.child.wait() {
                    Ok(status) => log::debug!("{} decoder terminated ({})", self.kind, status),
                    Err(e) => log::warn!("Failed to reap {} decoder: {}", self.kind, e),
                }
            }
        }
    }
}

impl Drop for DecodeProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Output streams of a freshly started decoder pair.
pub struct DecodeStreams {
    pub video: ChildStdout,
    pub audio: ChildStdout,
}

/// Owns the video and audio decoders of one pipeline.
pub struct DecodeSupervisor {
    processes: Mutex<Vec<DecodeProcess>>,
    pids: Vec<u32>,
}

impl DecodeSupervisor {
    pub fn start(
        tools: &ToolPaths,
        url: &str,
        start_offset: f64,
        reconnect_delay_max: u64,
        audio: &AudioConfig,
    ) -> Result<(Self, DecodeStreams)> {
        Self::start_with(
            video_command(&tools.ffmpeg, url, start_offset, reconnect_delay_max),
            audio_command(&tools.ffmpeg, url, start_offset, reconnect_delay_max, audio),
        )
    }

    pub(crate) fn start_with(video_cmd: Command, audio_cmd: Command) -> Result<(Self, DecodeStreams)> {
        let (video, video_out) = DecodeProcess::spawn(StreamKind::Video, video_cmd)?;
        let (audio, audio_out) = match DecodeProcess::spawn(StreamKind::Audio, audio_cmd) {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!("Audio decoder failed to start, stopping video decoder: {}", e);
                drop(video);
                return Err(e);
            }
        };

        let pids = vec![video.pid(), audio.pid()];
        Ok((
            Self {
                processes: Mutex::new(vec![video, audio]),
                pids,
            },
            DecodeStreams {
                video: video_out,
                audio: audio_out,
            },
        ))
    }

    /// Terminate both decoders. Idempotent and callable from any thread.
    ///
    /// Killing the processes is what unblocks readers parked on their output pipes.
    pub fn stop_all(&self) {
        let mut processes = match self.processes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for process in processes.iter_mut() {
            process.terminate();
        }
    }

    pub fn is_alive(&self) -> bool {
        let mut processes = match self.processes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        processes.iter_mut().any(|p| p.is_running())
    }

    pub fn pids(&self) -> &[u32] {
        &self.pids
    }
}

impl Drop for DecodeSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
