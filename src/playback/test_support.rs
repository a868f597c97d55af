//! Stand-in ffmpeg and yt-dlp scripts for driving real pipelines in tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::core::{PlayerConfig, ToolPaths};

fn scratch_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("nox-player-tests-")
        .tempdir()
        .expect("create scratch dir")
}

fn write_executable(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{}", body)).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

/// An executable shell script. Its directory is removed on drop.
pub(crate) struct Script {
    _dir: TempDir,
    pub path: PathBuf,
}

pub(crate) fn write_script(name: &str, body: &str) -> Script {
    let dir = scratch_dir();
    let path = dir.path().join(name);
    write_executable(&path, body);
    Script { _dir: dir, path }
}

pub(crate) const WIDTH: u32 = 16;
pub(crate) const HEIGHT: u32 = 8;

pub(crate) fn resolver_json(duration: f64) -> String {
    format!(
        r#"{{"url": "https://media.example/stream.mp4", "duration": {}, "fps": 30, "width": {}, "height": {}}}"#,
        duration, WIDTH, HEIGHT
    )
}

pub(crate) struct FakeTools {
    dir: TempDir,
    pub tools: ToolPaths,
    /// One line of arguments per decoder invocation.
    pub ffmpeg_log: PathBuf,
}

impl FakeTools {
    /// Decoders that stream zeros until killed.
    pub fn endless(duration: f64) -> Self {
        Self::with_decoders(duration, "exec cat /dev/zero", "exec cat /dev/zero")
    }

    /// Decoders that emit `frames` video frames and `audio_bytes` of PCM, then exit.
    pub fn finite(duration: f64, frames: usize, audio_bytes: usize) -> Self {
        let frame_bytes = (WIDTH * HEIGHT * 3) as usize;
        Self::with_decoders(
            duration,
            &format!("exec head -c {} /dev/zero", frames * frame_bytes),
            &format!("exec head -c {} /dev/zero", audio_bytes),
        )
    }

    fn with_decoders(duration: f64, video: &str, audio: &str) -> Self {
        let dir = scratch_dir();
        let ffmpeg_log = dir.path().join("ffmpeg.log");

        let ffmpeg = dir.path().join("ffmpeg");
        write_executable(
            &ffmpeg,
            &format!(
                "echo \"$*\" >> '{}'\ncase \" $* \" in\n  *\" -an \"*) {} ;;\n  *) {} ;;\nesac\n",
                ffmpeg_log.display(),
                video,
                audio
            ),
        );

        let ytdlp = dir.path().join("yt-dlp");
        write_executable(&ytdlp, &format!("cat <<'JSON'\n{}\nJSON\n", resolver_json(duration)));

        Self {
            tools: ToolPaths {
                ffmpeg,
                ffprobe: dir.path().join("ffprobe-missing"),
                ytdlp,
            },
            ffmpeg_log,
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Player config using these tools with audio output disabled.
    pub fn config(&self) -> PlayerConfig {
        let mut config = PlayerConfig::default();
        config.tools = self.tools.clone();
        config.audio.enabled = false;
        config
    }

    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.ffmpeg_log)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_tools_are_removed_on_drop() {
        let fake = FakeTools::endless(10.0);
        let dir = fake.dir().to_path_buf();
        assert!(fake.tools.ffmpeg.is_file());
        assert!(fake.tools.ytdlp.is_file());

        drop(fake);
        assert!(!dir.exists());
    }

    #[test]
    fn test_script_is_removed_on_drop() {
        let script = write_script("noop", "exit 0\n");
        let dir = script.path.parent().map(Path::to_path_buf).unwrap();
        assert!(script.path.is_file());

        drop(script);
        assert!(!dir.exists());
    }
}
