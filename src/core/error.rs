use std::fmt;
use thiserror::Error;

use crate::playback::PlaybackState;

/// Which of the two decode processes an error or worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Failures while turning a source reference into a playable URL.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("{tool} not found")]
    ToolMissing { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    NonZeroExit {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("malformed resolver output: {0}")]
    MalformedOutput(String),

    #[error("resolver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for the playback core.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("failed to resolve source: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to spawn {kind} decoder: {source}")]
    ProcessSpawn {
        kind: StreamKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} stream ended before producing any data")]
    StreamEnded(StreamKind),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error("failed to start {name} worker: {source}")]
    WorkerSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PlayerError>;
