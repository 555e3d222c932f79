use thiserror::Error;

use crate::buffer::BufferId;
use crate::timeline::{ClipId, RowId};

/// Top-level error for every fallible studio operation.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Invalid operation: {0}")]
    InvalidOperation(#[from] InvalidOperation),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Malformed or unsupported input audio. No clip is ever inserted.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognized audio container")]
    UnsupportedFormat,
    #[error("unsupported sample format: {bits}-bit {kind}")]
    UnsupportedSampleFormat { bits: u16, kind: &'static str },
    #[error("malformed WAV data: {0}")]
    Wav(#[from] hound::Error),
    #[error("malformed MP3 data: {0}")]
    Mp3(String),
    #[error("audio contains no frames")]
    Empty,
    #[error("invalid stream layout: {channels} channels at {sample_rate} Hz")]
    InvalidLayout { channels: usize, sample_rate: u32 },
}

/// The external voice service failed or returned no audio.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("voice service unreachable: {0}")]
    Unreachable(String),
    #[error("voice service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("voice service returned no audio")]
    NoAudio,
    #[error("voice service timed out after {0:.1}s")]
    Timeout(f64),
    #[error("voice service audio could not be decoded: {0}")]
    Decode(#[from] DecodeError),
}

/// Offline render failed. Partial output is discarded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("an offline render is already in progress")]
    Busy,
    #[error("render cancelled")]
    Cancelled,
    #[error("project is empty, nothing to render")]
    EmptyProject,
    #[error("render of {frames} frames exceeds the WAV size limit")]
    TooLarge { frames: usize },
    #[error("render worker failed: {0}")]
    Worker(String),
}

/// Structural operations that were rejected before touching any state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidOperation {
    #[error("clip {0} not found")]
    ClipNotFound(ClipId),
    #[error("row {0} not found")]
    RowNotFound(RowId),
    #[error("buffer {0} not found")]
    BufferNotFound(BufferId),
    #[error("split point {at:.4}s lies outside clip {clip} ({start:.4}s..{end:.4}s)")]
    SplitOutOfBounds {
        clip: ClipId,
        at: f64,
        start: f64,
        end: f64,
    },
    #[error("buffer has no frames")]
    EmptyBuffer,
    #[error("buffer layout {channels}ch@{sample_rate}Hz does not match the project")]
    LayoutMismatch { channels: usize, sample_rate: u32 },
    #[error("scrubbing is only available while stopped")]
    ScrubWhilePlaying,
    #[error("engine command queue is full")]
    CommandQueueFull,
    #[error("{0} holds overlapping clips")]
    OverlappingClips(RowId),
    #[error("{0} is outside the usable id range")]
    RowIdOutOfRange(RowId),
    #[error("{0} is outside the usable id range")]
    ClipIdOutOfRange(ClipId),
}

/// Project store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project '{0}' not found")]
    NotFound(String),
    #[error("no data directory available on this platform")]
    NoDataDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Configuration file failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
