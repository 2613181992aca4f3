//! Error taxonomy for the upload engine

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::Strategy;

/// Retry classes in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Never retried, propagated immediately
    Cancelled,
    /// Retried after a server-suggested or default throttle delay
    Throttled,
    /// Retried with exponential backoff
    Transient,
    /// Surfaced so the caller can refresh credentials once
    Authorization,
    /// Not retried
    Fatal,
}

/// Errors produced by the engine's components
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload cancelled")]
    Cancelled,

    #[error("throttled by remote: {message}")]
    Throttled {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("authorization rejected: {0}")]
    Authorization(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("content is not known to the remote and dedup-only mode forbids a transfer")]
    DedupMiss,

    #[error("invalid upload request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("chunk {index} (offset {offset}, {size} bytes) failed: {source}")]
    ChunkFailed {
        index: u64,
        offset: u64,
        size: u64,
        #[source]
        source: Box<UploadError>,
    },
}

impl UploadError {
    /// Classify this error for the retry executor
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Cancelled => RetryClass::Cancelled,
            Self::Throttled { .. } => RetryClass::Throttled,
            Self::Transient(_) => RetryClass::Transient,
            Self::Authorization(_) => RetryClass::Authorization,
            Self::ChunkFailed { source, .. } if source.is_cancelled() => RetryClass::Cancelled,
            _ => RetryClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.retry_class(),
            RetryClass::Throttled | RetryClass::Transient
        )
    }

    /// True for cancellation, including cancellation surfaced through a chunk failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::ChunkFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Server-suggested delay carried by a throttling response
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map a transport-level reqwest failure onto the taxonomy
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::ProtocolViolation(format!("undecodable response: {}", err))
        } else {
            Self::Transient(err.to_string())
        }
    }

    /// Map a non-success HTTP status onto the taxonomy
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        match status {
            401 => Self::Authorization("token invalid or expired".to_string()),
            403 => Self::Authorization("access denied, token may be disabled".to_string()),
            429 => Self::Throttled {
                message: format!("HTTP 429: {}", body),
                retry_after,
            },
            408 | 500..=599 => Self::Transient(format!("HTTP {}: {}", status, body)),
            _ => Self::ProtocolViolation(format!("unexpected HTTP {}: {}", status, body)),
        }
    }
}

/// Location of a failed chunk inside the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub index: u64,
    pub offset: u64,
    pub size: u64,
}

impl ChunkLocation {
    /// Inclusive byte range covered by the chunk
    pub fn byte_range(&self) -> (u64, u64) {
        (self.offset, (self.offset + self.size).saturating_sub(1))
    }
}

/// State of remote multipart resources after a failed upload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionCleanup {
    /// No multipart session was open
    #[default]
    NotOpened,
    /// The session was aborted remotely
    Aborted,
    /// The abort request itself failed; the session may linger remotely
    AbortFailed(String),
}

impl std::fmt::Display for SessionCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpened => write!(f, "none left open"),
            Self::Aborted => write!(f, "aborted"),
            Self::AbortFailed(reason) => write!(f, "left open, abort failed: {}", reason),
        }
    }
}

fn describe_chunk(chunk: &Option<ChunkLocation>) -> String {
    match chunk {
        Some(c) => {
            let (first, last) = c.byte_range();
            format!(" at chunk {} (bytes {}-{})", c.index, first, last)
        }
        None => String::new(),
    }
}

/// Structured failure returned by `UploadCoordinator::submit`
#[derive(Debug, Error)]
#[error(
    "upload of '{path}' failed during {strategy}{}: {source} (remote session: {cleanup})",
    describe_chunk(.chunk)
)]
pub struct SubmitError {
    pub path: String,
    pub strategy: Strategy,
    pub chunk: Option<ChunkLocation>,
    pub cleanup: SessionCleanup,
    #[source]
    pub source: UploadError,
}

impl SubmitError {
    pub fn new(path: impl Into<String>, strategy: Strategy, source: UploadError) -> Self {
        let chunk = match &source {
            UploadError::ChunkFailed {
                index,
                offset,
                size,
                ..
            } => Some(ChunkLocation {
                index: *index,
                offset: *offset,
                size: *size,
            }),
            _ => None,
        };
        Self {
            path: path.into(),
            strategy,
            chunk,
            cleanup: SessionCleanup::NotOpened,
            source,
        }
    }

    pub fn with_cleanup(mut self, cleanup: SessionCleanup) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Cancellation is reported distinctly from transfer failures
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}
