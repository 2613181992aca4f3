//! Request, result and remote descriptor types shared across the engine

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::hash::UploadSource;

/// Transfer strategy in effect when an upload succeeded or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Instant hash-dedup negotiation
    Dedup,
    /// Single-shot small-file transfer
    Direct,
    /// Chunked multipart transfer
    Chunked,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dedup => write!(f, "dedup"),
            Self::Direct => write!(f, "direct"),
            Self::Chunked => write!(f, "chunked"),
        }
    }
}

/// Per-upload transfer options forwarded to the object store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// One upload submitted to the coordinator
#[derive(Debug)]
pub struct UploadRequest {
    /// Destination path, e.g. `/photos/2024/img.jpg`
    pub path: String,
    /// Declared size; `None` when unknown
    pub size: Option<u64>,
    pub source: UploadSource,
    pub options: TransferOptions,
    /// Object already present at the destination that this upload replaces
    pub replaces: Option<String>,
    pub cancel: CancellationToken,
}

impl UploadRequest {
    pub fn new(path: impl Into<String>, size: Option<u64>, source: UploadSource) -> Self {
        Self {
            path: path.into(),
            size,
            source,
            options: TransferOptions::default(),
            replaces: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    pub fn replacing(mut self, object_id: impl Into<String>) -> Self {
        self.replaces = Some(object_id.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Durable reference to the uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub file_id: String,
    pub parent_id: String,
    pub name: String,
    /// Remote-confirmed size
    pub size: u64,
    /// Remote-confirmed content hash, lowercase hex
    pub sha1: String,
    /// Opaque continuation token for later reference
    pub pick_code: String,
    pub strategy: Strategy,
    pub bytes_transferred: u64,
}

/// Destination reservation returned by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub parent_id: String,
    pub leaf_name: String,
}

/// Callback descriptor the object store forwards to the control plane on completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackSpec {
    pub callback: String,
    #[serde(default)]
    pub callback_var: String,
}

/// Object-store location issued by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket: String,
    pub object_key: String,
    pub callback: CallbackSpec,
}

/// Acknowledged multipart chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedChunk {
    /// 1-based part number
    pub part_number: u32,
    /// Integrity tag returned by the store (ETag)
    pub etag: String,
}
