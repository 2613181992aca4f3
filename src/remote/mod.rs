//! Collaborator seams: credentials, destination resolution, control plane and object store

mod http;
pub mod wire;

pub use http::HttpControlPlane;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::UploadError;
use crate::hash::ByteRange;
use crate::types::{CompletedChunk, ObjectTarget, Placeholder, TransferOptions};

/// Bearer-token source for control-plane calls
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current_token(&self) -> Result<String, UploadError>;

    /// Obtain a new token after an authorization rejection
    async fn force_refresh(&self) -> Result<(), UploadError>;
}

/// Ensures the destination's parent exists before any transfer
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    async fn reserve_placeholder(&self, path: &str) -> Result<Placeholder, UploadError>;
}

/// Hash-bearing upload initiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub parent_id: String,
    /// Full-content SHA-1, uppercase hex
    pub file_hash: String,
    /// Prefix SHA-1, uppercase hex
    pub prefix_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_key: Option<String>,
    /// Challenge range SHA-1, uppercase hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_val: Option<String>,
}

/// Hash-less request for an object-store target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferInitRequest {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub parent_id: String,
}

/// Normalized reply to an upload initiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitReply {
    /// Content already known remotely
    Instant { file_id: String, pick_code: String },
    /// Bytes must be transferred to the given target
    NeedUpload(ObjectTarget),
    /// Proof of possession of `range` is required
    SignCheck { sign_key: String, range: ByteRange },
    /// Any other status
    Rejected { status: i64, message: String },
}

/// Control-plane API of the drive service
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn init_upload(
        &self,
        token: &str,
        request: &InitUploadRequest,
    ) -> Result<InitReply, UploadError>;

    async fn init_transfer(
        &self,
        token: &str,
        request: &TransferInitRequest,
    ) -> Result<ObjectTarget, UploadError>;

    async fn delete_object(&self, token: &str, object_id: &str) -> Result<(), UploadError>;
}

/// S3-compatible object-store surface
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Start a multipart session, returning its id
    async fn initiate_session(
        &self,
        target: &ObjectTarget,
        options: &TransferOptions,
    ) -> Result<String, UploadError>;

    /// Upload one part, returning its integrity tag
    async fn upload_part(
        &self,
        target: &ObjectTarget,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, UploadError>;

    /// Finalize the session; the body is the control-plane callback result
    async fn complete_session(
        &self,
        target: &ObjectTarget,
        session_id: &str,
        parts: &[CompletedChunk],
    ) -> Result<Bytes, UploadError>;

    async fn abort_session(&self, target: &ObjectTarget, session_id: &str)
        -> Result<(), UploadError>;

    /// Single-shot upload; the body is the control-plane callback result
    async fn put_object(
        &self,
        target: &ObjectTarget,
        data: Bytes,
        options: &TransferOptions,
    ) -> Result<Bytes, UploadError>;
}
