//! upload-engine library - cloud-drive uploads with instant hash dedup,
//! single-shot and chunked multipart transfer, adaptive pacing and retry

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod hash;
pub mod http_logger;
pub mod pacer;
pub mod remote;
pub mod retry;
pub mod transfer;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::{chunk_size_for, Config, ConfigOptions, UploadMode};
pub use coordinator::UploadCoordinator;
pub use error::{ChunkLocation, SessionCleanup, SubmitError, UploadError};
pub use hash::{HashDigestCalculator, ReplayableSource, SourceProducer, UploadSource};
pub use pacer::{Category, Outcome, PacerSettings, RateLimiter};
pub use remote::{
    ControlPlane, CredentialProvider, DestinationResolver, HttpControlPlane, ObjectStoreClient,
};
pub use retry::{RetryExecutor, RetryPolicy};
pub use types::{
    CallbackSpec, CompletedChunk, ObjectTarget, Placeholder, Strategy, TransferOptions,
    UploadRequest, UploadResult,
};
