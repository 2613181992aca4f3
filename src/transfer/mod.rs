//! Byte transfer strategies: single-shot and chunked multipart

mod plan;
mod session;
mod single;

pub use plan::ChunkPlan;
pub use session::{transfer_chunked, ChunkedFailure, ChunkedTransfer, ChunkedTransferSession};
pub use single::{transfer_direct, DirectTransfer};
