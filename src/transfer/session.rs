//! Multipart session lifecycle and the sequential chunk driver

use bytes::Bytes;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use super::plan::ChunkPlan;
use crate::error::{SessionCleanup, UploadError};
use crate::hash::ReplayableSource;
use crate::pacer::Category;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::transport::Transport;
use crate::types::{CompletedChunk, ObjectTarget, TransferOptions};

/// Initial buffer capacity per chunk; buffers grow past it as needed
const READ_CAPACITY_HINT: u64 = 8 * 1024 * 1024;

/// One open multipart upload against the object store
pub struct ChunkedTransferSession<'a> {
    transport: &'a Transport<'a>,
    chunk_retry: RetryExecutor,
    session_id: String,
    target: ObjectTarget,
    plan: ChunkPlan,
    completed: Vec<CompletedChunk>,
    cleanup: Option<SessionCleanup>,
}

impl<'a> ChunkedTransferSession<'a> {
    /// Start a remote session for `target`.
    ///
    /// Each chunk gets `chunk_attempts` tries under `policy`'s delays.
    pub async fn open(
        transport: &'a Transport<'a>,
        target: ObjectTarget,
        plan: ChunkPlan,
        options: &TransferOptions,
        policy: RetryPolicy,
        chunk_attempts: u32,
    ) -> Result<ChunkedTransferSession<'a>, UploadError> {
        let store = transport.store;
        let session_id = transport
            .store_call(|_| store.initiate_session(&target, options))
            .await?;

        info!(
            "Opened multipart session {} for {} ({} chunks of {} bytes)",
            session_id,
            target.object_key,
            plan.chunk_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string()),
            plan.chunk_size
        );

        Ok(Self {
            transport,
            chunk_retry: RetryExecutor::new(policy.with_max_attempts(chunk_attempts)),
            session_id,
            target,
            plan,
            completed: Vec::new(),
            cleanup: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn completed(&self) -> &[CompletedChunk] {
        &self.completed
    }

    /// Upload chunk `index` (0-based); chunks must arrive in order.
    ///
    /// Retries resend the same buffer. Exhausting the attempts yields
    /// `ChunkFailed` carrying the chunk's index, offset and size.
    pub async fn upload_chunk(
        &mut self,
        index: u64,
        data: Bytes,
    ) -> Result<CompletedChunk, UploadError> {
        if index != self.completed.len() as u64 {
            return Err(UploadError::InvalidRequest(format!(
                "chunk {} submitted out of order, expected {}",
                index,
                self.completed.len()
            )));
        }
        if index >= self.plan.max_chunks {
            return Err(UploadError::InvalidRequest(format!(
                "payload exceeds the {} part limit",
                self.plan.max_chunks
            )));
        }

        let offset = self.plan.chunk_offset(index);
        let size = data.len() as u64;
        let part_number = u32::try_from(index + 1).map_err(|_| {
            UploadError::InvalidRequest(format!("chunk index {} out of range", index))
        })?;

        let store = self.transport.store;
        let target = &self.target;
        let session_id = self.session_id.as_str();
        let result = self
            .transport
            .store_call_with(&self.chunk_retry, |attempt| {
                if attempt > 0 {
                    debug!("Resending chunk {} (attempt {})", index, attempt + 1);
                }
                store.upload_part(target, session_id, part_number, data.clone())
            })
            .await;

        let etag = result.map_err(|source| UploadError::ChunkFailed {
            index,
            offset,
            size,
            source: Box::new(source),
        })?;

        debug!(
            "Chunk {} uploaded: bytes {}-{}, etag {}",
            index,
            offset,
            (offset + size).saturating_sub(1),
            etag
        );
        let descriptor = CompletedChunk { part_number, etag };
        self.completed.push(descriptor.clone());
        Ok(descriptor)
    }

    /// Finalize the session; the returned body is the callback result
    pub async fn complete(&mut self) -> Result<Bytes, UploadError> {
        if let Some(expected) = self.plan.chunk_count {
            if self.completed.len() as u64 != expected {
                return Err(UploadError::InvalidRequest(format!(
                    "cannot complete with {} of {} chunks acknowledged",
                    self.completed.len(),
                    expected
                )));
            }
        }
        self.completed.sort_by_key(|c| c.part_number);

        let store = self.transport.store;
        let target = &self.target;
        let session_id = self.session_id.as_str();
        let parts = self.completed.as_slice();
        let body = self
            .transport
            .store_call(|_| store.complete_session(target, session_id, parts))
            .await?;

        info!(
            "Completed multipart session {} with {} parts",
            self.session_id,
            self.completed.len()
        );
        Ok(body)
    }

    /// Release the remote session; attempted at most once
    pub async fn abort(&mut self) -> SessionCleanup {
        if let Some(cleanup) = &self.cleanup {
            return cleanup.clone();
        }

        let store = self.transport.store;
        let result = self
            .transport
            .cleanup_call(
                Category::BulkTransfer,
                store.abort_session(&self.target, &self.session_id),
            )
            .await;

        let cleanup = match result {
            Ok(()) => {
                info!("Aborted multipart session {}", self.session_id);
                SessionCleanup::Aborted
            }
            Err(e) => {
                warn!("Failed to abort multipart session {}: {}", self.session_id, e);
                SessionCleanup::AbortFailed(e.to_string())
            }
        };
        self.cleanup = Some(cleanup.clone());
        cleanup
    }
}

/// Body and byte count of a completed chunked transfer
#[derive(Debug)]
pub struct ChunkedTransfer {
    pub callback_body: Bytes,
    pub bytes_sent: u64,
    pub chunks: u64,
}

/// Error from a chunked transfer plus the state of the remote session
#[derive(Debug)]
pub struct ChunkedFailure {
    pub error: UploadError,
    pub cleanup: SessionCleanup,
}

/// Stream `source` through a new session chunk by chunk, aborting on failure
pub async fn transfer_chunked(
    transport: &Transport<'_>,
    source: &ReplayableSource,
    target: ObjectTarget,
    plan: ChunkPlan,
    options: &TransferOptions,
    policy: RetryPolicy,
    chunk_attempts: u32,
) -> Result<ChunkedTransfer, ChunkedFailure> {
    let mut session =
        ChunkedTransferSession::open(transport, target, plan, options, policy, chunk_attempts)
            .await
            .map_err(|error| ChunkedFailure {
                error,
                cleanup: SessionCleanup::NotOpened,
            })?;

    let outcome = match send_chunks(&mut session, source).await {
        Ok(sent) => session.complete().await.map(|body| (body, sent)),
        Err(e) => Err(e),
    };

    match outcome {
        Ok((callback_body, bytes_sent)) => Ok(ChunkedTransfer {
            callback_body,
            bytes_sent,
            chunks: session.completed().len() as u64,
        }),
        Err(error) => {
            warn!(
                "Chunked transfer in session {} failed: {}",
                session.session_id(),
                error
            );
            let cleanup = session.abort().await;
            Err(ChunkedFailure { error, cleanup })
        }
    }
}

async fn send_chunks(
    session: &mut ChunkedTransferSession<'_>,
    source: &ReplayableSource,
) -> Result<u64, UploadError> {
    let plan = *session.plan();
    let cancel = session.transport.cancel().clone();
    let mut reader = BufReader::new(source.open().await?);
    let mut sent: u64 = 0;
    let mut index: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let want = plan.chunk_len(index);
        let mut buf = Vec::with_capacity(want.min(READ_CAPACITY_HINT) as usize);
        (&mut reader).take(want).read_to_end(&mut buf).await?;
        let got = buf.len() as u64;

        match plan.chunk_count {
            Some(_) if got < want => {
                return Err(UploadError::Integrity(format!(
                    "source ended at byte {} before the declared size {}",
                    sent + got,
                    plan.total_size.unwrap_or_default()
                )));
            }
            // Unknown size: an empty read past the first chunk means the stream is done
            None if got == 0 && index > 0 => break,
            _ => {}
        }

        session.upload_chunk(index, Bytes::from(buf)).await?;
        sent += got;
        index += 1;

        let finished = match plan.chunk_count {
            Some(count) => index >= count,
            None => got < want,
        };
        if finished {
            break;
        }
    }

    if plan.chunk_count.is_some() {
        let mut probe = [0u8; 1];
        if reader.read(&mut probe).await? > 0 {
            return Err(UploadError::Integrity(format!(
                "source produced more than the declared {} bytes",
                sent
            )));
        }
    }

    Ok(sent)
}
