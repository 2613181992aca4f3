//! Upload coordinator: strategy selection, dedup, transfer and reconcile

mod reconcile;
mod select;

pub use select::{select, StrategyPlan, TransferPlan};

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::dedup::{DedupOutcome, HashDedupNegotiator};
use crate::error::{SubmitError, UploadError};
use crate::hash::{HashDigestCalculator, ReplayableSource};
use crate::pacer::{Category, RateLimiter};
use crate::remote::{
    ControlPlane, CredentialProvider, DestinationResolver, ObjectStoreClient, TransferInitRequest,
};
use crate::retry::RetryExecutor;
use crate::transfer::{transfer_chunked, transfer_direct, ChunkPlan, ChunkedFailure};
use crate::transport::Transport;
use crate::types::{ObjectTarget, Placeholder, Strategy, UploadRequest, UploadResult};

/// Public entry point of the engine.
///
/// One coordinator serves any number of concurrent `submit` calls; each call
/// owns its source, digests and multipart session, while the rate limiter is
/// shared across all of them.
pub struct UploadCoordinator {
    config: Arc<Config>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    control: Arc<dyn ControlPlane>,
    store: Arc<dyn ObjectStoreClient>,
    credentials: Arc<dyn CredentialProvider>,
    resolver: Arc<dyn DestinationResolver>,
}

impl UploadCoordinator {
    pub fn new(
        config: Arc<Config>,
        limiter: Arc<RateLimiter>,
        control: Arc<dyn ControlPlane>,
        store: Arc<dyn ObjectStoreClient>,
        credentials: Arc<dyn CredentialProvider>,
        resolver: Arc<dyn DestinationResolver>,
    ) -> Self {
        let retry = RetryExecutor::new(config.retry);
        Self {
            config,
            limiter,
            retry,
            control,
            store,
            credentials,
            resolver,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Upload one payload and return the remote object's reference
    pub async fn submit(&self, request: UploadRequest) -> Result<UploadResult, SubmitError> {
        let UploadRequest {
            path,
            size,
            source,
            options,
            replaces,
            cancel,
        } = request;

        let plan = select(self.config.mode, size, &self.config)
            .map_err(|e| SubmitError::new(&path, Strategy::Dedup, e))?;
        let fail = |strategy: Strategy, error: UploadError| SubmitError::new(&path, strategy, error);

        info!(
            "Uploading {} ({} bytes, {} mode): starting with {}",
            path,
            size.map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            self.config.mode,
            plan.initial()
        );

        if cancel.is_cancelled() {
            return Err(fail(plan.initial(), UploadError::Cancelled));
        }

        let transport = Transport::new(
            self.control.as_ref(),
            self.store.as_ref(),
            self.credentials.as_ref(),
            &self.limiter,
            &self.retry,
            &cancel,
        );

        let placeholder = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            reserved = self.resolver.reserve_placeholder(&path) => reserved,
        }
        .map_err(|e| fail(plan.initial(), e))?;

        // Buffered temporary storage lives exactly as long as `source`
        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            prepared = ReplayableSource::prepare(
                source,
                size,
                self.config.hash_memory_threshold,
                plan.dedup,
            ) => prepared,
        }
        .map_err(|e| fail(plan.initial(), e))?;

        let mut full_hash = None;
        let mut issued_target = None;

        if plan.dedup {
            let declared = size.ok_or_else(|| {
                fail(
                    Strategy::Dedup,
                    UploadError::InvalidRequest("dedup requires a declared size".to_string()),
                )
            })?;
            let mut calculator =
                HashDigestCalculator::new(&source, declared).with_cancellation(cancel.clone());
            let negotiation = HashDedupNegotiator::new(&transport, self.config.max_sign_rounds)
                .negotiate(&mut calculator, &placeholder)
                .await
                .map_err(|e| fail(Strategy::Dedup, e))?;
            full_hash = Some(negotiation.digests.full);

            match (negotiation.outcome, plan.transfer) {
                (DedupOutcome::InstantSuccess { file_id, pick_code }, _) => {
                    let result = reconcile::instant_result(
                        &placeholder,
                        file_id,
                        pick_code,
                        declared,
                        &negotiation.digests.full,
                    );
                    reconcile::remove_stale(&transport, replaces.as_deref(), &result.file_id)
                        .await;
                    return Ok(result);
                }
                (DedupOutcome::NeedUpload { .. }, None) => {
                    return Err(fail(Strategy::Dedup, UploadError::DedupMiss));
                }
                (DedupOutcome::Failed { error }, None) => {
                    return Err(fail(Strategy::Dedup, error));
                }
                (DedupOutcome::NeedUpload { target }, Some(transfer)) => {
                    info!("{} not known remotely, transferring via {}", path, transfer.strategy());
                    issued_target = Some(target);
                }
                (DedupOutcome::Failed { error }, Some(transfer)) => {
                    info!(
                        "Instant upload of {} failed ({}), falling back to {} from a rewound source",
                        path,
                        error,
                        transfer.strategy()
                    );
                }
            }
        }

        let transfer = plan.transfer.ok_or_else(|| {
            fail(
                Strategy::Dedup,
                UploadError::InvalidRequest("no transfer strategy available".to_string()),
            )
        })?;
        let strategy = transfer.strategy();

        let target = match issued_target {
            Some(target) => target,
            None => self
                .request_target(&transport, &placeholder, size)
                .await
                .map_err(|e| fail(strategy, e))?,
        };

        let (callback_body, bytes_sent) = match transfer {
            TransferPlan::Direct(declared) => {
                let direct = transfer_direct(&transport, &source, &target, declared, &options)
                    .await
                    .map_err(|e| fail(strategy, e))?;
                (direct.callback_body, direct.bytes_sent)
            }
            TransferPlan::Chunked => {
                let chunk_plan =
                    ChunkPlan::for_size(size, &self.config).map_err(|e| fail(strategy, e))?;
                match transfer_chunked(
                    &transport,
                    &source,
                    target,
                    chunk_plan,
                    &options,
                    self.config.retry,
                    self.config.chunk_attempts,
                )
                .await
                {
                    Ok(chunked) => (chunked.callback_body, chunked.bytes_sent),
                    Err(ChunkedFailure { error, cleanup }) => {
                        return Err(fail(strategy, error).with_cleanup(cleanup));
                    }
                }
            }
        };

        let result = reconcile::transfer_result(
            &callback_body,
            &placeholder,
            size,
            bytes_sent,
            full_hash.as_ref(),
            strategy,
        )
        .map_err(|e| fail(strategy, e))?;

        info!(
            "Uploaded {} via {}: file id {}, {} bytes",
            path, strategy, result.file_id, result.bytes_transferred
        );
        reconcile::remove_stale(&transport, replaces.as_deref(), &result.file_id).await;
        Ok(result)
    }

    async fn request_target(
        &self,
        transport: &Transport<'_>,
        placeholder: &Placeholder,
        size: Option<u64>,
    ) -> Result<ObjectTarget, UploadError> {
        let request = TransferInitRequest {
            file_name: placeholder.leaf_name.clone(),
            file_size: size,
            parent_id: placeholder.parent_id.clone(),
        };
        let control = self.control.as_ref();
        let request = &request;
        transport
            .authorized(Category::UploadInit, |token| async move {
                control.init_transfer(&token, request).await
            })
            .await
    }
}
