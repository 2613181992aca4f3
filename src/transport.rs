//! Paced, retried and authorized access to the remote collaborators

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::UploadError;
use crate::pacer::{Category, Outcome, RateLimiter};
use crate::remote::{ControlPlane, CredentialProvider, ObjectStoreClient};
use crate::retry::RetryExecutor;

/// Everything one upload needs to talk to the remote side
pub struct Transport<'a> {
    pub(crate) control: &'a dyn ControlPlane,
    pub(crate) store: &'a dyn ObjectStoreClient,
    credentials: &'a dyn CredentialProvider,
    limiter: &'a RateLimiter,
    retry: &'a RetryExecutor,
    cancel: &'a CancellationToken,
}

impl<'a> Transport<'a> {
    pub fn new(
        control: &'a dyn ControlPlane,
        store: &'a dyn ObjectStoreClient,
        credentials: &'a dyn CredentialProvider,
        limiter: &'a RateLimiter,
        retry: &'a RetryExecutor,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            control,
            store,
            credentials,
            limiter,
            retry,
            cancel,
        }
    }

    pub fn cancel(&self) -> &CancellationToken {
        self.cancel
    }

    /// Run a control-plane call with a fresh bearer token per attempt.
    ///
    /// An authorization rejection triggers one credential refresh and one
    /// more retried run; a second rejection is returned.
    pub async fn authorized<T, F, Fut>(&self, category: Category, call: F) -> Result<T, UploadError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let call = &call;
        let attempt = || {
            self.retry
                .run_paced(self.limiter, category, self.cancel, move |_| async move {
                    let token = self.credentials.current_token().await?;
                    call(token).await
                })
        };

        match attempt().await {
            Err(UploadError::Authorization(reason)) => {
                warn!(
                    "Authorization rejected for {} call ({}), refreshing credentials",
                    category, reason
                );
                self.credentials.force_refresh().await?;
                attempt().await
            }
            other => other,
        }
    }

    /// Run an object-store call under the bulk-transfer category
    pub async fn store_call<T, F, Fut>(&self, call: F) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        self.store_call_with(self.retry, call).await
    }

    /// Like [`store_call`](Self::store_call) with a caller-chosen retry budget
    pub async fn store_call_with<T, F, Fut>(
        &self,
        retry: &RetryExecutor,
        call: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        retry
            .run_paced(self.limiter, Category::BulkTransfer, self.cancel, call)
            .await
    }

    /// Single paced attempt that ignores cancellation, for cleanup after a failure
    pub async fn cleanup_call<T, Fut>(&self, category: Category, call: Fut) -> Result<T, UploadError>
    where
        Fut: Future<Output = Result<T, UploadError>>,
    {
        self.limiter
            .acquire(category, &CancellationToken::new())
            .await?;
        let result = call.await;
        if let Some(outcome) = Outcome::from_result(&result) {
            self.limiter.report_outcome(category, outcome);
        }
        result
    }

    /// Bearer token for a cleanup call made outside the retried path
    pub async fn current_token(&self) -> Result<String, UploadError> {
        self.credentials.current_token().await
    }
}
