//! In-memory collaborators for driving the coordinator in tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use upload_engine::hash::{BoxReader, ByteRange, Sha1Digest};
use upload_engine::remote::{InitReply, InitUploadRequest, TransferInitRequest};
use upload_engine::{
    CallbackSpec, CompletedChunk, Config, ConfigOptions, ControlPlane, CredentialProvider,
    DestinationResolver, ObjectStoreClient, ObjectTarget, PacerSettings, Placeholder,
    RateLimiter, SourceProducer, TransferOptions, UploadCoordinator, UploadError,
};

pub const MIB: u64 = 1024 * 1024;

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn target() -> ObjectTarget {
    ObjectTarget {
        bucket: "drive-bucket".to_string(),
        object_key: "uploads/object".to_string(),
        callback: CallbackSpec {
            callback: "cb-payload".to_string(),
            callback_var: "cb-vars".to_string(),
        },
    }
}

/// Config with pacing disabled and millisecond retry delays
pub fn fast_options() -> ConfigOptions {
    ConfigOptions {
        listing_delay: Some(Duration::ZERO),
        upload_init_delay: Some(Duration::ZERO),
        download_link_delay: Some(Duration::ZERO),
        mutation_delay: Some(Duration::ZERO),
        bulk_transfer_delay: Some(Duration::ZERO),
        retry_base_delay: Some(Duration::from_millis(1)),
        retry_max_backoff: Some(Duration::from_millis(5)),
        throttle_delay: Some(Duration::from_millis(1)),
        ..Default::default()
    }
}

// ============================================================================
// Control plane
// ============================================================================

struct Challenge {
    range: ByteRange,
    proof: String,
}

#[derive(Default)]
pub struct FakeControlPlane {
    known: Mutex<HashMap<String, (String, String)>>,
    challenge: Mutex<Option<Challenge>>,
    reject_status: Mutex<Option<i64>>,
    fail_auth_once: AtomicBool,
    fail_delete: AtomicBool,
    pub init_requests: Mutex<Vec<InitUploadRequest>>,
    pub transfer_requests: Mutex<Vec<TransferInitRequest>>,
    pub deleted: Mutex<Vec<String>>,
    pub tokens_seen: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    /// Remember `data` as already stored remotely
    pub fn seed(&self, data: &[u8], file_id: &str, pick_code: &str) {
        self.known.lock().unwrap().insert(
            Sha1Digest::of(data).to_upper_hex(),
            (file_id.to_string(), pick_code.to_string()),
        );
    }

    /// Demand proof of `range` of `data` before answering
    pub fn challenge(&self, data: &[u8], range: &str) {
        let range = ByteRange::parse(range).unwrap();
        let slice = &data[range.start as usize..=range.end as usize];
        *self.challenge.lock().unwrap() = Some(Challenge {
            range,
            proof: Sha1Digest::of(slice).to_upper_hex(),
        });
    }

    pub fn reject_with(&self, status: i64) {
        *self.reject_status.lock().unwrap() = Some(status);
    }

    pub fn fail_auth_once(&self) {
        self.fail_auth_once.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn init_count(&self) -> usize {
        self.init_requests.lock().unwrap().len()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfer_requests.lock().unwrap().len()
    }

    fn check_auth(&self, token: &str) -> Result<(), UploadError> {
        self.tokens_seen.lock().unwrap().push(token.to_string());
        if self.fail_auth_once.swap(false, Ordering::SeqCst) {
            return Err(UploadError::Authorization("token expired".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn init_upload(
        &self,
        token: &str,
        request: &InitUploadRequest,
    ) -> Result<InitReply, UploadError> {
        self.check_auth(token)?;
        self.init_requests.lock().unwrap().push(request.clone());

        if let Some(status) = *self.reject_status.lock().unwrap() {
            return Ok(InitReply::Rejected {
                status,
                message: "rejected".to_string(),
            });
        }

        if let Some(challenge) = self.challenge.lock().unwrap().as_ref() {
            match &request.sign_val {
                None => {
                    return Ok(InitReply::SignCheck {
                        sign_key: "sig-1".to_string(),
                        range: challenge.range,
                    })
                }
                Some(proof) if *proof != challenge.proof => {
                    return Ok(InitReply::Rejected {
                        status: 0,
                        message: "bad proof".to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        match self.known.lock().unwrap().get(&request.file_hash) {
            Some((file_id, pick_code)) => Ok(InitReply::Instant {
                file_id: file_id.clone(),
                pick_code: pick_code.clone(),
            }),
            None => Ok(InitReply::NeedUpload(target())),
        }
    }

    async fn init_transfer(
        &self,
        token: &str,
        request: &TransferInitRequest,
    ) -> Result<ObjectTarget, UploadError> {
        self.check_auth(token)?;
        self.transfer_requests.lock().unwrap().push(request.clone());
        Ok(target())
    }

    async fn delete_object(&self, token: &str, object_id: &str) -> Result<(), UploadError> {
        self.check_auth(token)?;
        self.deleted.lock().unwrap().push(object_id.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(UploadError::ProtocolViolation("cannot delete".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Initiate,
    Part { part_number: u32, len: u64 },
    Complete { parts: Vec<u32> },
    Abort,
    Put { len: u64 },
}

#[derive(Default)]
pub struct FakeObjectStore {
    pub events: Mutex<Vec<StoreEvent>>,
    /// Part number that always fails
    fail_part: Mutex<Option<u32>>,
    /// Part number and how many attempts fail before it succeeds
    flaky_part: Mutex<Option<(u32, u32)>>,
    /// Cancel this token when the given part arrives
    cancel_on_part: Mutex<Option<(u32, CancellationToken)>>,
    report_sha1: AtomicBool,
    received: Mutex<u64>,
    hasher: Mutex<Option<Sha1>>,
    objects: AtomicU32,
}

impl FakeObjectStore {
    pub fn fail_part(&self, part_number: u32) {
        *self.fail_part.lock().unwrap() = Some(part_number);
    }

    pub fn flaky_part(&self, part_number: u32, failures: u32) {
        *self.flaky_part.lock().unwrap() = Some((part_number, failures));
    }

    pub fn cancel_on_part(&self, part_number: u32, token: CancellationToken) {
        *self.cancel_on_part.lock().unwrap() = Some((part_number, token));
    }

    /// Include the SHA-1 of received bytes in callback results
    pub fn report_sha1(&self) {
        self.report_sha1.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: impl Fn(&StoreEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matcher(e)).count()
    }

    fn begin(&self) {
        *self.received.lock().unwrap() = 0;
        *self.hasher.lock().unwrap() = self
            .report_sha1
            .load(Ordering::SeqCst)
            .then(Sha1::new);
    }

    fn absorb(&self, data: &[u8]) {
        *self.received.lock().unwrap() += data.len() as u64;
        if let Some(hasher) = self.hasher.lock().unwrap().as_mut() {
            hasher.update(data);
        }
    }

    fn callback_body(&self) -> Bytes {
        let n = self.objects.fetch_add(1, Ordering::SeqCst) + 1;
        let size = *self.received.lock().unwrap();
        let sha1 = self
            .hasher
            .lock()
            .unwrap()
            .take()
            .map(|h| hex::encode_upper(h.finalize()));
        let body = serde_json::json!({
            "state": true,
            "data": {
                "file_id": format!("obj-{}", n),
                "pick_code": format!("pc-{}", n),
                "file_size": size.to_string(),
                "sha1": sha1,
            }
        });
        Bytes::from(body.to_string())
    }
}

#[async_trait]
impl ObjectStoreClient for FakeObjectStore {
    async fn initiate_session(
        &self,
        _target: &ObjectTarget,
        _options: &TransferOptions,
    ) -> Result<String, UploadError> {
        self.begin();
        self.events.lock().unwrap().push(StoreEvent::Initiate);
        Ok("session-1".to_string())
    }

    async fn upload_part(
        &self,
        _target: &ObjectTarget,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, UploadError> {
        assert_eq!(session_id, "session-1");
        self.events.lock().unwrap().push(StoreEvent::Part {
            part_number,
            len: data.len() as u64,
        });

        if let Some((part, token)) = self.cancel_on_part.lock().unwrap().as_ref() {
            if *part == part_number {
                token.cancel();
                return Err(UploadError::Transient("connection reset".to_string()));
            }
        }
        if *self.fail_part.lock().unwrap() == Some(part_number) {
            return Err(UploadError::Transient("HTTP 503".to_string()));
        }
        {
            let mut flaky = self.flaky_part.lock().unwrap();
            if let Some((part, remaining)) = flaky.as_mut() {
                if *part == part_number && *remaining > 0 {
                    *remaining -= 1;
                    return Err(UploadError::Transient("timeout".to_string()));
                }
            }
        }

        self.absorb(&data);
        Ok(format!("etag-{}", part_number))
    }

    async fn complete_session(
        &self,
        _target: &ObjectTarget,
        _session_id: &str,
        parts: &[CompletedChunk],
    ) -> Result<Bytes, UploadError> {
        self.events.lock().unwrap().push(StoreEvent::Complete {
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        Ok(self.callback_body())
    }

    async fn abort_session(
        &self,
        _target: &ObjectTarget,
        _session_id: &str,
    ) -> Result<(), UploadError> {
        self.events.lock().unwrap().push(StoreEvent::Abort);
        Ok(())
    }

    async fn put_object(
        &self,
        _target: &ObjectTarget,
        data: Bytes,
        _options: &TransferOptions,
    ) -> Result<Bytes, UploadError> {
        self.begin();
        self.events.lock().unwrap().push(StoreEvent::Put {
            len: data.len() as u64,
        });
        self.absorb(&data);
        Ok(self.callback_body())
    }
}

// ============================================================================
// Credentials, resolver, producers
// ============================================================================

pub struct StaticCredentials {
    token: Mutex<String>,
    pub refreshes: AtomicU32,
}

impl Default for StaticCredentials {
    fn default() -> Self {
        Self {
            token: Mutex::new("token-1".to_string()),
            refreshes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn current_token(&self) -> Result<String, UploadError> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn force_refresh(&self) -> Result<(), UploadError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 2;
        *self.token.lock().unwrap() = format!("token-{}", n);
        Ok(())
    }
}

pub struct FakeResolver;

#[async_trait]
impl DestinationResolver for FakeResolver {
    async fn reserve_placeholder(&self, path: &str) -> Result<Placeholder, UploadError> {
        let (parent, leaf) = path.rsplit_once('/').unwrap_or(("", path));
        Ok(Placeholder {
            parent_id: format!("dir:{}", if parent.is_empty() { "/" } else { parent }),
            leaf_name: leaf.to_string(),
        })
    }
}

/// Producer of `len` repeated bytes, counting how often it is opened
pub struct RepeatProducer {
    pub byte: u8,
    pub len: u64,
    pub opens: AtomicU32,
}

impl RepeatProducer {
    pub fn new(byte: u8, len: u64) -> Self {
        Self {
            byte,
            len,
            opens: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SourceProducer for RepeatProducer {
    async fn open(&self) -> io::Result<BoxReader> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(tokio::io::repeat(self.byte).take(self.len)))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub control: Arc<FakeControlPlane>,
    pub store: Arc<FakeObjectStore>,
    pub credentials: Arc<StaticCredentials>,
    pub coordinator: UploadCoordinator,
}

impl Harness {
    pub fn new(options: ConfigOptions) -> Self {
        let config = Config::new(options).unwrap();
        let limiter = Arc::new(RateLimiter::new(&config.pacer));
        Self::with_limiter(config, limiter)
    }

    pub fn with_limiter(config: Arc<Config>, limiter: Arc<RateLimiter>) -> Self {
        let control = Arc::new(FakeControlPlane::default());
        let store = Arc::new(FakeObjectStore::default());
        let credentials = Arc::new(StaticCredentials::default());
        let coordinator = UploadCoordinator::new(
            config,
            limiter,
            control.clone(),
            store.clone(),
            credentials.clone(),
            Arc::new(FakeResolver),
        );
        Self {
            control,
            store,
            credentials,
            coordinator,
        }
    }

    pub fn unthrottled_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(&PacerSettings::unthrottled()))
    }
}
