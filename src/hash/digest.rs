//! SHA-1 content digests used by the dedup protocol

use std::fmt;

use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::source::{short_read, ReplayableSource};
use crate::error::UploadError;

/// Bytes covered by the prefix hash
pub const PREFIX_HASH_LEN: u64 = 128 * 1024;

const BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

/// 160-bit SHA-1 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Digest([u8; 20]);

impl Sha1Digest {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    fn from_hasher(hasher: Sha1) -> Self {
        Self(hasher.finalize().into())
    }

    /// Uppercase hex, as protocol request fields expect
    pub fn to_upper_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Lowercase hex, as stored metadata expects
    pub fn to_lower_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Case-insensitive comparison against a remote-reported hex digest
    pub fn matches_hex(&self, other: &str) -> bool {
        self.to_lower_hex().eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lower_hex())
    }
}

impl fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Digest({})", self.to_lower_hex())
    }
}

/// Inclusive byte range, written `start-end` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Result<Self, UploadError> {
        if end < start {
            return Err(UploadError::ProtocolViolation(format!(
                "byte range {}-{} ends before it starts",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a `start-end` challenge range such as `0-131071`
    pub fn parse(value: &str) -> Result<Self, UploadError> {
        let invalid = || UploadError::ProtocolViolation(format!("malformed byte range '{}'", value));
        let (start, end) = value.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse::<u64>().map_err(|_| invalid())?;
        let end = end.trim().parse::<u64>().map_err(|_| invalid())?;
        Self::new(start, end)
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Full-content and prefix digests of one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashDigestSet {
    pub full: Sha1Digest,
    pub prefix: Sha1Digest,
}

/// Computes digests from a replayable source of known size
pub struct HashDigestCalculator<'a> {
    source: &'a ReplayableSource,
    size: u64,
    cancel: CancellationToken,
    digests: Option<HashDigestSet>,
}

impl<'a> HashDigestCalculator<'a> {
    pub fn new(source: &'a ReplayableSource, size: u64) -> Self {
        Self {
            source,
            size,
            cancel: CancellationToken::new(),
            digests: None,
        }
    }

    /// Abort long hashing passes when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Full and prefix digests, computed together in one pass and cached
    pub async fn digest_set(&mut self) -> Result<HashDigestSet, UploadError> {
        if let Some(digests) = self.digests {
            return Ok(digests);
        }
        let digests = self.hash_pass().await?;
        self.digests = Some(digests);
        Ok(digests)
    }

    pub async fn full_hash(&mut self) -> Result<Sha1Digest, UploadError> {
        Ok(self.digest_set().await?.full)
    }

    /// Hash of the first 128 KiB (or the whole payload if smaller)
    pub async fn prefix_hash(&mut self) -> Result<Sha1Digest, UploadError> {
        if let Some(digests) = self.digests {
            return Ok(digests.prefix);
        }
        let len = self.size.min(PREFIX_HASH_LEN);
        let bytes = self.source.read_range(0, len).await?;
        Ok(Sha1Digest::of(&bytes))
    }

    /// Hash of exactly the bytes in `range`, which must lie within the declared size
    pub async fn range_hash(&self, range: ByteRange) -> Result<Sha1Digest, UploadError> {
        if range.end >= self.size {
            return Err(UploadError::ProtocolViolation(format!(
                "challenge range {} exceeds declared size {}",
                range, self.size
            )));
        }

        let want = range.len();
        let mut reader = self.source.open_at(range.start).await?.take(want);
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; BUFFER_SIZE.min(want as usize)];
        let mut total: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        if total != want {
            return Err(short_read(range.start, want));
        }
        debug!("Computed range hash over {} ({} bytes)", range, total);
        Ok(Sha1Digest::from_hasher(hasher))
    }

    async fn hash_pass(&self) -> Result<HashDigestSet, UploadError> {
        let mut reader = self.source.open().await?;
        let mut full = Sha1::new();
        let mut prefix = Sha1::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            let chunk = &buffer[..read];
            full.update(chunk);
            if total < PREFIX_HASH_LEN {
                let take = (PREFIX_HASH_LEN - total).min(read as u64) as usize;
                prefix.update(&chunk[..take]);
            }
            total += read as u64;
            if total > self.size {
                break;
            }
        }

        if total > self.size {
            return Err(UploadError::Integrity(format!(
                "source produced more than the declared {} bytes",
                self.size
            )));
        }
        if total < self.size {
            return Err(UploadError::Integrity(format!(
                "declared size {} but source produced {} bytes",
                self.size, total
            )));
        }

        let digests = HashDigestSet {
            full: Sha1Digest::from_hasher(full),
            prefix: Sha1Digest::from_hasher(prefix),
        };
        debug!(
            "Hashed {} bytes: full={} prefix={}",
            total, digests.full, digests.prefix
        );
        Ok(digests)
    }
}
