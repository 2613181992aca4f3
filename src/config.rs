//! Configuration module - upload thresholds, pacing and retry settings

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::pacer::{Category, PacerSettings};
use crate::retry::RetryPolicy;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Strategy selection mode; exactly one is active per engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadMode {
    /// Attempt dedup whenever size is known, then single-shot below the
    /// cutoff and chunked at or above it
    #[default]
    Standard,
    /// Fail with `DedupMiss` instead of transferring bytes
    DedupOnly,
    /// Skip hashing below `nohash_size`; dedup first above it
    FastUpload,
    /// Never hash; single-shot below the cutoff, chunked above
    TransferOnly,
}

impl UploadMode {
    /// Parse a mode name, falling back to `Standard` for unknown input
    pub fn from_str_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "dedup-only" | "rapid-only" | "only-hash" => Self::DedupOnly,
            "fast" | "fast-upload" => Self::FastUpload,
            "transfer-only" | "no-dedup" => Self::TransferOnly,
            _ => Self::Standard,
        }
    }
}

impl std::fmt::Display for UploadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::DedupOnly => write!(f, "dedup-only"),
            Self::FastUpload => write!(f, "fast-upload"),
            Self::TransferOnly => write!(f, "transfer-only"),
        }
    }
}

/// Optional configuration parameters for Config::new()
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub mode: Option<UploadMode>,
    pub upload_cutoff: Option<u64>,
    pub nohash_size: Option<u64>,
    pub min_chunk_size: Option<u64>,
    pub max_chunk_size: Option<u64>,
    pub max_chunk_count: Option<u64>,
    pub hash_memory_threshold: Option<u64>,
    pub listing_delay: Option<Duration>,
    pub upload_init_delay: Option<Duration>,
    pub download_link_delay: Option<Duration>,
    pub mutation_delay: Option<Duration>,
    pub bulk_transfer_delay: Option<Duration>,
    pub pacer_max_delay: Option<Duration>,
    pub decay_constant: Option<u32>,
    pub attack_constant: Option<u32>,
    pub retry_max_attempts: Option<u32>,
    pub retry_max_elapsed: Option<Duration>,
    pub retry_base_delay: Option<Duration>,
    pub retry_max_backoff: Option<Duration>,
    pub throttle_delay: Option<Duration>,
    pub chunk_attempts: Option<u32>,
    pub max_sign_rounds: Option<u32>,
    pub request_timeout: Option<Duration>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: UploadMode,
    /// Sizes below this go single-shot, at or above go chunked
    pub upload_cutoff: u64,
    /// FastUpload skips hashing below this size
    pub nohash_size: u64,
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub max_chunk_count: u64,
    /// Non-replayable streams up to this size are buffered in memory, larger ones spooled to disk
    pub hash_memory_threshold: u64,
    pub pacer: PacerSettings,
    pub retry: RetryPolicy,
    /// Attempts per chunk upload
    pub chunk_attempts: u32,
    /// Secondary-auth rounds before dedup gives up
    pub max_sign_rounds: u32,
    /// Per-request timeout for the HTTP control plane
    pub request_timeout: Duration,
}

impl Config {
    /// Create a new Config, applying defaults for unset options
    pub fn new(options: ConfigOptions) -> Result<Arc<Self>> {
        let defaults = PacerSettings::default();
        let mut pacer = defaults.clone();
        for (category, value) in [
            (Category::Listing, options.listing_delay),
            (Category::UploadInit, options.upload_init_delay),
            (Category::DownloadLink, options.download_link_delay),
            (Category::Mutation, options.mutation_delay),
            (Category::BulkTransfer, options.bulk_transfer_delay),
        ] {
            if let Some(delay) = value {
                pacer = pacer.with_min_delay(category, delay);
            }
        }
        pacer.max_delay = options.pacer_max_delay.unwrap_or(defaults.max_delay);
        pacer.decay_constant = options.decay_constant.unwrap_or(defaults.decay_constant);
        pacer.attack_constant = options.attack_constant.unwrap_or(defaults.attack_constant);

        let base_retry = RetryPolicy::default();
        let retry = base_retry
            .with_max_attempts(options.retry_max_attempts.unwrap_or(base_retry.max_attempts))
            .with_max_elapsed(options.retry_max_elapsed.unwrap_or(base_retry.max_elapsed))
            .with_base_delay(options.retry_base_delay.unwrap_or(base_retry.base_delay))
            .with_max_backoff(options.retry_max_backoff.unwrap_or(base_retry.max_backoff))
            .with_throttle_delay(options.throttle_delay.unwrap_or(base_retry.throttle_delay));

        let config = Self {
            mode: options.mode.unwrap_or_default(),
            upload_cutoff: options.upload_cutoff.unwrap_or(50 * MIB),
            nohash_size: options.nohash_size.unwrap_or(100 * MIB),
            min_chunk_size: options.min_chunk_size.unwrap_or(5 * MIB),
            max_chunk_size: options.max_chunk_size.unwrap_or(5 * GIB),
            max_chunk_count: options.max_chunk_count.unwrap_or(10_000),
            hash_memory_threshold: options.hash_memory_threshold.unwrap_or(10 * MIB),
            pacer,
            retry,
            chunk_attempts: options.chunk_attempts.unwrap_or(3),
            max_sign_rounds: options.max_sign_rounds.unwrap_or(3),
            request_timeout: options.request_timeout.unwrap_or(Duration::from_secs(60)),
        };
        config.validate()?;
        Ok(Arc::new(config))
    }

    fn validate(&self) -> Result<()> {
        if self.min_chunk_size == 0 {
            return Err(anyhow!("min_chunk_size must be greater than zero"));
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(anyhow!(
                "min_chunk_size ({}) exceeds max_chunk_size ({})",
                self.min_chunk_size,
                self.max_chunk_size
            ));
        }
        if self.max_chunk_count == 0 {
            return Err(anyhow!("max_chunk_count must be greater than zero"));
        }
        if self.max_chunk_count > u32::MAX as u64 {
            return Err(anyhow!("max_chunk_count cannot exceed {}", u32::MAX));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry max_attempts must be at least 1"));
        }
        if self.chunk_attempts == 0 {
            return Err(anyhow!("chunk_attempts must be at least 1"));
        }
        if let Some(category) = Category::ALL
            .into_iter()
            .find(|c| self.pacer.min_delay(*c) > self.pacer.max_delay)
        {
            return Err(anyhow!(
                "pacer max_delay ({:?}) is below the minimum delay for {} ({:?})",
                self.pacer.max_delay,
                category,
                self.pacer.min_delay(category)
            ));
        }
        Ok(())
    }
}

/// Chunk size for a payload of `size` bytes, before clipping to the configured bounds
pub fn chunk_size_for(size: u64) -> u64 {
    if size < 128 * MIB {
        // Small payloads: keep parts light so retries are cheap
        16 * MIB
    } else if size < 256 * MIB {
        32 * MIB
    } else if size < GIB {
        64 * MIB
    } else if size < 4 * GIB {
        128 * MIB
    } else if size < 16 * GIB {
        256 * MIB
    } else {
        // Very large payloads: maximize throughput per part
        512 * MIB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new(ConfigOptions::default()).unwrap();
        assert_eq!(config.mode, UploadMode::Standard);
        assert_eq!(config.upload_cutoff, 50 * MIB);
        assert_eq!(config.min_chunk_size, 5 * MIB);
        assert_eq!(config.max_chunk_count, 10_000);
        assert_eq!(config.chunk_attempts, 3);
        assert_eq!(
            config.pacer.min_delay(Category::UploadInit),
            Duration::from_millis(500)
        );
        assert_eq!(config.pacer.min_delay(Category::BulkTransfer), Duration::ZERO);
    }

    #[test]
    fn test_chunk_table_monotonic() {
        let sizes = [0, 100 * MIB, 200 * MIB, 300 * MIB, 2 * GIB, 8 * GIB, 20 * GIB];
        let chunks: Vec<u64> = sizes.iter().map(|s| chunk_size_for(*s)).collect();
        assert!(chunks.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(chunk_size_for(300 * MIB), 64 * MIB);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(UploadMode::from_str_lossy("dedup_only"), UploadMode::DedupOnly);
        assert_eq!(UploadMode::from_str_lossy("FAST"), UploadMode::FastUpload);
        assert_eq!(UploadMode::from_str_lossy("transfer-only"), UploadMode::TransferOnly);
        assert_eq!(UploadMode::from_str_lossy("whatever"), UploadMode::Standard);
    }

    #[test]
    fn test_rejects_inverted_chunk_bounds() {
        let result = Config::new(ConfigOptions {
            min_chunk_size: Some(10 * MIB),
            max_chunk_size: Some(MIB),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_max_delay_below_minimum() {
        let result = Config::new(ConfigOptions {
            upload_init_delay: Some(Duration::from_secs(5)),
            pacer_max_delay: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
