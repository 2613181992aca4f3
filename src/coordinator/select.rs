//! Strategy selection from mode and declared size

use crate::config::{Config, UploadMode};
use crate::error::UploadError;
use crate::types::Strategy;

/// How bytes move when no instant upload happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    /// Single request carrying exactly this many bytes
    Direct(u64),
    Chunked,
}

impl TransferPlan {
    pub fn strategy(self) -> Strategy {
        match self {
            Self::Direct(_) => Strategy::Direct,
            Self::Chunked => Strategy::Chunked,
        }
    }

    fn by_cutoff(size: u64, config: &Config) -> Self {
        if size < config.upload_cutoff {
            Self::Direct(size)
        } else {
            Self::Chunked
        }
    }
}

/// Selected path for one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPlan {
    /// Attempt instant upload first
    pub dedup: bool,
    /// Transfer used when dedup is skipped, misses or fails; `None` forbids transferring
    pub transfer: Option<TransferPlan>,
}

impl StrategyPlan {
    /// Strategy in effect when the upload starts
    pub fn initial(&self) -> Strategy {
        match (self.dedup, self.transfer) {
            (false, Some(transfer)) => transfer.strategy(),
            _ => Strategy::Dedup,
        }
    }
}

/// Pick the strategy for a payload of `size` bytes under `mode`
pub fn select(mode: UploadMode, size: Option<u64>, config: &Config) -> Result<StrategyPlan, UploadError> {
    let size = match size {
        Some(size) => size,
        None if mode == UploadMode::DedupOnly => {
            return Err(UploadError::InvalidRequest(
                "dedup-only mode requires a declared size".to_string(),
            ))
        }
        // Hashing needs a bounded read plan
        None => {
            return Ok(StrategyPlan {
                dedup: false,
                transfer: Some(TransferPlan::Chunked),
            })
        }
    };

    if size == 0 {
        return Ok(StrategyPlan {
            dedup: false,
            transfer: Some(TransferPlan::Direct(0)),
        });
    }

    let transfer = TransferPlan::by_cutoff(size, config);
    let plan = match mode {
        UploadMode::Standard => StrategyPlan {
            dedup: true,
            transfer: Some(transfer),
        },
        UploadMode::DedupOnly => StrategyPlan {
            dedup: true,
            transfer: None,
        },
        UploadMode::FastUpload => StrategyPlan {
            dedup: size >= config.nohash_size,
            transfer: Some(transfer),
        },
        UploadMode::TransferOnly => StrategyPlan {
            dedup: false,
            transfer: Some(transfer),
        },
    };
    Ok(plan)
}
