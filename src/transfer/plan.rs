//! Chunk sizing for multipart transfers

use crate::config::{chunk_size_for, Config};
use crate::error::UploadError;

/// Chunk size and count for one chunked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    /// `None` when the payload size is unknown up front
    pub chunk_count: Option<u64>,
    pub total_size: Option<u64>,
    /// Most parts the session may hold
    pub max_chunks: u64,
}

impl ChunkPlan {
    /// Plan for a payload of `size` bytes.
    ///
    /// The size table value is clipped to the configured chunk bounds, then
    /// raised if needed so the payload fits in `max_chunk_count` parts.
    /// Unknown sizes use the largest bucket.
    pub fn for_size(size: Option<u64>, config: &Config) -> Result<Self, UploadError> {
        let base = chunk_size_for(size.unwrap_or(u64::MAX));
        let mut chunk_size = base.clamp(config.min_chunk_size, config.max_chunk_size);

        let chunk_count = match size {
            Some(total) => {
                let needed = total.div_ceil(config.max_chunk_count);
                if needed > chunk_size {
                    chunk_size = needed;
                }
                if chunk_size > config.max_chunk_size {
                    return Err(UploadError::InvalidRequest(format!(
                        "payload of {} bytes does not fit in {} chunks of at most {} bytes",
                        total, config.max_chunk_count, config.max_chunk_size
                    )));
                }
                Some(total.div_ceil(chunk_size).max(1))
            }
            None => None,
        };

        Ok(Self {
            chunk_size,
            chunk_count,
            total_size: size,
            max_chunks: config.max_chunk_count,
        })
    }

    pub fn chunk_offset(&self, index: u64) -> u64 {
        index * self.chunk_size
    }

    /// Length of chunk `index`; the last chunk of a known size may be short
    pub fn chunk_len(&self, index: u64) -> u64 {
        match self.total_size {
            Some(total) => total
                .saturating_sub(self.chunk_offset(index))
                .min(self.chunk_size),
            None => self.chunk_size,
        }
    }
}
