//! Content hashing and replayable byte sources

mod digest;
mod source;

pub use digest::{ByteRange, HashDigestCalculator, HashDigestSet, Sha1Digest, PREFIX_HASH_LEN};
pub use source::{BoxReader, ReplayableSource, SourceProducer, UploadSource};
