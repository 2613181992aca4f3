//! Instant-upload (hash dedup) negotiation

mod negotiator;

pub use negotiator::{advance, DedupNegotiation, DedupOutcome, HashDedupNegotiator, Transition};
