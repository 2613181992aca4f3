//! Per-category call pacing
//!
//! Keeps each category of outbound call under its own adaptive minimum
//! spacing: multiplicative increase on backpressure, geometric decay back
//! toward the configured minimum on success.

mod limiter;
mod outcome;

pub use limiter::{PacerSettings, RateLimiter};
pub use outcome::{Category, Outcome};
