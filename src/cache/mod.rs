//! Versioned store of previously served responses.
//!
//! Entries are addressed by (generation, request key). Exactly one generation
//! is current at a time; the only eviction unit is deleting an entire
//! superseded generation, so staleness is bounded by version bumps rather
//! than by entry age.

mod store;

pub use store::{Generation, ResponseCache};
