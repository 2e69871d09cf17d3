//! Tipcast relayer: converts social interaction events into batched
//! on-chain micro-tips.
//!
//! The pipeline runs webhook verification, canonical event normalization,
//! idempotent deduplication, admission control (spending limits plus an
//! allowance-aware blocklist), batched on-chain execution, and background
//! reconciliation. See the `domain`, `app`, `infra`, and `api` layers.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
