//! Test utilities: mock implementations of the store and chain ports.

pub mod mocks;

pub use mocks::{MockChainClient, MockConfig, MockTipStore};
