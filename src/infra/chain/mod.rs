//! Chain client implementations for the opaque payout service.

pub mod rpc;

pub use rpc::{RpcChainClient, RpcClientConfig};
