//! Database store implementations.

pub mod postgres;

pub use postgres::{PostgresConfig, PostgresStore};
