//! Application layer containing business logic and shared state.

pub mod admission;
pub mod executor;
pub mod reconciler;
pub mod service;
pub mod state;

pub use admission::{Admission, AdmissionConfig, AdmissionController, RejectReason};
pub use executor::{ExecutorConfig, SettlementExecutor, spawn_executor};
pub use reconciler::{ReconcilerConfig, ReconciliationWorker, spawn_reconciler};
pub use service::TipService;
pub use state::AppState;
