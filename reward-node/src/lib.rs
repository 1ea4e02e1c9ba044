#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

//! Reward round engine: winner selection, payout, reconciliation and
//! announcement, plus the node's ambient plumbing (config, metrics, HTTP).

pub mod announce;
pub mod config;
pub mod error;
pub mod feeds;
pub mod http_server;
pub mod instrumented;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod payout;
pub mod recon;
pub mod retry;

pub use announce::{PayoutTemplate, Templates};
pub use error::{EngineError, ErrorClass};
pub use orchestrator::{CycleOutcome, CycleReport, RoundOrchestrator};
pub use payout::{EngineSettings, PayoutCoordinator, RoundResult};
pub use recon::{PendingReconciler, ReconcileReport};
pub use retry::RetryPolicy;
