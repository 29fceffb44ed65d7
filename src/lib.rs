//! Navigation billing ledger
//!
//! Tracks the billable navigation sessions of an SDK. Any number of logical
//! trips, identified by opaque handles, share at most one billed session per
//! session type. The ledger keeps an external billing backend in step with
//! them: it begins, pauses, resumes and stops the backend's session as
//! trips come and go, and reconciles the backend's late failures.
//!
//! ## Features
//!
//! - Reference-counted billed sessions per session type
//! - Optimistic state updates with asynchronous failure reconciliation
//! - Resume-failure compensation and stale completion detection
//! - A process-wide shared ledger
//! - Trip helpers for route changes and multi-leg journeys
//! - A recording backend and a scripted replay tool
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nav_billing::{BillingConfig, BillingHandler, RecordingBillingService, SessionType};
//! use nav_billing::trip::TripSession;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = Arc::new(RecordingBillingService::new());
//!     let handler = BillingHandler::new(service, BillingConfig::from_env()?)?;
//!
//!     let trip = TripSession::start(&handler, SessionType::ActiveGuidance);
//!     trip.pause();
//!     trip.resume();
//!     trip.finish();
//!
//!     handler.settle().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `NAV_BILLING_EVENTS_ENABLED`: send a billing event when billing starts (default: true)
//! - `NAV_BILLING_ROUTE_TOLERANCE_METERS`: waypoint drift allowed before a route
//!   change starts a new billing session (default: 50)
//! - `RUST_LOG`: log filter for the replay binary, overrides `-v`/`-q`

pub mod billing;
pub mod cli;
pub mod replay;
pub mod runner;
pub mod service;
pub mod tracing;
pub mod trip;
pub mod types;

pub use billing::BillingHandler;
pub use cli::Cli;
pub use runner::run_replay_with_cli;
pub use service::{
    BillingBackend, BillingService, ErrorCallback, RecordingBillingService, ServiceCompletion,
    SpawnedBackend,
};
pub use types::{
    BillingConfig, BillingError, BillingServiceError, Result, SessionHandle, SessionState,
    SessionType,
};
