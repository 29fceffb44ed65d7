//! Billing backend interface
//!
//! This module handles:
//! - The `BillingService` capability surface consumed by the ledger
//! - Single-fire error channels for fallible calls
//! - Driving an async backend from a background worker
//! - An in-memory recording backend

mod backend;
mod recording;

use std::fmt;

use tokio::sync::oneshot;

use crate::types::{BillingServiceError, SessionState, SessionType};

pub use backend::{BillingBackend, SpawnedBackend};
pub use recording::{CallOutcome, RecordingBillingService, ScriptedCall, ServiceEvent};

/// Completion of a fallible backend call
///
/// Resolves to `Ok(error)` if the backend reported a failure. A closed
/// channel (`Err(RecvError)`) means the call succeeded.
pub type ServiceCompletion = oneshot::Receiver<BillingServiceError>;

/// Backend side of a fallible call's error channel
///
/// Consumed by `fail`, so an error is delivered at most once. Dropping it
/// without failing reports success.
#[derive(Debug)]
pub struct ErrorCallback(oneshot::Sender<BillingServiceError>);

impl ErrorCallback {
    /// Report a failure to the caller
    pub fn fail(self, error: BillingServiceError) {
        // Receiver gone means nobody is reconciling this call anymore
        drop(self.0.send(error));
    }

    /// Report success
    pub fn succeed(self) {}
}

/// Create a linked error callback and completion
pub fn error_channel() -> (ErrorCallback, ServiceCompletion) {
    let (tx, rx) = oneshot::channel();
    (ErrorCallback(tx), rx)
}

/// Capability surface of the platform billing backend
///
/// Calls return immediately; fallible ones hand back a `ServiceCompletion`
/// that fires later on an unspecified task.
pub trait BillingService: Send + Sync + fmt::Debug {
    /// Begin (or replace) the billed session of a type
    fn begin_session(&self, session_type: SessionType) -> ServiceCompletion;

    /// Pause the billed session of a type
    fn pause_session(&self, session_type: SessionType);

    /// Resume a paused billed session
    fn resume_session(&self, session_type: SessionType) -> ServiceCompletion;

    /// Stop the billed session of a type
    fn stop_session(&self, session_type: SessionType);

    /// Emit a usage metering event
    fn trigger_billing_event(&self) -> ServiceCompletion;

    /// Backend's view of a type's session
    fn session_status(&self, session_type: SessionType) -> SessionState;

    /// SKU token of a type's session
    fn session_token(&self, session_type: SessionType) -> String;

    /// Current access token
    fn access_token(&self) -> String;

    /// Replace the access token
    fn set_access_token(&self, token: String);
}
