//! Billing session ledger
//!
//! This module handles:
//! - Registering trip handles per session type
//! - Sharing one billed session between handles of a type
//! - Optimistic begin/pause/resume/stop against the billing backend
//! - Reconciling late failures (compensation, stale completions)

mod handler;
mod state;

#[cfg(test)]
mod scenarios;

pub use handler::BillingHandler;
