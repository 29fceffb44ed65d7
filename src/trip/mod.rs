//! Trip lifecycle helpers for callers of the billing ledger
//!
//! This module handles:
//! - Starting, pausing, resuming and finishing trips
//! - Route updates and the waypoint tolerance deciding new billing periods
//! - New billing periods on leg transitions

mod policy;
mod session;

pub use policy::{RouteChangePolicy, RouteUpdate};
pub use session::TripSession;
