//! Public types for the navigation billing ledger
//!
//! This module contains the shared types used across the crate.

mod config;
mod error;
mod geo;
mod session;

pub use config::{BillingConfig, DEFAULT_ROUTE_CHANGE_TOLERANCE_METERS};
pub use error::{BillingError, BillingServiceError, ErrorCode, Result};
pub use geo::Coordinate;
pub use session::{SessionHandle, SessionState, SessionType};
