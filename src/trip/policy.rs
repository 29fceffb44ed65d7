//! Route change policy
//!
//! Decides whether a new route differs enough from the current one that
//! the trip should be billed as a new session.

use crate::types::{BillingConfig, Coordinate};

/// Outcome of applying a route update to a trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// First route of the trip
    Initial,
    /// Waypoints within tolerance, billing untouched
    Unchanged,
    /// Route diverged, a new billing period was requested
    NewSession,
}

/// Waypoint tolerance for route updates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteChangePolicy {
    tolerance_meters: f64,
}

impl Default for RouteChangePolicy {
    fn default() -> Self {
        Self::from_config(&BillingConfig::default())
    }
}

impl RouteChangePolicy {
    /// Create a policy with an explicit tolerance
    pub fn new(tolerance_meters: f64) -> Self {
        Self { tolerance_meters }
    }

    /// Create a policy from configuration
    pub fn from_config(config: &BillingConfig) -> Self {
        Self::new(config.route_change_tolerance_meters)
    }

    pub fn tolerance_meters(&self) -> f64 {
        self.tolerance_meters
    }

    /// Whether moving from `current` to `proposed` needs a new billing session
    ///
    /// Both lists start at the origin, which is the traveller's position and
    /// ignored. The remaining waypoints must match in count and each lie
    /// within the tolerance of its counterpart.
    pub fn requires_new_session(&self, current: &[Coordinate], proposed: &[Coordinate]) -> bool {
        let current = current.get(1..).unwrap_or_default();
        let proposed = proposed.get(1..).unwrap_or_default();

        if current.len() != proposed.len() {
            return true;
        }

        current
            .iter()
            .zip(proposed)
            .any(|(a, b)| a.distance_to(b) > self.tolerance_meters)
    }
}
