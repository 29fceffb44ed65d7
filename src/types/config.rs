//! Billing configuration from environment variables

use super::error::{BillingError, Result};

/// Default distance in meters under which a moved waypoint counts as unchanged
pub const DEFAULT_ROUTE_CHANGE_TOLERANCE_METERS: f64 = 50.0;

const EVENTS_ENABLED_VAR: &str = "NAV_BILLING_EVENTS_ENABLED";
const ROUTE_TOLERANCE_VAR: &str = "NAV_BILLING_ROUTE_TOLERANCE_METERS";

/// Billing ledger configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    /// Emit a metering event when the first billed session starts
    /// Environment variable: `NAV_BILLING_EVENTS_ENABLED`
    pub billing_events_enabled: bool,

    /// Waypoint drift tolerated by a route update before a new billing
    /// session is started
    /// Environment variable: `NAV_BILLING_ROUTE_TOLERANCE_METERS`
    pub route_change_tolerance_meters: f64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            billing_events_enabled: true,
            route_change_tolerance_meters: DEFAULT_ROUTE_CHANGE_TOLERANCE_METERS,
        }
    }
}

impl BillingConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults; set but malformed ones are an error.
    /// - `NAV_BILLING_EVENTS_ENABLED`: `true`/`false`/`1`/`0`
    /// - `NAV_BILLING_ROUTE_TOLERANCE_METERS`: non-negative number
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(EVENTS_ENABLED_VAR) {
            config.billing_events_enabled = parse_bool(EVENTS_ENABLED_VAR, &raw)?;
        }
        if let Ok(raw) = std::env::var(ROUTE_TOLERANCE_VAR) {
            config.route_change_tolerance_meters = parse_tolerance(ROUTE_TOLERANCE_VAR, &raw)?;
        }

        Ok(config)
    }

    /// Enable or disable metering events
    pub fn with_billing_events(mut self, enabled: bool) -> Self {
        self.billing_events_enabled = enabled;
        self
    }

    /// Set the route change tolerance
    pub fn with_route_change_tolerance(mut self, meters: f64) -> Self {
        self.route_change_tolerance_meters = meters;
        self
    }

    /// Check the configuration for values no caller could mean
    pub fn validate(&self) -> Result<()> {
        let meters = self.route_change_tolerance_meters;
        if !meters.is_finite() || meters < 0.0 {
            return Err(BillingError::config_error(format!(
                "route change tolerance must be a non-negative number of meters, got {meters}"
            )));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BillingError::invalid_value(key, raw)),
    }
}

fn parse_tolerance(key: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| BillingError::invalid_value(key, raw))
}
