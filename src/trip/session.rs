//! Trip lifecycle on top of the billing ledger
//!
//! A `TripSession` is one logical trip: it owns a fresh handle, begins
//! billing when created and stops it when finished or dropped.

use super::policy::{RouteChangePolicy, RouteUpdate};
use crate::billing::BillingHandler;
use crate::types::{Coordinate, SessionHandle, SessionState, SessionType};

/// One trip registered with the billing ledger
#[derive(Debug)]
pub struct TripSession {
    handler: BillingHandler,
    handle: SessionHandle,
    session_type: SessionType,
    policy: RouteChangePolicy,
    /// Origin first, destination last
    waypoints: Vec<Coordinate>,
    finished: bool,
}

impl TripSession {
    /// Start a trip using the handler's configured route policy
    pub fn start(handler: &BillingHandler, session_type: SessionType) -> Self {
        let policy = RouteChangePolicy::from_config(handler.config());
        Self::start_with_policy(handler, session_type, policy)
    }

    /// Start a trip with an explicit route policy
    pub fn start_with_policy(
        handler: &BillingHandler,
        session_type: SessionType,
        policy: RouteChangePolicy,
    ) -> Self {
        let handle = SessionHandle::new();
        handler.begin_billing_session(session_type, handle);
        tracing::debug!(handle = %handle, session_type = %session_type, "Trip started");

        Self {
            handler: handler.clone(),
            handle,
            session_type,
            policy,
            waypoints: Vec::new(),
            finished: false,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    /// Current billing state of this trip
    pub fn state(&self) -> SessionState {
        self.handler.session_state(self.handle)
    }

    /// Waypoints of the current route, origin first
    pub fn waypoints(&self) -> &[Coordinate] {
        &self.waypoints
    }

    pub fn pause(&self) {
        self.handler.pause_billing_session(self.handle);
    }

    pub fn resume(&self) {
        self.handler.resume_billing_session(self.handle);
    }

    /// Replace the route
    ///
    /// A route that diverges beyond the policy's tolerance starts a new
    /// billing period.
    pub fn update_route(&mut self, waypoints: Vec<Coordinate>) -> RouteUpdate {
        let update = if self.waypoints.is_empty() {
            RouteUpdate::Initial
        } else if self.policy.requires_new_session(&self.waypoints, &waypoints) {
            self.handler.begin_new_billing_session_if_running(self.handle);
            RouteUpdate::NewSession
        } else {
            RouteUpdate::Unchanged
        };

        tracing::debug!(
            handle = %self.handle,
            waypoints = waypoints.len(),
            update = ?update,
            "Trip route updated"
        );
        self.waypoints = waypoints;
        update
    }

    /// Arrive at the next waypoint
    ///
    /// Reaching an intermediate waypoint starts a new billing period for the
    /// next leg and returns true. Reaching the destination returns false.
    pub fn advance_leg(&mut self) -> bool {
        if self.waypoints.len() <= 2 {
            return false;
        }
        self.waypoints.remove(0);
        self.handler.begin_new_billing_session_if_running(self.handle);
        true
    }

    /// End the trip
    pub fn finish(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.handler.stop_billing_session(self.handle);
            tracing::debug!(handle = %self.handle, "Trip finished");
        }
    }
}

impl Drop for TripSession {
    fn drop(&mut self) {
        self.stop();
    }
}
