//! Per-type billing bookkeeping
//!
//! A `SessionTypeState` holds the handles referencing one session type and
//! the state of the single billed session behind them. Every transition of
//! the billed session yields at most one `ServiceCall`, stamped with the
//! type's epoch so late completions can be recognized.

use std::collections::HashSet;

use crate::types::{SessionHandle, SessionState, SessionType};

/// Outbound backend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceOp {
    Begin,
    Pause,
    Resume,
    Stop,
    BillingEvent,
}

impl ServiceOp {
    /// Whether the backend reports back on this operation
    pub(crate) fn is_fallible(self) -> bool {
        matches!(self, Self::Begin | Self::Resume | Self::BillingEvent)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::BillingEvent => "billingEvent",
        }
    }
}

/// A planned backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ServiceCall {
    pub(crate) session_type: SessionType,
    pub(crate) op: ServiceOp,
    pub(crate) epoch: u64,
}

impl ServiceCall {
    /// Metering event raised on behalf of a type
    pub(crate) fn billing_event(session_type: SessionType, epoch: u64) -> Self {
        Self {
            session_type,
            op: ServiceOp::BillingEvent,
            epoch,
        }
    }
}

/// Aggregate of one session type
///
/// `status` alone decides which calls `reconcile` plans, so a begin arriving
/// while another is in flight finds the type already running and joins it.
/// `pending` only records the begin or resume still awaiting its completion,
/// for diagnostics; it never gates a transition.
#[derive(Debug, Default)]
pub(crate) struct SessionTypeState {
    /// State of the billed session, optimistic while a call is in flight
    status: SessionState,
    running: HashSet<SessionHandle>,
    paused: HashSet<SessionHandle>,
    /// Bumped on every transition of the billed session
    epoch: u64,
    /// Begin or resume awaiting its completion, informational only
    pending: Option<ServiceCall>,
}

impl SessionTypeState {
    pub(crate) fn status(&self) -> SessionState {
        self.status
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn pending(&self) -> Option<ServiceCall> {
        self.pending
    }

    pub(crate) fn len(&self) -> usize {
        self.running.len() + self.paused.len()
    }

    pub(crate) fn handle_state(&self, handle: &SessionHandle) -> SessionState {
        if self.running.contains(handle) {
            SessionState::Running
        } else if self.paused.contains(handle) {
            SessionState::Paused
        } else {
            SessionState::Stopped
        }
    }

    /// State the billed session should be in given its handles
    pub(crate) fn desired(&self) -> SessionState {
        if !self.running.is_empty() {
            SessionState::Running
        } else if !self.paused.is_empty() {
            SessionState::Paused
        } else {
            SessionState::Stopped
        }
    }

    /// Register a handle as running, returns false if it already was
    pub(crate) fn mark_running(&mut self, handle: SessionHandle) -> bool {
        self.paused.remove(&handle);
        self.running.insert(handle)
    }

    /// Move a registered handle to paused, returns false if nothing changed
    pub(crate) fn mark_paused(&mut self, handle: SessionHandle) -> bool {
        if self.running.remove(&handle) {
            self.paused.insert(handle);
            true
        } else {
            false
        }
    }

    pub(crate) fn remove(&mut self, handle: &SessionHandle) -> bool {
        self.running.remove(handle) | self.paused.remove(handle)
    }

    /// Bring the billed session in line with the handles
    ///
    /// Applies the new state optimistically and returns the call that makes
    /// the backend follow, if any.
    pub(crate) fn reconcile(&mut self, session_type: SessionType) -> Option<ServiceCall> {
        let desired = self.desired();
        let op = match (self.status, desired) {
            (SessionState::Stopped, SessionState::Running) => ServiceOp::Begin,
            (SessionState::Running, SessionState::Paused) => ServiceOp::Pause,
            (SessionState::Paused, SessionState::Running) => ServiceOp::Resume,
            (SessionState::Running | SessionState::Paused, SessionState::Stopped) => ServiceOp::Stop,
            (current, desired) => {
                if current != desired {
                    tracing::debug!(
                        session_type = %session_type,
                        current = %current,
                        desired = %desired,
                        "No billing transition between states"
                    );
                }
                return None;
            }
        };

        self.status = desired;
        Some(self.issue(session_type, op))
    }

    /// Replace a running billed session with a fresh one
    pub(crate) fn restart(&mut self, session_type: SessionType) -> Option<ServiceCall> {
        (self.status == SessionState::Running).then(|| self.issue(session_type, ServiceOp::Begin))
    }

    /// Begin anew after the backend refused to resume
    ///
    /// Every handle of the type becomes running again.
    pub(crate) fn compensate_resume(&mut self, session_type: SessionType) -> ServiceCall {
        self.running.extend(self.paused.drain());
        self.status = SessionState::Running;
        self.issue(session_type, ServiceOp::Begin)
    }

    /// Forget the billed session and every handle on it
    pub(crate) fn invalidate(&mut self) -> Vec<SessionHandle> {
        self.status = SessionState::Stopped;
        self.epoch += 1;
        self.pending = None;
        self.running.drain().chain(self.paused.drain()).collect()
    }

    /// Whether a completion still describes the current billed session
    pub(crate) fn is_current(&self, call: &ServiceCall) -> bool {
        call.epoch == self.epoch
    }

    /// Record a confirmed call
    pub(crate) fn confirm(&mut self, call: &ServiceCall) -> bool {
        if self.pending.as_ref() == Some(call) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    fn issue(&mut self, session_type: SessionType, op: ServiceOp) -> ServiceCall {
        self.epoch += 1;
        let call = ServiceCall {
            session_type,
            op,
            epoch: self.epoch,
        };
        self.pending = matches!(op, ServiceOp::Begin | ServiceOp::Resume).then_some(call);
        call
    }
}
