//! Billing session ledger
//!
//! Maps logical trip handles onto at most one billed session per session
//! type and keeps the billing backend in step with them.
//!
//! # Concurrency
//!
//! All bookkeeping lives behind a single mutex. Public operations mutate it,
//! plan the backend calls the change requires into an ordered outbox, release
//! the lock and then drain the outbox. Only one caller drains at a time, so
//! the backend sees calls in exactly the order they were planned, and a
//! backend that calls back into the handler from inside a call cannot
//! deadlock: its work lands in the outbox and is drained by the same loop.
//!
//! Backend completions are watched on tracked tokio tasks and re-acquire the
//! lock to apply their effect. A completion whose epoch is no longer the
//! type's current one is stale and ignored.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use super::state::{ServiceCall, ServiceOp, SessionTypeState};
use crate::service::{BillingService, ServiceCompletion};
use crate::tracing::ServiceFailureExt;
use crate::types::{
    BillingConfig, BillingError, BillingServiceError, Result, SessionHandle, SessionState,
    SessionType,
};

static GLOBAL: OnceLock<BillingHandler> = OnceLock::new();

#[derive(Debug, Default)]
struct Ledger {
    /// Registered handles and the type each one references
    handles: HashMap<SessionHandle, SessionType>,
    types: HashMap<SessionType, SessionTypeState>,
    /// Planned calls not yet issued
    outbox: VecDeque<ServiceCall>,
    /// Someone is issuing calls from the outbox
    dispatching: bool,
}

impl Ledger {
    fn type_state(&mut self, session_type: SessionType) -> &mut SessionTypeState {
        self.types.entry(session_type).or_default()
    }

    fn status(&self, session_type: SessionType) -> SessionState {
        self.types
            .get(&session_type)
            .map(SessionTypeState::status)
            .unwrap_or_default()
    }

    fn reconcile(&mut self, session_type: SessionType) -> Option<ServiceOp> {
        let call = self.type_state(session_type).reconcile(session_type)?;
        tracing::debug!(
            session_type = %session_type,
            op = ?call.op,
            epoch = call.epoch,
            "Billing transition planned"
        );
        self.outbox.push_back(call);
        Some(call.op)
    }
}

#[derive(Debug)]
struct Shared {
    service: Arc<dyn BillingService>,
    config: BillingConfig,
    ledger: Mutex<Ledger>,
    /// Completion watchers, closed from the start so `wait` means "idle"
    tracker: TaskTracker,
    runtime: Handle,
}

/// Process-wide billing session ledger
///
/// Cheap to clone; clones share the same ledger. Lifecycle operations never
/// fail and never wait for the backend: they apply their effect optimistically
/// and reconcile with the backend in the background.
#[derive(Debug, Clone)]
pub struct BillingHandler {
    shared: Arc<Shared>,
}

impl BillingHandler {
    /// Create a handler driven by the current tokio runtime
    pub fn new(service: Arc<dyn BillingService>, config: BillingConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| BillingError::NoRuntime)?;
        Self::with_runtime(service, config, runtime)
    }

    /// Create a handler driven by the given runtime
    ///
    /// Fails with `ConfigError` if the configuration does not validate.
    pub fn with_runtime(
        service: Arc<dyn BillingService>,
        config: BillingConfig,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let tracker = TaskTracker::new();
        tracker.close();

        Ok(Self {
            shared: Arc::new(Shared {
                service,
                config,
                ledger: Mutex::new(Ledger::default()),
                tracker,
                runtime,
            }),
        })
    }

    /// Make this handler the process-wide instance
    pub fn install_global(handler: BillingHandler) -> Result<&'static BillingHandler> {
        GLOBAL
            .set(handler)
            .map_err(|_| BillingError::AlreadyInstalled)?;
        GLOBAL
            .get()
            .ok_or_else(|| BillingError::internal("global billing handler missing after install"))
    }

    /// The process-wide instance, if one was installed
    pub fn global() -> Option<&'static BillingHandler> {
        GLOBAL.get()
    }

    /// Configuration the handler was built with
    pub fn config(&self) -> &BillingConfig {
        &self.shared.config
    }

    /// Register `handle` as a running trip of `session_type`
    ///
    /// Begins the billed session if the type is stopped, resumes it if
    /// paused, and joins it if already running. A handle registered under a
    /// different type is moved.
    pub fn begin_billing_session(&self, session_type: SessionType, handle: SessionHandle) {
        {
            let mut ledger = self.shared.ledger();

            if let Some(previous) = ledger.handles.insert(handle, session_type) {
                if previous != session_type {
                    tracing::debug!(
                        handle = %handle,
                        from = %previous,
                        to = %session_type,
                        "Moving handle to another session type"
                    );
                    ledger.type_state(previous).remove(&handle);
                    ledger.reconcile(previous);
                }
            }

            let others_running = SessionType::PRIORITY
                .into_iter()
                .any(|other| other != session_type && ledger.status(other) == SessionState::Running);

            ledger.type_state(session_type).mark_running(handle);
            let planned = ledger.reconcile(session_type);

            if planned == Some(ServiceOp::Begin)
                && self.shared.config.billing_events_enabled
                && !others_running
            {
                let epoch = ledger.type_state(session_type).epoch();
                ledger
                    .outbox
                    .push_back(ServiceCall::billing_event(session_type, epoch));
            }

            tracing::debug!(
                handle = %handle,
                session_type = %session_type,
                planned = ?planned,
                "Billing session begun for handle"
            );
        }
        self.shared.flush();
    }

    /// Pause the trip behind `handle`
    ///
    /// The billed session pauses only when no sibling handle is running.
    /// Unknown handles are ignored.
    pub fn pause_billing_session(&self, handle: SessionHandle) {
        self.update_handle(handle, "pause", |state, handle| {
            state.mark_paused(handle);
        });
    }

    /// Resume the trip behind `handle`
    ///
    /// Resumes a paused billed session. Unknown handles are ignored.
    pub fn resume_billing_session(&self, handle: SessionHandle) {
        self.update_handle(handle, "resume", |state, handle| {
            state.mark_running(handle);
        });
    }

    /// Remove `handle`, stopping the billed session if it was the last one
    pub fn stop_billing_session(&self, handle: SessionHandle) {
        {
            let mut ledger = self.shared.ledger();
            let Some(session_type) = ledger.handles.remove(&handle) else {
                tracing::debug!(handle = %handle, "Stop for unknown handle ignored");
                return;
            };
            ledger.type_state(session_type).remove(&handle);
            let planned = ledger.reconcile(session_type);
            tracing::debug!(
                handle = %handle,
                session_type = %session_type,
                planned = ?planned,
                "Billing session stopped for handle"
            );
        }
        self.shared.flush();
    }

    /// Start a new billing period for `handle`'s type if it is running
    ///
    /// Does nothing when the type is paused or stopped, or the handle is
    /// unknown.
    pub fn begin_new_billing_session_if_running(&self, handle: SessionHandle) {
        {
            let mut ledger = self.shared.ledger();
            let Some(&session_type) = ledger.handles.get(&handle) else {
                tracing::debug!(handle = %handle, "Restart for unknown handle ignored");
                return;
            };
            match ledger.type_state(session_type).restart(session_type) {
                Some(call) => {
                    tracing::debug!(
                        handle = %handle,
                        session_type = %session_type,
                        epoch = call.epoch,
                        "Starting new billing period"
                    );
                    ledger.outbox.push_back(call);
                }
                None => {
                    tracing::debug!(
                        handle = %handle,
                        session_type = %session_type,
                        "Billed session not running, no new period"
                    );
                    return;
                }
            }
        }
        self.shared.flush();
    }

    /// Logical state of a handle, `Stopped` if unknown
    pub fn session_state(&self, handle: SessionHandle) -> SessionState {
        let mut ledger = self.shared.ledger();
        match ledger.handles.get(&handle).copied() {
            Some(session_type) => ledger.type_state(session_type).handle_state(&handle),
            None => SessionState::Stopped,
        }
    }

    /// Aggregate state of a type's billed session
    pub fn billing_status(&self, session_type: SessionType) -> SessionState {
        self.shared.ledger().status(session_type)
    }

    /// Number of handles referencing a type
    pub fn active_handles(&self, session_type: SessionType) -> usize {
        self.shared
            .ledger()
            .types
            .get(&session_type)
            .map_or(0, SessionTypeState::len)
    }

    /// The backend's own view of a type's session
    pub fn service_status(&self, session_type: SessionType) -> SessionState {
        self.shared.service.session_status(session_type)
    }

    /// SKU token of the highest-priority running type, empty if none runs
    pub fn service_sku_token(&self) -> String {
        let active = {
            let ledger = self.shared.ledger();
            SessionType::PRIORITY
                .into_iter()
                .find(|session_type| ledger.status(*session_type) == SessionState::Running)
        };
        active
            .map(|session_type| self.shared.service.session_token(session_type))
            .unwrap_or_default()
    }

    /// Access token of the billing backend
    pub fn service_access_token(&self) -> String {
        self.shared.service.access_token()
    }

    /// Replace the access token of the billing backend
    pub fn set_service_access_token(&self, token: impl Into<String>) {
        self.shared.service.set_access_token(token.into());
    }

    /// Wait until every outstanding backend completion has been reconciled
    ///
    /// Includes compensations scheduled while waiting. Calls held in flight
    /// by the backend keep this pending.
    pub async fn settle(&self) {
        self.shared.tracker.wait().await;
    }

    fn update_handle<F>(&self, handle: SessionHandle, action: &'static str, apply: F)
    where
        F: FnOnce(&mut SessionTypeState, SessionHandle),
    {
        {
            let mut ledger = self.shared.ledger();
            let Some(&session_type) = ledger.handles.get(&handle) else {
                tracing::debug!(handle = %handle, action, "Unknown handle ignored");
                return;
            };
            apply(ledger.type_state(session_type), handle);
            let planned = ledger.reconcile(session_type);
            tracing::debug!(
                handle = %handle,
                session_type = %session_type,
                action,
                planned = ?planned,
                "Handle updated"
            );
        }
        self.shared.flush();
    }
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue planned calls in order, unless another caller already is
    fn flush(self: &Arc<Self>) {
        loop {
            let calls = {
                let mut ledger = self.ledger();
                if ledger.dispatching || ledger.outbox.is_empty() {
                    return;
                }
                ledger.dispatching = true;
                std::mem::take(&mut ledger.outbox)
            };

            let mut drain = Drain {
                shared: &**self,
                calls,
            };
            while let Some(call) = drain.calls.pop_front() {
                self.dispatch(call);
            }
        }
    }

    fn dispatch(self: &Arc<Self>, call: ServiceCall) {
        let session_type = call.session_type;
        tracing::trace!(
            session_type = %session_type,
            op = ?call.op,
            epoch = call.epoch,
            "Issuing billing call"
        );

        let completion = match call.op {
            ServiceOp::Begin => Some(self.service.begin_session(session_type)),
            ServiceOp::Resume => Some(self.service.resume_session(session_type)),
            ServiceOp::BillingEvent => Some(self.service.trigger_billing_event()),
            ServiceOp::Pause => {
                self.service.pause_session(session_type);
                None
            }
            ServiceOp::Stop => {
                self.service.stop_session(session_type);
                None
            }
        };

        if let Some(completion) = completion {
            debug_assert!(call.op.is_fallible());
            self.watch(call, completion);
        }
    }

    fn watch(self: &Arc<Self>, call: ServiceCall, completion: ServiceCompletion) {
        let shared = Arc::clone(self);
        drop(self.tracker.spawn_on(
            async move {
                match completion.await {
                    Ok(error) => shared.on_service_error(call, error),
                    Err(_) => shared.on_service_confirmed(call),
                }
            },
            &self.runtime,
        ));
    }

    fn on_service_confirmed(&self, call: ServiceCall) {
        if call.op == ServiceOp::BillingEvent {
            return;
        }
        let confirmed = self
            .ledger()
            .type_state(call.session_type)
            .confirm(&call);
        tracing::trace!(
            session_type = %call.session_type,
            op = ?call.op,
            epoch = call.epoch,
            current = confirmed,
            "Billing call confirmed"
        );
    }

    fn on_service_error(self: &Arc<Self>, call: ServiceCall, error: BillingServiceError) {
        let session_type = Some(call.session_type);
        let op = call.op.as_str();

        if call.op == ServiceOp::BillingEvent {
            let action = if error.is_validation_failure() {
                "session keeps running"
            } else {
                "ignored"
            };
            error.trace_failure(session_type, op, action);
            return;
        }

        {
            let mut guard = self.ledger();
            let ledger = &mut *guard;
            let state = ledger.type_state(call.session_type);

            if !state.is_current(&call) {
                tracing::debug!(
                    session_type = %call.session_type,
                    op,
                    epoch = call.epoch,
                    current_epoch = state.epoch(),
                    kind = error.kind(),
                    "Stale billing failure ignored"
                );
                return;
            }

            if call.op == ServiceOp::Resume && error.is_resume_failure() {
                let compensation = state.compensate_resume(call.session_type);
                error.trace_failure(session_type, op, "beginning a fresh session");
                tracing::debug!(
                    session_type = %call.session_type,
                    epoch = compensation.epoch,
                    "Compensating begin planned"
                );
                ledger.outbox.push_back(compensation);
            } else {
                let dropped = state.invalidate();
                for handle in &dropped {
                    ledger.handles.remove(handle);
                }
                error.trace_failure(session_type, op, "handles dropped");
                tracing::debug!(
                    session_type = %call.session_type,
                    dropped_handles = dropped.len(),
                    "Billed session invalidated"
                );
            }
        }

        self.flush();
    }
}

/// One drain of the outbox
///
/// Dropping it clears `dispatching` and puts calls not yet issued back at
/// the front of the outbox, also when a backend call panics.
struct Drain<'a> {
    shared: &'a Shared,
    calls: VecDeque<ServiceCall>,
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        let mut ledger = self.shared.ledger();
        ledger.dispatching = false;
        if !self.calls.is_empty() {
            tracing::warn!(
                requeued = self.calls.len(),
                "Billing dispatch interrupted, calls requeued"
            );
        }
        while let Some(call) = self.calls.pop_back() {
            ledger.outbox.push_front(call);
        }
    }
}
