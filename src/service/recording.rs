//! In-memory billing backend that records every call
//!
//! Session calls are recorded in issue order. Fallible calls follow a
//! per-call script of outcomes (succeed by default), and can be held until
//! the test releases them, which models a slow network round-trip.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BillingService, ErrorCallback, ServiceCompletion, error_channel};
use crate::types::{BillingServiceError, SessionState, SessionType};

/// A recorded session call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", content = "sessionType", rename_all = "camelCase")]
pub enum ServiceEvent {
    Begin(SessionType),
    Pause(SessionType),
    Resume(SessionType),
    Stop(SessionType),
}

/// Fallible calls whose outcome can be scripted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptedCall {
    Begin,
    Resume,
    BillingEvent,
}

/// Outcome of one scripted call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallOutcome {
    /// Complete successfully
    Succeed,
    /// Report the error
    Fail(BillingServiceError),
    /// Keep the call in flight until released
    Hold,
}

#[derive(Debug)]
struct HeldCall {
    call: ScriptedCall,
    session_type: Option<SessionType>,
    callback: ErrorCallback,
}

/// Billing backend that keeps everything in memory
#[derive(Debug)]
pub struct RecordingBillingService {
    events: Mutex<Vec<ServiceEvent>>,
    billing_events: AtomicUsize,
    statuses: DashMap<SessionType, SessionState>,
    tokens: DashMap<SessionType, String>,
    access_token: RwLock<String>,
    scripts: Mutex<HashMap<ScriptedCall, VecDeque<CallOutcome>>>,
    held: Mutex<Vec<HeldCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for RecordingBillingService {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBillingService {
    /// Create a backend with random SKU tokens and no access token
    pub fn new() -> Self {
        let tokens = DashMap::new();
        for session_type in SessionType::PRIORITY {
            tokens.insert(
                session_type,
                format!("{}-{}", session_type, Uuid::new_v4().simple()),
            );
        }

        Self {
            events: Mutex::new(Vec::new()),
            billing_events: AtomicUsize::new(0),
            statuses: DashMap::new(),
            tokens,
            access_token: RwLock::new(String::new()),
            scripts: Mutex::new(HashMap::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    /// Session calls recorded so far, in issue order
    pub fn events(&self) -> Vec<ServiceEvent> {
        lock(&self.events).clone()
    }

    /// Forget recorded calls
    pub fn clear_events(&self) {
        lock(&self.events).clear();
    }

    /// Number of metering events triggered
    pub fn billing_events(&self) -> usize {
        self.billing_events.load(Ordering::SeqCst)
    }

    /// Replace the SKU token returned for a type
    pub fn set_session_token(&self, session_type: SessionType, token: impl Into<String>) {
        self.tokens.insert(session_type, token.into());
    }

    /// Queue the outcome of the next unscripted call of this kind
    pub fn script(&self, call: ScriptedCall, outcome: CallOutcome) {
        lock(&self.scripts).entry(call).or_default().push_back(outcome);
    }

    /// Number of calls currently held in flight
    pub fn held_calls(&self) -> usize {
        lock(&self.held).len()
    }

    /// Complete every held call, failing them with `error` if given
    ///
    /// Returns the number of calls released.
    pub fn release_held(&self, error: Option<BillingServiceError>) -> usize {
        let held = std::mem::take(&mut *lock(&self.held));
        let released = held.len();
        for call in held {
            match &error {
                Some(error) => self.fail(call.call, call.session_type, call.callback, error.clone()),
                None => call.callback.succeed(),
            }
        }
        released
    }

    fn record(&self, event: ServiceEvent) {
        tracing::trace!(event = ?event, "Billing backend call recorded");
        lock(&self.events).push(event);
    }

    fn next_outcome(&self, call: ScriptedCall) -> CallOutcome {
        lock(&self.scripts)
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
            .unwrap_or(CallOutcome::Succeed)
    }

    fn complete(&self, call: ScriptedCall, session_type: Option<SessionType>) -> ServiceCompletion {
        let (callback, completion) = error_channel();
        match self.next_outcome(call) {
            CallOutcome::Succeed => callback.succeed(),
            CallOutcome::Fail(error) => self.fail(call, session_type, callback, error),
            CallOutcome::Hold => lock(&self.held).push(HeldCall {
                call,
                session_type,
                callback,
            }),
        }
        completion
    }

    fn fail(
        &self,
        call: ScriptedCall,
        session_type: Option<SessionType>,
        callback: ErrorCallback,
        error: BillingServiceError,
    ) {
        // A failed begin or resume leaves no usable session behind
        if let (ScriptedCall::Begin | ScriptedCall::Resume, Some(session_type)) = (call, session_type) {
            self.statuses.insert(session_type, SessionState::Stopped);
        }
        callback.fail(error);
    }
}

impl BillingService for RecordingBillingService {
    fn begin_session(&self, session_type: SessionType) -> ServiceCompletion {
        self.record(ServiceEvent::Begin(session_type));
        self.statuses.insert(session_type, SessionState::Running);
        self.complete(ScriptedCall::Begin, Some(session_type))
    }

    fn pause_session(&self, session_type: SessionType) {
        self.record(ServiceEvent::Pause(session_type));
        self.statuses.insert(session_type, SessionState::Paused);
    }

    fn resume_session(&self, session_type: SessionType) -> ServiceCompletion {
        self.record(ServiceEvent::Resume(session_type));
        self.statuses.insert(session_type, SessionState::Running);
        self.complete(ScriptedCall::Resume, Some(session_type))
    }

    fn stop_session(&self, session_type: SessionType) {
        self.record(ServiceEvent::Stop(session_type));
        self.statuses.insert(session_type, SessionState::Stopped);
    }

    fn trigger_billing_event(&self) -> ServiceCompletion {
        self.billing_events.fetch_add(1, Ordering::SeqCst);
        self.complete(ScriptedCall::BillingEvent, None)
    }

    fn session_status(&self, session_type: SessionType) -> SessionState {
        self.statuses
            .get(&session_type)
            .map(|status| *status)
            .unwrap_or_default()
    }

    fn session_token(&self, session_type: SessionType) -> String {
        self.tokens
            .get(&session_type)
            .map(|token| token.clone())
            .unwrap_or_default()
    }

    fn access_token(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_access_token(&self, token: String) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }
}
