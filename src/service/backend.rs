//! Async billing backends
//!
//! Real backends talk to the network, so their calls are async. The ledger
//! issues calls synchronously and in order, so `SpawnedBackend` bridges the
//! two:
//! - Calls are queued on an unbounded channel (never blocks)
//! - One background task runs them against the backend in order
//! - Failures go back through the call's error channel

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::{BillingService, ErrorCallback, ServiceCompletion, error_channel};
use crate::tracing::ServiceFailureExt;
use crate::types::{BillingServiceError, SessionState, SessionType};

/// Async billing backend
///
/// Status and token reads are expected to come from state the backend
/// keeps locally, so they stay synchronous.
#[async_trait]
pub trait BillingBackend: Send + Sync + 'static {
    async fn begin_session(&self, session_type: SessionType) -> Result<(), BillingServiceError>;

    async fn pause_session(&self, session_type: SessionType) -> Result<(), BillingServiceError>;

    async fn resume_session(&self, session_type: SessionType) -> Result<(), BillingServiceError>;

    async fn stop_session(&self, session_type: SessionType) -> Result<(), BillingServiceError>;

    async fn trigger_billing_event(&self) -> Result<(), BillingServiceError>;

    fn session_status(&self, session_type: SessionType) -> SessionState;

    fn session_token(&self, session_type: SessionType) -> String;

    fn access_token(&self) -> String;

    fn set_access_token(&self, token: String);
}

#[derive(Debug, Clone, Copy)]
enum BackendOp {
    Begin(SessionType),
    Pause(SessionType),
    Resume(SessionType),
    Stop(SessionType),
    BillingEvent,
}

impl BackendOp {
    fn session_type(self) -> Option<SessionType> {
        match self {
            Self::Begin(t) | Self::Pause(t) | Self::Resume(t) | Self::Stop(t) => Some(t),
            Self::BillingEvent => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Begin(_) => "begin",
            Self::Pause(_) => "pause",
            Self::Resume(_) => "resume",
            Self::Stop(_) => "stop",
            Self::BillingEvent => "billingEvent",
        }
    }
}

#[derive(Debug)]
struct BackendRequest {
    op: BackendOp,
    callback: Option<ErrorCallback>,
}

/// Runs an async backend behind the synchronous `BillingService` surface
pub struct SpawnedBackend<B> {
    backend: Arc<B>,
    requests: mpsc::UnboundedSender<BackendRequest>,
}

impl<B> fmt::Debug for SpawnedBackend<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedBackend")
            .field("worker_alive", &!self.requests.is_closed())
            .finish_non_exhaustive()
    }
}

impl<B: BillingBackend> SpawnedBackend<B> {
    /// Start the worker on the current runtime
    ///
    /// Panics outside a tokio runtime, like `tokio::spawn`.
    pub fn spawn(backend: B) -> Self {
        Self::spawn_on(backend, &Handle::current())
    }

    /// Start the worker on the given runtime
    pub fn spawn_on(backend: B, runtime: &Handle) -> Self {
        let backend = Arc::new(backend);
        let (tx, rx) = mpsc::unbounded_channel();

        let worker_backend = Arc::clone(&backend);
        runtime.spawn(async move {
            run_worker(worker_backend, rx).await;
        });

        Self {
            backend,
            requests: tx,
        }
    }

    /// The wrapped backend
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn submit(&self, op: BackendOp) {
        if let Err(err) = self.requests.send(BackendRequest { op, callback: None }) {
            tracing::warn!(op = ?err.0.op, "Billing worker stopped, call dropped");
        }
    }

    fn submit_fallible(&self, op: BackendOp) -> ServiceCompletion {
        let (callback, completion) = error_channel();
        let request = BackendRequest {
            op,
            callback: Some(callback),
        };
        if let Err(err) = self.requests.send(request) {
            let request = err.0;
            tracing::warn!(op = ?request.op, "Billing worker stopped, failing call");
            if let Some(callback) = request.callback {
                callback.fail(BillingServiceError::unavailable("billing worker stopped"));
            }
        }
        completion
    }
}

async fn run_worker<B: BillingBackend>(
    backend: Arc<B>,
    mut requests: mpsc::UnboundedReceiver<BackendRequest>,
) {
    while let Some(request) = requests.recv().await {
        let result = match request.op {
            BackendOp::Begin(session_type) => backend.begin_session(session_type).await,
            BackendOp::Pause(session_type) => backend.pause_session(session_type).await,
            BackendOp::Resume(session_type) => backend.resume_session(session_type).await,
            BackendOp::Stop(session_type) => backend.stop_session(session_type).await,
            BackendOp::BillingEvent => backend.trigger_billing_event().await,
        };

        match (result, request.callback) {
            (Ok(()), Some(callback)) => callback.succeed(),
            (Ok(()), None) => {}
            (Err(error), Some(callback)) => {
                tracing::debug!(op = ?request.op, error = %error, "Billing backend call failed");
                callback.fail(error);
            }
            (Err(error), None) => {
                error.trace_failure(request.op.session_type(), request.op.name(), "not reported");
            }
        }
    }

    tracing::debug!("Billing worker exiting");
}

impl<B: BillingBackend> BillingService for SpawnedBackend<B> {
    fn begin_session(&self, session_type: SessionType) -> ServiceCompletion {
        self.submit_fallible(BackendOp::Begin(session_type))
    }

    fn pause_session(&self, session_type: SessionType) {
        self.submit(BackendOp::Pause(session_type));
    }

    fn resume_session(&self, session_type: SessionType) -> ServiceCompletion {
        self.submit_fallible(BackendOp::Resume(session_type))
    }

    fn stop_session(&self, session_type: SessionType) {
        self.submit(BackendOp::Stop(session_type));
    }

    fn trigger_billing_event(&self) -> ServiceCompletion {
        self.submit_fallible(BackendOp::BillingEvent)
    }

    fn session_status(&self, session_type: SessionType) -> SessionState {
        self.backend.session_status(session_type)
    }

    fn session_token(&self, session_type: SessionType) -> String {
        self.backend.session_token(session_type)
    }

    fn access_token(&self) -> String {
        self.backend.access_token()
    }

    fn set_access_token(&self, token: String) {
        self.backend.set_access_token(token);
    }
}
