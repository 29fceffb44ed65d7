//! Scripted lifecycle replays
//!
//! Replays a JSON script of trip lifecycle steps against a fresh ledger
//! backed by the recording backend and reports what the backend saw.
//!
//! ```json
//! {
//!   "steps": [
//!     { "op": "begin", "trip": "commute", "sessionType": "activeGuidance" },
//!     { "op": "script", "call": "resume", "outcome": { "fail": "resumeFailed" } },
//!     { "op": "pause", "trip": "commute" },
//!     { "op": "resume", "trip": "commute" },
//!     { "op": "settle" },
//!     { "op": "stop", "trip": "commute" }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::billing::BillingHandler;
use crate::service::{CallOutcome, RecordingBillingService, ScriptedCall, ServiceEvent};
use crate::types::{
    BillingConfig, BillingError, BillingServiceError, Result, SessionHandle, SessionState,
    SessionType,
};

/// A replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub steps: Vec<ReplayStep>,
}

/// One step of a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ReplayStep {
    /// Begin billing for a trip, creating its handle on first use
    Begin {
        trip: String,
        #[serde(rename = "sessionType")]
        session_type: SessionType,
    },
    Pause {
        trip: String,
    },
    Resume {
        trip: String,
    },
    Stop {
        trip: String,
    },
    BeginNewIfRunning {
        trip: String,
    },
    /// Queue the outcome of the backend's next call of a kind
    Script {
        call: ScriptedCall,
        outcome: CallOutcome,
    },
    /// Complete held calls, failing them if an error is given
    ReleaseHeld {
        #[serde(default)]
        error: Option<BillingServiceError>,
    },
    /// Wait for outstanding completions
    Settle,
}

/// Final state of one trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripReport {
    pub handle: SessionHandle,
    pub state: SessionState,
}

/// Final state of one session type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTypeReport {
    /// Ledger's aggregate
    pub status: SessionState,
    /// Backend's own view
    pub service_status: SessionState,
    pub handles: usize,
}

/// Outcome of a replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub events: Vec<ServiceEvent>,
    pub billing_events: usize,
    pub trips: BTreeMap<String, TripReport>,
    pub session_types: BTreeMap<SessionType, SessionTypeReport>,
    pub sku_token: String,
    /// Calls still held when the script ended
    pub held_calls: usize,
}

impl ReplayScript {
    /// Parse a script from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a script from a file
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }
}

/// A ledger and recording backend to replay scripts against
#[derive(Debug)]
pub struct Replay {
    service: Arc<RecordingBillingService>,
    handler: BillingHandler,
    trips: HashMap<String, SessionHandle>,
}

impl Replay {
    /// Create a replay on the current runtime
    pub fn new(config: BillingConfig) -> Result<Self> {
        let service = Arc::new(RecordingBillingService::new());
        let handler = BillingHandler::new(service.clone(), config)?;
        Ok(Self {
            service,
            handler,
            trips: HashMap::new(),
        })
    }

    /// The recording backend, for seeding tokens before a run
    pub fn service(&self) -> &Arc<RecordingBillingService> {
        &self.service
    }

    /// Run every step and report the result
    pub async fn run(mut self, script: &ReplayScript) -> Result<ReplayReport> {
        for (index, step) in script.steps.iter().enumerate() {
            tracing::debug!(index, step = ?step, "Replaying step");
            self.apply(step).await?;
        }

        if self.service.held_calls() == 0 {
            self.handler.settle().await;
        } else {
            tracing::warn!(
                held_calls = self.service.held_calls(),
                "Script ended with held calls, not settling"
            );
        }

        Ok(self.report())
    }

    async fn apply(&mut self, step: &ReplayStep) -> Result<()> {
        match step {
            ReplayStep::Begin { trip, session_type } => {
                let handle = *self.trips.entry(trip.clone()).or_default();
                self.handler.begin_billing_session(*session_type, handle);
            }
            ReplayStep::Pause { trip } => {
                let handle = self.handle(trip)?;
                self.handler.pause_billing_session(handle);
            }
            ReplayStep::Resume { trip } => {
                let handle = self.handle(trip)?;
                self.handler.resume_billing_session(handle);
            }
            ReplayStep::Stop { trip } => {
                let handle = self.handle(trip)?;
                self.handler.stop_billing_session(handle);
            }
            ReplayStep::BeginNewIfRunning { trip } => {
                let handle = self.handle(trip)?;
                self.handler.begin_new_billing_session_if_running(handle);
            }
            ReplayStep::Script { call, outcome } => {
                self.service.script(*call, outcome.clone());
            }
            ReplayStep::ReleaseHeld { error } => {
                let released = self.service.release_held(error.clone());
                tracing::debug!(released, "Released held calls");
            }
            ReplayStep::Settle => {
                let held = self.service.held_calls();
                if held > 0 {
                    return Err(BillingError::invalid_script(format!(
                        "settle would wait forever on {held} held call(s); release them first"
                    )));
                }
                self.handler.settle().await;
            }
        }
        Ok(())
    }

    fn handle(&self, trip: &str) -> Result<SessionHandle> {
        self.trips
            .get(trip)
            .copied()
            .ok_or_else(|| BillingError::unknown_trip(trip))
    }

    fn report(&self) -> ReplayReport {
        let trips = self
            .trips
            .iter()
            .map(|(label, handle)| {
                (
                    label.clone(),
                    TripReport {
                        handle: *handle,
                        state: self.handler.session_state(*handle),
                    },
                )
            })
            .collect();

        let session_types = SessionType::PRIORITY
            .into_iter()
            .map(|session_type| {
                (
                    session_type,
                    SessionTypeReport {
                        status: self.handler.billing_status(session_type),
                        service_status: self.handler.service_status(session_type),
                        handles: self.handler.active_handles(session_type),
                    },
                )
            })
            .collect();

        ReplayReport {
            events: self.service.events(),
            billing_events: self.service.billing_events(),
            trips,
            session_types,
            sku_token: self.handler.service_sku_token(),
            held_calls: self.service.held_calls(),
        }
    }
}
