//! Error tracing extensions
//!
//! Structured logging for crate errors and for failures the billing backend
//! reports on individual calls.

use std::error::Error as StdError;

use crate::types::{BillingError, BillingServiceError, SessionType};

/// Log a crate error with its code, classification and source chain
pub trait ErrorTraceExt {
    fn trace_error(&self) -> &Self;
}

impl ErrorTraceExt for BillingError {
    fn trace_error(&self) -> &Self {
        let code = self.error_code();
        let chain: Vec<String> = std::iter::successors(self.source(), |&source| source.source())
            .map(ToString::to_string)
            .collect();

        tracing::error!(
            error = %self,
            error_code = code.code(),
            error_code_name = ?code,
            client_error = self.is_client_error(),
            chain = ?chain,
            "Billing error"
        );
        self
    }
}

/// Log a failure reported by the billing backend
pub trait ServiceFailureExt {
    /// `action` names what happens next, e.g. "handles dropped"
    fn trace_failure(&self, session_type: Option<SessionType>, op: &str, action: &str) -> &Self;
}

impl ServiceFailureExt for BillingServiceError {
    fn trace_failure(&self, session_type: Option<SessionType>, op: &str, action: &str) -> &Self {
        let detail = match self {
            Self::Unavailable(reason) => Some(reason.as_str()),
            _ => None,
        };

        tracing::warn!(
            session_type = session_type.map(SessionType::as_str),
            op,
            kind = self.kind(),
            detail,
            action,
            "Billing backend call failed"
        );
        self
    }
}
