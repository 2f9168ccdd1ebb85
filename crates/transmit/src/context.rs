//! Connection context handed to authorization callbacks and lifecycle hooks

use parking_lot::Mutex;
use std::collections::HashMap;

/// How an authorization attempt ended when it did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The callback rejected the subscription
    Forbidden,
    /// The callback failed while deciding
    InternalError,
}

/// Request-scoped context for one client interaction
///
/// Carries the client-declared `uid`, the request headers and a cell where
/// authorization can record a forbidden or internal-error outcome for the
/// transport to turn into a response.
#[derive(Debug, Default)]
pub struct TransmitContext {
    /// Client-declared identity
    pub uid: Option<String>,
    /// Request headers, names lower-cased
    pub headers: HashMap<String, String>,
    /// Client IP address (from X-Forwarded-For or direct connection)
    pub client_ip: Option<String>,
    outcome: Mutex<Option<AuthOutcome>>,
}

impl TransmitContext {
    /// Create a context for a client uid
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            ..Default::default()
        }
    }

    /// Create a context with no declared uid
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Add a header (name is lower-cased)
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the client IP
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// The declared uid, if any
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Get the Bearer token from the Authorization header
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
    }

    /// Mark the current request as forbidden
    pub fn forbid(&self) {
        *self.outcome.lock() = Some(AuthOutcome::Forbidden);
    }

    /// Mark the current request as failed with an internal error
    pub fn fail(&self) {
        *self.outcome.lock() = Some(AuthOutcome::InternalError);
    }

    /// The recorded authorization outcome, if any
    pub fn outcome(&self) -> Option<AuthOutcome> {
        *self.outcome.lock()
    }
}
