//! Typed errors for the resource API, the poller, and the orchestrators.
//!
//! The split matters to callers: [`ApiError::NotFound`] is an expected
//! signal (a lookup found nothing) while every other variant is fatal to the
//! running orchestration. Application plumbing (config, CLI) uses `anyhow`.

use std::time::Duration;

use thiserror::Error;

/// Error returned by a single cloud API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The targeted resource does not exist.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The service answered with an error other than not-found
    /// (permissions, throttling, validation, conflicts).
    #[error("{service} returned {code} (HTTP {status}): {message}")]
    Service {
        service: String,
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced an HTTP response.
    #[error("request to {service} failed: {source}")]
    Transport {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {service}: {message}")]
    Decode { service: String, message: String },
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn service(
        service: impl Into<String>,
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApiError::Service {
            service: service.into(),
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn decode(service: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Decode {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

/// Outcome of a poll loop that did not reach its target.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("{operation} did not complete within {}s (waited {}s)", timeout.as_secs(), elapsed.as_secs())]
    Timeout {
        operation: String,
        timeout: Duration,
        elapsed: Duration,
    },

    /// The resource reached a state from which the target is unreachable.
    #[error("{operation} reached unexpected state {state}")]
    UnexpectedState { operation: String, state: String },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Failure of a provisioning or deprovisioning run.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    /// A create call succeeded at the HTTP level but the service attached
    /// failure reasons to the new resource.
    #[error("{kind} '{name}' reported failure: {}", reasons.join("; "))]
    CreateFailed {
        kind: String,
        name: String,
        reasons: Vec<String>,
    },

    #[error("collection '{name}' has no endpoint yet")]
    MissingEndpoint { name: String },

    #[error("collection '{name}' is not visible after creation")]
    CollectionVanished { name: String },
}

impl OrchestrationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, OrchestrationError::Wait(WaitError::Timeout { .. }))
    }
}
