//! Errors reported by the SDK.

use thiserror::Error;
use tide::StatusCode;

/// Errors returned by [`Dataplane`](crate::Dataplane) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No data flow with the requested ID is stored.
    #[error("DataFlow {id} not found")]
    NotFound { id: String },

    /// The hook for a step was never configured.
    #[error("{hook} is not implemented")]
    NotImplemented { hook: &'static str },

    /// Application logic in a hook failed.
    #[error("{hook} failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The control plane could not be reached.
    #[error("HTTP error: {message}")]
    Http { message: String },

    /// Registration was refused by the control plane.
    #[error("dataplane not registered, control-plane responded with {status}: {body}")]
    NotRegistered { status: u16, body: String },

    /// The control plane answered a notification with a non-success status.
    #[error("control-plane responded to {action} with {status}")]
    ControlPlaneRejected { action: String, status: u16 },
}

impl Error {
    /// The HTTP status used when this error is reported through the signaling API.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::NotImplemented { .. } => StatusCode::NotImplemented,
            _ => StatusCode::InternalServerError,
        }
    }
}

impl From<surf::Error> for Error {
    fn from(err: surf::Error) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}
