//! Top-level error types for the delivery pipeline.
//!
//! [`RequestRejected`] covers every reason a delivery is turned away before
//! its action chain runs; each variant maps to an HTTP-style status.
//! [`ConfigurationError`] describes one endpoint source that could not be
//! used. [`ActionFailure`] is not an error towards the caller at all: it is
//! captured as data in the chain report.
//!
//! Component-level errors (signature parsing, registry construction) are
//! defined in their respective modules.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{DeliveryId, SignatureError};

// ---------------------------------------------------------------------------
// Request rejection
// ---------------------------------------------------------------------------

/// A delivery was refused. Never retried; surfaced to the caller with
/// [`RequestRejected::status`].
#[derive(Debug, Error)]
pub enum RequestRejected {
    /// No endpoint is registered under the (normalised) name.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The remote address is outside the endpoint's allow-list.
    #[error("IP not in whitelist: {0}")]
    IpNotWhitelisted(IpAddr),

    /// The delivery carried no identifier header.
    #[error("Rejected event with missing UUID.")]
    MissingDeliveryId,

    /// The delivery identifier is not UUID-shaped.
    #[error("Rejected event with malformed UUID: {0}")]
    MalformedDeliveryId(String),

    /// The identifier was already seen within the replay window.
    #[error("Rejected event with duplicate UUID {0}")]
    DuplicateDelivery(DeliveryId),

    /// The payload signature is missing, malformed or wrong.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Only `POST` deliveries are processed.
    #[error("Method Not Allowed. Only POST requests are allowed.")]
    MethodNotAllowed,

    /// Neither a `ping` nor a `push` event.
    #[error("Only push events are supported.")]
    UnsupportedEvent(Option<String>),

    /// The body is not valid JSON.
    #[error("Malformed JSON input.")]
    MalformedPayload,
}

impl RequestRejected {
    /// HTTP-style status code for this rejection.
    pub fn status(&self) -> u16 {
        match self {
            Self::EndpointNotFound(_) => 404,
            Self::IpNotWhitelisted(_) | Self::DuplicateDelivery(_) => 401,
            Self::MissingDeliveryId | Self::MalformedDeliveryId(_) | Self::Signature(_) => 403,
            Self::MethodNotAllowed => 405,
            Self::UnsupportedEvent(_) | Self::MalformedPayload => 400,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One endpoint source could not be turned into an endpoint.
///
/// Logged and skipped; registry construction continues with the remaining
/// sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{origin}: {message}")]
pub struct ConfigurationError {
    /// Where the source came from (usually a file path).
    pub origin: String,
    /// Description of the problem.
    pub message: String,
}

impl ConfigurationError {
    /// Creates a configuration error for `origin`.
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Action failure
// ---------------------------------------------------------------------------

/// An action in a chain failed.
///
/// Carried in the [`crate::ChainReport`]; it halts that chain only.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ActionFailure {
    /// Human-readable failure description.
    pub message: String,
    /// Structured data the action attached (e.g. captured process output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ActionFailure {
    /// A failure with no structured output.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: None,
        }
    }

    /// A failure carrying structured output.
    pub fn with_output(message: impl Into<String>, output: Value) -> Self {
        Self {
            message: message.into(),
            output: Some(output),
        }
    }
}
