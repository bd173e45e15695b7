//! Core delivery-handling domain.
//!
//! Everything between "a webhook delivery arrived" and "here is the report":
//! endpoint resolution, IP filtering, replay detection, signature verification
//! and sequential action execution. Infrastructure crates implement the ports
//! defined here ([`Action`], [`ActionFactory`], [`UpstreamRanges`]); they never
//! add validation rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no I/O. Action
//! execution is awaited through the [`Action`] trait; the HTTP server, the
//! configuration files and the upstream address list all live elsewhere.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`EndpointName`, `ActionName`, `DeliveryId`) |
//! | [`types`] | Chain results, the report envelope, `Timestamp` |
//! | [`errors`] | Rejection, configuration and action-failure types |
//! | [`registry`] | Endpoint registry and its construction ports |
//! | [`access`] | IP allow-list |
//! | [`replay`] | Duplicate-delivery guard |
//! | [`signature`] | HMAC-SHA1 verification |
//! | [`settings`] | Action settings and the defaults overlay |
//! | [`chain`] | The `Action` trait and the short-circuiting chain driver |
//! | [`delivery`] | The end-to-end `DeliveryPipeline` |

pub mod access;
pub mod chain;
pub mod delivery;
pub mod errors;
pub mod identifiers;
pub mod registry;
pub mod replay;
pub mod settings;
pub mod signature;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use access::{AccessFilter, LOOPBACK_RANGES};
pub use chain::{Action, ActionChain};
pub use delivery::{Delivery, DeliveryOutcome, DeliveryPipeline, PING_EVENT, PUSH_EVENT};
pub use errors::{ActionFailure, ConfigurationError, RequestRejected};
pub use identifiers::{ActionName, DeliveryId, EndpointName};
pub use registry::{
    ActionBuildError, ActionFactory, EndpointConfig, EndpointDocument, EndpointRegistry,
    EndpointSource, RegistryBuild, RegistryError, UpstreamRanges, UpstreamUnavailable,
};
pub use replay::{
    Admission, ReplayGuard, ZeroReplayWindow, DEFAULT_REPLAY_CAPACITY, DEFAULT_REPLAY_MAX_AGE,
};
pub use settings::{overlay, ActionSettings, SHORTHAND_KEY};
pub use signature::{SignatureError, SignatureVerifier, SIGNATURE_ALGORITHM};
pub use types::{
    ActionOutcome, ActionResult, ChainReport, DeliveryReport, ReportedFailure, ReportedOutput,
    Timestamp,
};
