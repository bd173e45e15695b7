//! Webhook HTTP surface.
//!
//! Binds the [`pipeline::DeliveryPipeline`] to HTTP with `axum`:
//!
//! - `GET`/`POST /:endpoint`: headers `X-GitHub-Delivery`, `X-Hub-Signature`
//!   and `X-GitHub-Event` plus the raw body are handed to the pipeline
//!   unchanged. A `ping` answers `{"msg": "pong"}`; a `push` answers the chain
//!   report envelope.
//! - Rejections answer `{"status": s, "message": m}` with status `s` in debug
//!   mode, and a generic 500 otherwise. The real reason is always logged.
//! - Behind a reverse proxy, the client address is taken from the last
//!   `X-Forwarded-For` entry unless [`ListenerConfig::trust_forwarded`] is off.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Routing, header extraction, address resolution and
//! response rendering live here. The [`pipeline`] crate sees only
//! [`pipeline::Delivery`].

mod server;

pub use server::{
    router, serve, ListenerConfig, DELIVERY_HEADER, EVENT_HEADER, FORWARDED_FOR_HEADER,
    SERVER_STRING, SIGNATURE_HEADER,
};
