//! The delivery pipeline.
//!
//! Every inbound delivery passes, in order: endpoint lookup, access filter,
//! identifier and replay check, signature, method and event check, payload
//! decoding, and finally the action chain. The first failing step rejects the
//! delivery. The access filter runs before anything reads the identifier.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::signature::verify_signature;
use crate::{
    Action, ActionChain, Admission, DeliveryId, DeliveryReport, EndpointRegistry, ReplayGuard,
    RequestRejected,
};

/// Event type answered with a pong.
pub const PING_EVENT: &str = "ping";

/// The only event type that runs the action chain.
pub const PUSH_EVENT: &str = "push";

/// One inbound delivery, as extracted by the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    /// Raw endpoint name from the request path.
    pub endpoint: &'a str,
    /// Request method (`POST` is the only one processed).
    pub method: &'a str,
    /// Address the request came from.
    pub remote_addr: IpAddr,
    /// Delivery identifier header, if present.
    pub delivery_id: Option<&'a str>,
    /// Signature header, if present.
    pub signature: Option<&'a str>,
    /// Event-type header, if present.
    pub event: Option<&'a str>,
    /// Exact request body bytes.
    pub body: &'a [u8],
}

/// What a delivery that passed validation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// A `ping` event; nothing was executed.
    Pong,
    /// A `push` event; the chain ran and this is its report.
    Report(DeliveryReport),
}

/// Validates deliveries and runs the matching endpoint's action chain.
///
/// Shared by all request tasks: the registry is read-only and the replay guard
/// synchronises internally.
#[derive(Debug)]
pub struct DeliveryPipeline<A> {
    registry: Arc<EndpointRegistry<A>>,
    replay: ReplayGuard,
}

impl<A: Action> DeliveryPipeline<A> {
    /// Creates a pipeline over `registry`.
    pub fn new(registry: impl Into<Arc<EndpointRegistry<A>>>, replay: ReplayGuard) -> Self {
        Self {
            registry: registry.into(),
            replay,
        }
    }

    /// The endpoint registry.
    pub fn registry(&self) -> &EndpointRegistry<A> {
        &self.registry
    }

    /// The replay guard.
    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    /// Processes one delivery.
    #[instrument(
        name = "delivery",
        skip_all,
        fields(
            endpoint = delivery.endpoint,
            remote = %delivery.remote_addr,
            guid = tracing::field::Empty
        )
    )]
    pub async fn process(
        &self,
        delivery: &Delivery<'_>,
    ) -> Result<DeliveryOutcome, RequestRejected> {
        let config = self.registry.resolve(delivery.endpoint)?;

        config.access().check(delivery.remote_addr)?;

        let raw_id = delivery
            .delivery_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(RequestRejected::MissingDeliveryId)?;
        let guid = DeliveryId::parse(raw_id)
            .ok_or_else(|| RequestRejected::MalformedDeliveryId(raw_id.to_string()))?;
        tracing::Span::current().record("guid", tracing::field::display(guid));

        if self.replay.admit(guid) == Admission::Duplicate {
            return Err(RequestRejected::DuplicateDelivery(guid));
        }

        verify_signature(config.verifier(), delivery.body, delivery.signature)?;

        if !delivery.method.eq_ignore_ascii_case("POST") {
            return Err(RequestRejected::MethodNotAllowed);
        }

        match delivery.event {
            Some(PING_EVENT) => {
                debug!("ping received");
                return Ok(DeliveryOutcome::Pong);
            }
            Some(PUSH_EVENT) => {}
            other => return Err(RequestRejected::UnsupportedEvent(other.map(String::from))),
        }

        let payload: Value =
            serde_json::from_slice(delivery.body).map_err(|_| RequestRejected::MalformedPayload)?;

        let chain = ActionChain::new(config.actions()).run(&payload).await;
        info!(
            executed = chain.len(),
            configured = config.actions().len(),
            failed = chain.is_failed(),
            "action chain finished"
        );

        Ok(DeliveryOutcome::Report(DeliveryReport::new(guid, &chain)))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ipnet::IpNet;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::{
        ActionBuildError, ActionFactory, ActionFailure, ActionName, ActionSettings,
        EndpointSource, SignatureError, SignatureVerifier, UpstreamRanges, UpstreamUnavailable,
    };

    /// Echoes the payload's `ref`, or fails when settings say so.
    struct Echo {
        fail: bool,
    }

    #[async_trait]
    impl Action for Echo {
        async fn execute(&self, payload: &Value) -> Result<Value, ActionFailure> {
            if self.fail {
                Err(ActionFailure::new("told to fail"))
            } else {
                Ok(payload["ref"].clone())
            }
        }
    }

    struct EchoFactory;

    impl ActionFactory for EchoFactory {
        type Action = Echo;

        fn build(&self, _: &ActionName, settings: ActionSettings) -> Result<Echo, ActionBuildError> {
            Ok(Echo {
                fail: settings.get("fail") == Some(&json!(true)),
            })
        }
    }

    struct NoUpstream;

    #[async_trait]
    impl UpstreamRanges for NoUpstream {
        async fn hook_ranges(&self) -> Result<Vec<IpNet>, UpstreamUnavailable> {
            Err(UpstreamUnavailable("not configured".into()))
        }
    }

    const SECRET: &str = "s3cret";
    const BODY: &[u8] = br#"{"ref":"refs/heads/main"}"#;

    async fn pipeline(replay: ReplayGuard) -> DeliveryPipeline<Echo> {
        let sources = vec![
            EndpointSource::new(
                "open.yml",
                serde_json::from_value(json!({
                    "endpoint": "myhook",
                    "do": [{"echo": {}}, {"echo": {"fail": true}}, {"echo": {}}]
                }))
                .unwrap(),
            ),
            EndpointSource::new(
                "locked.yml",
                serde_json::from_value(json!({
                    "endpoint": "locked",
                    "key": SECRET,
                    "ip-whitelist": ["10.0.0.0/8"],
                    "do": [{"echo": null}]
                }))
                .unwrap(),
            ),
        ];
        let built = EndpointRegistry::build(sources, &EchoFactory, &NoUpstream)
            .await
            .unwrap();
        DeliveryPipeline::new(built.registry, replay)
    }

    fn delivery<'a>(endpoint: &'a str, id: &'a str) -> Delivery<'a> {
        Delivery {
            endpoint,
            method: "POST",
            remote_addr: "127.0.0.1".parse().unwrap(),
            delivery_id: Some(id),
            signature: None,
            event: Some(PUSH_EVENT),
            body: BODY,
        }
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let pipeline = pipeline(ReplayGuard::disabled()).await;
        let id = new_id();
        let d = Delivery {
            event: Some(PING_EVENT),
            body: b"not json",
            ..delivery("/myhook/", &id)
        };
        assert_eq!(pipeline.process(&d).await.unwrap(), DeliveryOutcome::Pong);
    }

    #[tokio::test]
    async fn test_push_runs_chain_until_failure() {
        let pipeline = pipeline(ReplayGuard::disabled()).await;
        let id = new_id();

        let DeliveryOutcome::Report(report) =
            pipeline.process(&delivery("myhook", &id)).await.unwrap()
        else {
            panic!("expected a report");
        };

        assert_eq!(report.status, 200);
        assert_eq!(report.guid.to_string(), id);
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].output, json!("refs/heads/main"));
        assert_eq!(report.error.unwrap().message, "told to fail");
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let pipeline = pipeline(ReplayGuard::disabled()).await;
        let id = new_id();
        let err = pipeline.process(&delivery("nope", &id)).await.unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn test_ip_checked_before_identifier() {
        let pipeline = pipeline(ReplayGuard::default()).await;
        let d = Delivery {
            remote_addr: "192.168.1.1".parse().unwrap(),
            delivery_id: None,
            ..delivery("locked", "")
        };
        let err = pipeline.process(&d).await.unwrap_err();
        assert!(matches!(err, RequestRejected::IpNotWhitelisted(_)));
        assert!(pipeline.replay_guard().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_identifier() {
        let pipeline = pipeline(ReplayGuard::disabled()).await;

        let missing = Delivery {
            delivery_id: None,
            ..delivery("myhook", "")
        };
        let err = pipeline.process(&missing).await.unwrap_err();
        assert!(matches!(err, RequestRejected::MissingDeliveryId));
        assert_eq!(err.status(), 403);

        let err = pipeline
            .process(&delivery("myhook", "definitely-not-a-uuid"))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestRejected::MalformedDeliveryId(_)));
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_duplicate_identifier_rejected() {
        let pipeline = pipeline(ReplayGuard::default()).await;
        let id = new_id();

        assert!(pipeline.process(&delivery("myhook", &id)).await.is_ok());
        let err = pipeline.process(&delivery("myhook", &id)).await.unwrap_err();

        assert!(matches!(err, RequestRejected::DuplicateDelivery(_)));
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn test_signature_required_when_key_configured() {
        let pipeline = pipeline(ReplayGuard::disabled()).await;
        let (a, b) = (new_id(), new_id());
        let header = format!("sha1={}", SignatureVerifier::new(SECRET).compute(BODY));

        let unsigned = delivery("locked", &a);
        let err = pipeline.process(&unsigned).await.unwrap_err();
        assert!(matches!(err, RequestRejected::Signature(SignatureError::BadFormat)));

        let signed = Delivery {
            signature: Some(&header),
            ..delivery("locked", &b)
        };
        assert!(pipeline.process(&signed).await.is_ok());
    }

    #[tokio::test]
    async fn test_method_event_and_payload_rejections() {
        let pipeline = pipeline(ReplayGuard::disabled()).await;
        let id = new_id();

        let get = Delivery {
            method: "GET",
            ..delivery("myhook", &id)
        };
        assert_eq!(pipeline.process(&get).await.unwrap_err().status(), 405);

        let issues = Delivery {
            event: Some("issues"),
            ..delivery("myhook", &id)
        };
        assert!(matches!(
            pipeline.process(&issues).await.unwrap_err(),
            RequestRejected::UnsupportedEvent(Some(e)) if e == "issues"
        ));

        let no_event = Delivery {
            event: None,
            ..delivery("myhook", &id)
        };
        assert_eq!(pipeline.process(&no_event).await.unwrap_err().status(), 400);

        let garbage = Delivery {
            body: b"{not json",
            ..delivery("myhook", &id)
        };
        assert!(matches!(
            pipeline.process(&garbage).await.unwrap_err(),
            RequestRejected::MalformedPayload
        ));
    }
}
