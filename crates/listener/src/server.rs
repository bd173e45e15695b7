//! Router, request extraction and response rendering.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use pipeline::{Action, Delivery, DeliveryOutcome, DeliveryPipeline, RequestRejected};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Value of the `server` header on every response.
pub const SERVER_STRING: &str = concat!("hookd/", env!("CARGO_PKG_VERSION"));

/// Header carrying the delivery identifier.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "x-github-event";

/// Header a reverse proxy uses to pass on the client address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// HTTP-surface settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Return rejection reasons and their real status to the caller.
    pub debug: bool,
    /// Take the client address from the last `X-Forwarded-For` entry.
    pub trust_forwarded: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            trust_forwarded: true,
        }
    }
}

struct AppState<A> {
    pipeline: Arc<DeliveryPipeline<A>>,
    config: ListenerConfig,
}

/// Builds the router serving `/:endpoint`.
///
/// Serve it with connection info (see [`serve`]); the handler needs the peer
/// address.
pub fn router<A>(pipeline: Arc<DeliveryPipeline<A>>, config: ListenerConfig) -> Router
where
    A: Action + 'static,
{
    let state = Arc::new(AppState { pipeline, config });

    Router::new()
        .route("/:endpoint", get(handle_delivery::<A>).post(handle_delivery::<A>))
        .fallback(move |uri: Uri| async move { unknown_route(uri, config) })
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(SERVER_STRING),
        ))
}

/// Serves `router` on `listener` until the server fails.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn handle_delivery<A>(
    State(state): State<Arc<AppState<A>>>,
    Path(endpoint): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    A: Action + 'static,
{
    let remote_addr = client_addr(&headers, peer.ip(), state.config.trust_forwarded);

    let delivery = Delivery {
        endpoint: &endpoint,
        method: method.as_str(),
        remote_addr,
        delivery_id: header_str(&headers, DELIVERY_HEADER),
        signature: header_str(&headers, SIGNATURE_HEADER),
        event: header_str(&headers, EVENT_HEADER),
        body: &body,
    };

    match state.pipeline.process(&delivery).await {
        Ok(DeliveryOutcome::Pong) => Json(json!({"msg": "pong"})).into_response(),
        Ok(DeliveryOutcome::Report(report)) => Json(report).into_response(),
        Err(rejection) => rejection_response(&rejection, state.config),
    }
}

fn unknown_route(uri: Uri, config: ListenerConfig) -> Response {
    let rejection = RequestRejected::EndpointNotFound(uri.path().to_string());
    rejection_response(&rejection, config)
}

/// Renders a rejection, masking it unless debug mode is on.
fn rejection_response(rejection: &RequestRejected, config: ListenerConfig) -> Response {
    let status = rejection.status();
    warn!(status, error = %rejection, "delivery rejected");

    if config.debug {
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            code,
            Json(json!({"status": status, "message": rejection.to_string()})),
        )
            .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": 500, "message": "Internal Server Error"})),
        )
            .into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolves the client address.
///
/// With `trust_forwarded`, the last entry of the last `X-Forwarded-For` header
/// (the one appended by the nearest proxy) wins when it parses.
fn client_addr(headers: &HeaderMap, peer: IpAddr, trust_forwarded: bool) -> IpAddr {
    if !trust_forwarded {
        return peer;
    }

    headers
        .get_all(FORWARDED_FOR_HEADER)
        .iter()
        .last()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .and_then(|last| last.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
}
