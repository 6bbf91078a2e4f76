//! HTTP front-end: routes, middleware and the serve loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use secrecy::ExposeSecret;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hmcgate_config::BasicAuth;
use hmcgate_core::{CoreError, Gateway, GatewayStatus, with_deadline};

use crate::error::CliError;
use crate::listener::{GateListener, PeerInfo};

const CONSOLE_DEADLINE: Duration = Duration::from_secs(30);
const QUICK_DEADLINE: Duration = Duration::from_secs(60);

/// Headers consulted for the client address, before the peer address.
const CLIENT_IP_HEADERS: [&str; 4] = ["x-real-ip", "x-forwarded-for", "x-client-ip", "cf-connecting-ip"];

// ── Router ──────────────────────────────────────────────────────────

/// Build the gateway router.
///
/// With basic auth configured, every route except `/health` and `/status`
/// requires credentials and the full set of security headers is sent.
pub fn router(gateway: Gateway, auth: Option<BasicAuth>) -> Router {
    let strict = auth.is_some();

    let mut protected = Router::new()
        .route(
            "/getManagementConsole",
            get(management_console).post(management_console),
        )
        .route(
            "/quickManagedSystem",
            get(quick_managed_system).post(quick_managed_system),
        );
    if let Some(auth) = auth {
        info!(realm = %auth.realm, "basic auth enabled");
        protected = protected.layer(middleware::from_fn_with_state(Arc::new(auth), basic_auth));
    }

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .merge(protected)
        .layer(middleware::from_fn_with_state(strict, security_headers))
        .layer(middleware::from_fn(log_request))
        .with_state(gateway)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(listener: GateListener, app: Router, shutdown: CancellationToken) -> Result<(), CliError> {
    axum::serve(listener, app.into_make_service_with_connect_info::<PeerInfo>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("server stopped");
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> Response {
    Json(json!({ "Server_status": "OK" })).into_response()
}

async fn status(State(gateway): State<Gateway>) -> Json<GatewayStatus> {
    Json(gateway.status())
}

async fn management_console(State(gateway): State<Gateway>) -> Response {
    match with_deadline(CONSOLE_DEADLINE, gateway.management_console_xml()).await {
        Ok(xml) => (
            [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
            xml,
        )
            .into_response(),
        Err(e) => failure("getManagementConsole", &e),
    }
}

async fn quick_managed_system(State(gateway): State<Gateway>) -> Response {
    let report = match with_deadline(QUICK_DEADLINE, gateway.quick_status()).await {
        Ok(report) => report,
        Err(e) => return failure("quickManagedSystem", &e),
    };
    match serde_json::to_string_pretty(&report) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(operation = "quickManagedSystem", error = %e, "report rendering failed");
            failure_body("quickManagedSystem")
        }
    }
}

fn failure(operation: &str, err: &CoreError) -> Response {
    error!(operation, kind = err.kind(), error = %err, "request failed");
    failure_body(operation)
}

fn failure_body(operation: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "result": format!("{operation} error") })),
    )
        .into_response()
}

// ── Middleware ──────────────────────────────────────────────────────

async fn security_headers(State(strict): State<bool>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    if strict {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
    }
    response
}

async fn basic_auth(State(auth): State<Arc<BasicAuth>>, request: Request, next: Next) -> Response {
    if authorized(&auth, request.headers()) {
        return next.run(request).await;
    }

    warn!(
        client = %client_ip(&request),
        path = request.uri().path(),
        "unauthorized request"
    );
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", auth.realm))],
        "Unauthorized",
    )
        .into_response()
}

fn authorized(auth: &BasicAuth, headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Some(decoded) = BASE64
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    else {
        return false;
    };
    decoded
        .split_once(':')
        .is_some_and(|(user, password)| {
            user == auth.user && password == auth.password.expose_secret()
        })
}

async fn log_request(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let client = client_ip(&request);
    let tls = request
        .extensions()
        .get::<ConnectInfo<PeerInfo>>()
        .and_then(|ConnectInfo(peer)| peer.tls)
        .unwrap_or("none");
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = next.run(request).await;

    debug!(
        %client,
        tls,
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request"
    );
    response
}

/// Client address from proxy headers, else the TCP peer.
fn client_ip(request: &Request) -> String {
    CLIENT_IP_HEADERS
        .iter()
        .find_map(|name| {
            request
                .headers()
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        })
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<PeerInfo>>()
                .map(|ConnectInfo(peer)| peer.addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".into())
}
