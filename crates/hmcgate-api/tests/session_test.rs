#![allow(clippy::unwrap_used)]
// Integration tests for `Session` and the retry policy using wiremock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use hmcgate_api::client::JSON_ACCEPT;
use hmcgate_api::{Credentials, Error, Fetched, HmcClient, RequestSpec, Session, SessionState};

const LOGON: &str = "/rest/api/web/Logon";
const QUICK: &str = "/rest/api/uom/ManagedSystem/sys-1/quick";

// ── Helpers ─────────────────────────────────────────────────────────

fn logon_body(token: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <LogonResponse xmlns=\"http://www.ibm.com/xmlns/systems/power/firmware/web/mc/2012_10/\" schemaVersion=\"V1_0\">\
         <X-API-Session kb=\"ROR\" kxe=\"false\">{token}</X-API-Session></LogonResponse>"
    )
}

/// Issues `tok-1`, `tok-2`, ... on successive logons.
#[derive(Default)]
struct TokenIssuer {
    issued: AtomicUsize,
}

impl Respond for TokenIssuer {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200).set_body_string(logon_body(&format!("tok-{n}")))
    }
}

async fn setup() -> (MockServer, Arc<Session>) {
    let server = MockServer::start().await;
    let client = HmcClient::with_client(reqwest::Client::new(), Url::parse(&server.uri()).unwrap());
    let creds = Credentials::new("hscroot", SecretString::from("abc123".to_string()));
    (server, Arc::new(Session::new(client, creds)))
}

async fn mount_logon(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(TokenIssuer::default())
        .mount(server)
        .await;
}

async fn mount_logoff(server: &MockServer) {
    Mock::given(method("DELETE"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

async fn count(server: &MockServer, verb: &str, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == verb && r.url.path() == route)
        .count()
}

fn quick_request(session: &Session) -> RequestSpec {
    RequestSpec::get(session.client().quick_status_url("sys-1").unwrap()).accept(JSON_ACCEPT)
}

// ── Acquire ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_acquire_stores_token() {
    let (server, session) = setup().await;

    Mock::given(method("PUT"))
        .and(path(LOGON))
        .and(header(
            "content-type",
            "application/vnd.ibm.powervm.web+xml; type=LogonRequest",
        ))
        .and(body_string_contains("<UserID>hscroot</UserID>"))
        .and(body_string_contains("<Password>abc123</Password>"))
        .respond_with(TokenIssuer::default())
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(session.state(), SessionState::Disconnected);
    session.acquire().await.unwrap();

    assert!(session.is_connected());
    assert_eq!(session.token().unwrap().as_str(), "tok-1");
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.logon_count(), 1);
}

#[tokio::test]
async fn test_acquire_when_connected_is_noop() {
    let (server, session) = setup().await;
    mount_logon(&server).await;

    session.acquire().await.unwrap();
    session.acquire().await.unwrap();
    session.acquire().await.unwrap();

    assert_eq!(count(&server, "PUT", LOGON).await, 1);
    assert_eq!(session.token().unwrap().as_str(), "tok-1");
}

#[tokio::test]
async fn test_acquire_rejected() {
    let (server, session) = setup().await;

    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .mount(&server)
        .await;

    let result = session.acquire().await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_acquire_unparseable_body() {
    let (server, session) = setup().await;

    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(200).set_body_string("<LogonResponse/>"))
        .mount(&server)
        .await;

    let result = session.acquire().await;

    assert!(
        matches!(result, Err(Error::Protocol { .. })),
        "expected Protocol error, got: {result:?}"
    );
    assert!(!session.is_connected());
}

// ── Release ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_release_when_disconnected_is_noop() {
    let (server, session) = setup().await;

    session.release().await.unwrap();

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_release_sends_token() {
    let (server, session) = setup().await;
    mount_logon(&server).await;

    Mock::given(method("DELETE"))
        .and(path(LOGON))
        .and(header("X-API-Session", "tok-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    session.acquire().await.unwrap();
    session.release().await.unwrap();

    assert!(!session.is_connected());
    assert!(session.token().is_none());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_release_clears_token_on_upstream_failure() {
    let (server, session) = setup().await;
    mount_logon(&server).await;

    Mock::given(method("DELETE"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    session.acquire().await.unwrap();
    let result = session.release().await;

    assert!(
        matches!(result, Err(Error::Upstream { status: 500, .. })),
        "expected Upstream error, got: {result:?}"
    );
    assert!(!session.is_connected());

    // A later acquire starts from a clean slate.
    session.acquire().await.unwrap();
    assert_eq!(session.token().unwrap().as_str(), "tok-2");
}

// ── ReplaceIfStale ──────────────────────────────────────────────────

#[tokio::test]
async fn test_replace_if_stale_skips_already_renewed() {
    let (server, session) = setup().await;
    mount_logon(&server).await;
    mount_logoff(&server).await;

    session.acquire().await.unwrap();
    let renewed = session.replace_if_stale("tok-1").await.unwrap();
    assert_eq!(renewed.as_str(), "tok-2");

    // A straggler still holding tok-1 gets tok-2 back without traffic.
    let before = server.received_requests().await.unwrap().len();
    let live = session.replace_if_stale("tok-1").await.unwrap();
    let after = server.received_requests().await.unwrap().len();

    assert_eq!(live.as_str(), "tok-2");
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renewal_collapses_to_one() {
    let (server, session) = setup().await;
    mount_logon(&server).await;
    mount_logoff(&server).await;

    session.acquire().await.unwrap();
    let stale = session.token().unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let session = Arc::clone(&session);
            let stale = Arc::clone(&stale);
            tokio::spawn(async move { session.replace_if_stale(&stale).await })
        })
        .collect();

    let mut tokens = Vec::new();
    for task in tasks {
        tokens.push(task.await.unwrap().unwrap());
    }

    assert!(tokens.iter().all(|t| t.as_str() == "tok-2"), "{tokens:?}");
    assert_eq!(count(&server, "DELETE", LOGON).await, 1);
    assert_eq!(count(&server, "PUT", LOGON).await, 2);
    assert_eq!(session.token().unwrap().as_str(), "tok-2");
}

#[tokio::test]
async fn test_cancelled_renewal_leaves_session_disconnected() {
    let (server, session) = setup().await;
    mount_logoff(&server).await;

    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(200).set_body_string(logon_body("tok-1")))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(logon_body("tok-slow"))
                .set_delay(Duration::from_secs(5)),
        )
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(200).set_body_string(logon_body("tok-fresh")))
        .with_priority(3)
        .mount(&server)
        .await;

    session.acquire().await.unwrap();

    let renewal = tokio::time::timeout(Duration::from_millis(200), session.replace_if_stale("tok-1")).await;
    assert!(renewal.is_err(), "renewal should have been cut off");

    assert!(!session.is_connected());
    assert!(session.token().is_none());
    assert_eq!(session.state(), SessionState::Disconnected);

    session.acquire().await.unwrap();
    assert_eq!(session.token().unwrap().as_str(), "tok-fresh");
    assert_eq!(session.state(), SessionState::Connected);
}

// ── Fetch with retry ────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_logs_on_lazily() {
    let (server, session) = setup().await;
    mount_logon(&server).await;

    Mock::given(method("GET"))
        .and(path(QUICK))
        .and(header("X-API-Session", "tok-1"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"State":"operating"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = session.fetch(&quick_request(&session)).await.unwrap();

    assert_eq!(
        fetched,
        Fetched::Body(bytes::Bytes::from_static(br#"{"State":"operating"}"#))
    );
    assert_eq!(session.request_count(), 1);
}

#[tokio::test]
async fn test_fetch_no_content() {
    let (server, session) = setup().await;
    mount_logon(&server).await;

    Mock::given(method("GET"))
        .and(path(QUICK))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let fetched = session.fetch(&quick_request(&session)).await.unwrap();
    assert_eq!(fetched, Fetched::NoContent);
    assert!(fetched.into_body().is_none());
}

#[tokio::test]
async fn test_fetch_logon_failure_skips_request() {
    let (server, session) = setup().await;

    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = session.fetch(&quick_request(&session)).await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert_eq!(count(&server, "GET", QUICK).await, 0);
}

#[tokio::test]
async fn test_fetch_other_status_not_retried() {
    let (server, session) = setup().await;
    mount_logon(&server).await;

    Mock::given(method("GET"))
        .and(path(QUICK))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = session.fetch(&quick_request(&session)).await;

    match result {
        Err(Error::Upstream { status, ref url }) => {
            assert_eq!(status, 500);
            assert!(url.ends_with(QUICK), "unexpected url {url}");
        }
        other => panic!("expected Upstream error, got: {other:?}"),
    }
    assert_eq!(count(&server, "GET", QUICK).await, 1);
    assert_eq!(count(&server, "PUT", LOGON).await, 1);
}

#[tokio::test]
async fn test_fetch_renews_once_after_unauthorized() {
    let (server, session) = setup().await;
    mount_logon(&server).await;
    mount_logoff(&server).await;

    // tok-1 has expired upstream; anything else is accepted.
    Mock::given(method("GET"))
        .and(path(QUICK))
        .and(header("X-API-Session", "tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(QUICK))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let fetched = session.fetch(&quick_request(&session)).await.unwrap();

    assert_eq!(fetched, Fetched::Body(bytes::Bytes::from_static(b"{}")));
    assert_eq!(count(&server, "GET", QUICK).await, 2);
    assert_eq!(count(&server, "DELETE", LOGON).await, 1);
    assert_eq!(count(&server, "PUT", LOGON).await, 2);
    assert_eq!(session.token().unwrap().as_str(), "tok-2");
}

#[tokio::test]
async fn test_fetch_double_unauthorized_is_upstream_error() {
    let (server, session) = setup().await;
    mount_logon(&server).await;
    mount_logoff(&server).await;

    Mock::given(method("GET"))
        .and(path(QUICK))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let result = session.fetch(&quick_request(&session)).await;

    assert!(
        matches!(result, Err(Error::Upstream { status: 403, .. })),
        "expected Upstream error, got: {result:?}"
    );
    assert_eq!(count(&server, "GET", QUICK).await, 2);
    assert_eq!(count(&server, "PUT", LOGON).await, 2);
}

#[tokio::test]
async fn test_fetch_renewal_failure_is_upstream_error() {
    let (server, session) = setup().await;
    mount_logoff(&server).await;

    // First logon succeeds, every later one is refused.
    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(200).set_body_string(logon_body("tok-1")))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(LOGON))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(QUICK))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = session.fetch(&quick_request(&session)).await;

    assert!(
        matches!(result, Err(Error::Upstream { status: 401, .. })),
        "expected Upstream error, got: {result:?}"
    );
    assert_eq!(count(&server, "GET", QUICK).await, 1);
    assert!(!session.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_share_one_renewal() {
    let (server, session) = setup().await;
    mount_logon(&server).await;
    mount_logoff(&server).await;

    Mock::given(method("GET"))
        .and(path(QUICK))
        .and(header("X-API-Session", "tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(QUICK))
        .and(header("X-API-Session", "tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    session.acquire().await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let request = quick_request(&session);
                session.fetch(&request).await
            })
        })
        .collect();

    for task in tasks {
        let fetched = task.await.unwrap().unwrap();
        assert_eq!(fetched, Fetched::Body(bytes::Bytes::from_static(b"{}")));
    }

    assert_eq!(count(&server, "DELETE", LOGON).await, 1);
    assert_eq!(count(&server, "PUT", LOGON).await, 2);
    assert_eq!(session.token().unwrap().as_str(), "tok-2");
}
