use super::*;
use crate::auth::Credential;
use crate::error::{ErrorKind, TransportError};
use crate::http::mock::ScriptedTransport;
use crate::http::{CachePolicy, HttpResponse, RetryMode};
use crate::config::ValidationError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use std::sync::atomic::AtomicU32;
use std::sync::Mutex;

fn status(code: u16) -> Result<HttpResponse, TransportError> {
    Err(TransportError::Status {
        status: code,
        body: json!({"message": format!("status {}", code)}),
    })
}

fn client_with(transport: Arc<ScriptedTransport>) -> ResilientClient {
    ResilientClient::builder(ClientConfig::default())
        .transport(transport)
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(100)))
        .build()
        .unwrap()
}

fn get_count(transport: &ScriptedTransport, path: &str) -> usize {
    transport
        .requests()
        .iter()
        .filter(|r| r.method == Method::GET && r.url.path() == path)
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_one_call() {
    let transport = ScriptedTransport::with_delay(
        |_| Ok(HttpResponse::new(200, json!([{"id": 1}]))),
        Duration::from_millis(50),
    );
    let client = client_with(transport.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.execute(ApiRequest::get("/api/employees")).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(json!([{"id": 1}])));
    }

    assert_eq!(transport.count(), 1);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_posts_are_not_coalesced() {
    let transport = ScriptedTransport::with_delay(
        |_| Ok(HttpResponse::new(201, json!({"id": 1}))),
        Duration::from_millis(50),
    );
    let client = client_with(transport.clone());

    let (a, b) = tokio::join!(
        client.execute(ApiRequest::post("/api/employees", json!({"name": "Ada"}))),
        client.execute(ApiRequest::post("/api/employees", json!({"name": "Ada"}))),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_until_ttl_elapses() {
    let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(200, json!({"total": 3}))));
    let client = client_with(transport.clone());
    let request = || {
        ApiRequest::get("/api/employees")
            .cache(CachePolicy::new().ttl(Duration::from_millis(1000)))
    };

    assert_eq!(client.execute(request()).await, Ok(json!({"total": 3})));
    assert_eq!(client.execute(request()).await, Ok(json!({"total": 3})));
    assert_eq!(transport.count(), 1);

    tokio::time::advance(Duration::from_millis(1001)).await;

    assert_eq!(client.execute(request()).await, Ok(json!({"total": 3})));
    assert_eq!(transport.count(), 2);
}

#[tokio::test]
async fn test_uncached_gets_always_reach_network() {
    let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(200, json!(1))));
    let client = client_with(transport.clone());

    client.execute(ApiRequest::get("/api/leaves")).await.unwrap();
    client.execute(ApiRequest::get("/api/leaves")).await.unwrap();

    assert_eq!(transport.count(), 2);
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_tagged_mutation_invalidates_cached_list() {
    let transport = ScriptedTransport::new(|req| match req.method {
        Method::POST => Ok(HttpResponse::new(201, json!({"id": 2}))),
        _ => Ok(HttpResponse::new(200, json!([{"id": 1}]))),
    });
    let client = client_with(transport.clone());
    let list = || {
        ApiRequest::get("/api/employees").cache(
            CachePolicy::new()
                .ttl(Duration::from_millis(300_000))
                .tag("employees"),
        )
    };
    client
        .execute(
            ApiRequest::get("/api/leaves").cache(CachePolicy::new().tag("leaves")),
        )
        .await
        .unwrap();

    client.execute(list()).await.unwrap();
    client.execute(list()).await.unwrap();
    assert_eq!(get_count(&transport, "/api/employees"), 1);

    client
        .execute(
            ApiRequest::post("/api/employees", json!({"name": "Grace"})).invalidates(["employees"]),
        )
        .await
        .unwrap();

    client.execute(list()).await.unwrap();
    assert_eq!(get_count(&transport, "/api/employees"), 2);
    assert!(client.cache().contains("GET /api/leaves"));
}

/// Answers a GET with the version current when it arrived, 100ms later.
/// A POST bumps the version 10ms after it arrives.
#[derive(Default)]
struct VersionedBackend {
    version: AtomicU32,
    gets: AtomicU32,
}

#[async_trait]
impl Transport for VersionedBackend {
    async fn send(&self, request: WireRequest) -> Result<HttpResponse, TransportError> {
        if request.method == Method::GET {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let version = self.version.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(HttpResponse::new(200, json!({ "version": version })))
        } else {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.version.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse::new(201, json!({})))
        }
    }
}

fn versioned_client(backend: Arc<VersionedBackend>) -> ResilientClient {
    ResilientClient::builder(ClientConfig::default())
        .transport(backend)
        .build()
        .unwrap()
}

fn employees_list() -> ApiRequest {
    ApiRequest::get("/api/employees").cache(
        CachePolicy::new()
            .ttl(Duration::from_millis(300_000))
            .tag("employees"),
    )
}

fn add_employee() -> ApiRequest {
    ApiRequest::post("/api/employees", json!({"name": "Grace"})).invalidates(["employees"])
}

#[tokio::test(start_paused = true)]
async fn test_get_answered_after_invalidating_mutation_is_not_cached() {
    let backend = Arc::new(VersionedBackend::default());
    let client = versioned_client(backend.clone());

    let before = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(employees_list()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.execute(add_employee()).await.unwrap();

    // Read before the write; its answer is still returned to its caller
    assert_eq!(before.await.unwrap(), Ok(json!({"version": 0})));
    assert!(!client.cache().contains("GET /api/employees"));

    let after = client.execute(employees_list()).await.unwrap();
    assert_eq!(after, json!({"version": 1}));
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);

    client.execute(employees_list()).await.unwrap();
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_get_after_mutation_does_not_join_earlier_read() {
    let backend = Arc::new(VersionedBackend::default());
    let client = versioned_client(backend.clone());

    let before = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(employees_list()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.execute(add_employee()).await.unwrap();
    assert_eq!(client.in_flight(), 1);

    let after = client.execute(employees_list()).await.unwrap();

    assert_eq!(after, json!({"version": 1}));
    assert_eq!(before.await.unwrap(), Ok(json!({"version": 0})));
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);
    assert_eq!(
        client.cache().get("GET /api/employees"),
        Some(json!({"version": 1}))
    );
}

#[tokio::test]
async fn test_failed_mutation_keeps_cache() {
    let transport = ScriptedTransport::new(|req| match req.method {
        Method::POST => status(400),
        _ => Ok(HttpResponse::new(200, json!([]))),
    });
    let client = client_with(transport.clone());
    let list = || ApiRequest::get("/api/employees").cache(CachePolicy::new().tag("employees"));

    client.execute(list()).await.unwrap();
    let err = client
        .execute(ApiRequest::post("/api/employees", json!({})).invalidates(["employees"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    client.execute(list()).await.unwrap();
    assert_eq!(get_count(&transport, "/api/employees"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_get_exhausts_attempts_with_backoff() {
    let transport = ScriptedTransport::new(|_| status(503));
    let client = client_with(transport.clone());

    let err = client
        .execute(ApiRequest::get("/api/employees"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(err.status_code, Some(503));
    assert_eq!(transport.count(), 3);

    let arrivals = transport.arrivals();
    let gaps: Vec<Duration> = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_validation_error_is_not_retried() {
    let transport = ScriptedTransport::new(|_| status(400));
    let client = client_with(transport.clone());

    let err = client
        .execute(ApiRequest::get("/api/employees"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(transport.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mutations_retry_only_on_opt_in() {
    let transport = ScriptedTransport::new(|_| status(503));
    let client = client_with(transport.clone());

    let _ = client
        .execute(ApiRequest::post("/api/leaves", json!({"days": 2})))
        .await;
    assert_eq!(transport.count(), 1);

    let _ = client
        .execute(ApiRequest::post("/api/leaves", json!({"days": 2})).retry(RetryMode::Always))
        .await;
    assert_eq!(transport.count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried_then_surfaces() {
    let transport = ScriptedTransport::with_delay(
        |_| Ok(HttpResponse::new(200, json!({}))),
        Duration::from_secs(10),
    );
    let client = client_with(transport.clone());

    let err = client
        .execute(ApiRequest::get("/api/slow").timeout(Duration::from_millis(500)))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(transport.count(), 3);
}

fn auth_handler(req: &WireRequest) -> Result<HttpResponse, TransportError> {
    if req.url.path() == "/auth/refresh" {
        return Ok(HttpResponse::new(
            200,
            json!({"accessToken": "new-access", "refreshToken": "new-refresh"}),
        ));
    }
    match req.header("authorization") {
        Some("Bearer new-access") => Ok(HttpResponse::new(200, json!({"name": "Ada"}))),
        _ => status(401),
    }
}

#[tokio::test]
async fn test_401_refreshes_once_and_replays() {
    let transport = ScriptedTransport::new(auth_handler);
    let client = client_with(transport.clone());
    client.login(Credential::new("old-access", "old-refresh"));

    let me = client.execute(ApiRequest::get("/api/me")).await.unwrap();

    assert_eq!(me, json!({"name": "Ada"}));
    assert_eq!(transport.count_path("/auth/refresh"), 1);
    assert_eq!(transport.count_path("/api/me"), 2);
    assert_eq!(
        client.credentials().access_token().as_deref(),
        Some("new-access")
    );
}

#[tokio::test]
async fn test_second_401_does_not_refresh_again() {
    let transport = ScriptedTransport::new(|req| {
        if req.url.path() == "/auth/refresh" {
            Ok(HttpResponse::new(
                200,
                json!({"accessToken": "a2", "refreshToken": "r2"}),
            ))
        } else {
            status(401)
        }
    });
    let client = client_with(transport.clone());
    client.login(Credential::new("a1", "r1"));

    let err = client
        .execute(ApiRequest::get("/api/me"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Unauthenticated);
    assert_eq!(transport.count_path("/auth/refresh"), 1);
    assert_eq!(transport.count_path("/api/me"), 2);
}

#[tokio::test]
async fn test_failed_refresh_clears_session_and_redirects() {
    let transport = ScriptedTransport::new(|_| status(401));
    let routes = Arc::new(Mutex::new(Vec::new()));
    let recorded = routes.clone();

    let client = ResilientClient::builder(ClientConfig::default())
        .transport(transport.clone())
        .login_redirect(Arc::new(move |route: &str| {
            recorded.lock().unwrap().push(route.to_string());
        }))
        .build()
        .unwrap();
    client.login(Credential::new("a1", "r1"));

    let err = client
        .execute(ApiRequest::put("/api/me", json!({"name": "Ada"})))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Unauthenticated);
    assert!(!client.credentials().is_authenticated());
    assert_eq!(*routes.lock().unwrap(), vec!["/login".to_string()]);
    assert_eq!(transport.count_path("/api/me"), 1);
    assert_eq!(transport.count_path("/auth/refresh"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_401s_share_one_refresh() {
    let transport = ScriptedTransport::with_delay(auth_handler, Duration::from_millis(20));
    let client = client_with(transport.clone());
    client.login(Credential::new("old-access", "old-refresh"));

    let (a, b) = tokio::join!(
        client.execute(ApiRequest::get("/api/me")),
        client.execute(ApiRequest::get("/api/leaves")),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.count_path("/auth/refresh"), 1);
}

/// `/api/slow` answers 50ms late; everything else answers at once.
struct SlowPathAuth {
    refreshes: AtomicU32,
}

#[async_trait]
impl Transport for SlowPathAuth {
    async fn send(&self, request: WireRequest) -> Result<HttpResponse, TransportError> {
        if request.url.path() == "/api/slow" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if request.url.path() == "/auth/refresh" {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(HttpResponse::new(
                200,
                json!({"accessToken": format!("access-{}", n + 1), "refreshToken": "r"}),
            ));
        }
        match request.header("authorization") {
            Some("Bearer access-1") | None => status(401),
            Some(_) => Ok(HttpResponse::new(200, json!({"ok": true}))),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_401_for_superseded_token_replays_without_refresh() {
    let transport = Arc::new(SlowPathAuth {
        refreshes: AtomicU32::new(0),
    });
    let client = ResilientClient::builder(ClientConfig::default())
        .transport(transport.clone())
        .build()
        .unwrap();
    client.login(Credential::new("access-1", "r"));

    // The slow call leaves with access-1 and is rejected after the fast call
    // has already refreshed to access-2.
    let (slow, fast) = tokio::join!(
        client.execute(ApiRequest::get("/api/slow")),
        client.execute(ApiRequest::get("/api/fast")),
    );

    assert_eq!(slow, Ok(json!({"ok": true})));
    assert_eq!(fast, Ok(json!({"ok": true})));
    assert_eq!(transport.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        client.credentials().access_token().as_deref(),
        Some("access-2")
    );
}

#[tokio::test]
async fn test_batch_preserves_order_and_isolates_failures() {
    let transport = ScriptedTransport::new(|req| match req.url.path() {
        "/b" => status(404),
        path => Ok(HttpResponse::new(200, json!(path))),
    });
    let client = client_with(transport.clone());

    let results = client
        .batch(vec![
            ApiRequest::get("/a"),
            ApiRequest::get("/b"),
            ApiRequest::post("/c", json!({})),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Ok(json!("/a")));
    assert_eq!(results[1].as_ref().unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(results[2], Ok(json!("/c")));
}

#[tokio::test]
async fn test_every_attempt_carries_auth_and_request_id() {
    let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(204, Value::Null)));
    let client = client_with(transport.clone());
    client.login(Credential::new("token-1", "refresh-1"));

    client.execute(ApiRequest::get("/a")).await.unwrap();
    client.delete("/a/1").await.unwrap();

    let requests = transport.requests();
    let ids: Vec<&str> = requests
        .iter()
        .map(|r| r.header(REQUEST_ID_HEADER).unwrap())
        .collect();
    assert_ne!(ids[0], ids[1]);
    for request in &requests {
        assert_eq!(request.header("authorization"), Some("Bearer token-1"));
    }
}

#[tokio::test]
async fn test_url_resolution() {
    let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(200, json!([]))));
    let mut config = ClientConfig::default();
    config.api.base_url = "http://api.test/v1/".to_string();
    let client = ResilientClient::builder(config)
        .transport(transport.clone())
        .build()
        .unwrap();

    client
        .execute(ApiRequest::get("/employees").query("page", 2))
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].url.as_str(), "http://api.test/v1/employees?page=2");
    assert!(requests[0].header("authorization").is_none());
}

#[tokio::test]
async fn test_typed_helpers() {
    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Employee {
        id: u32,
        name: String,
    }

    let transport = ScriptedTransport::new(|req| match req.method {
        Method::GET => Ok(HttpResponse::new(200, json!({"id": 1, "name": "Ada"}))),
        _ => Ok(HttpResponse::new(200, req.body.clone().unwrap_or(Value::Null))),
    });
    let client = client_with(transport);

    let employee: Employee = client.get("/api/employees/1").await.unwrap();
    assert_eq!(
        employee,
        Employee {
            id: 1,
            name: "Ada".into()
        }
    );

    let echoed: Employee = client
        .post("/api/employees", &json!({"id": 2, "name": "Grace"}))
        .await
        .unwrap();
    assert_eq!(echoed.id, 2);

    let bad: Result<Vec<u32>, _> = client.get("/api/employees/1").await;
    assert_eq!(bad.unwrap_err().kind, ErrorKind::Server);
}

#[tokio::test]
async fn test_logout_clears_credentials_and_cache() {
    let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(200, json!([]))));
    let client = client_with(transport);
    client.login(Credential::new("a", "r"));
    client
        .execute(ApiRequest::get("/a").cache(CachePolicy::new()))
        .await
        .unwrap();
    assert_eq!(client.cache().len(), 1);

    client.logout();

    assert!(!client.credentials().is_authenticated());
    assert!(client.cache().is_empty());
}

#[test]
fn test_invalid_base_url_fails_build() {
    let mut config = ClientConfig::default();
    config.api.base_url = "not a url".to_string();
    let result = ResilientClient::builder(config)
        .transport(ScriptedTransport::new(|_| status(500)))
        .build();
    match result {
        Err(BuildError::Config(errors)) => assert_eq!(
            errors,
            vec![ValidationError::InvalidUrl {
                field: "api.base_url",
                value: "not a url".to_string(),
            }]
        ),
        _ => panic!("expected a configuration error"),
    }
}

#[test]
fn test_zero_sweep_interval_fails_build() {
    let mut config = ClientConfig::default();
    config.cache.sweep_interval_ms = 0;
    let result = ResilientClient::builder(config)
        .transport(ScriptedTransport::new(|_| status(500)))
        .build();

    match result {
        Err(BuildError::Config(errors)) => assert_eq!(
            errors,
            vec![ValidationError::Zero {
                field: "cache.sweep_interval_ms"
            }]
        ),
        _ => panic!("expected a configuration error"),
    }
}
