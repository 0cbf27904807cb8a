//! Integration tests for the cached generation path: coordinator, fetch
//! client, and sqlite storage working together against a mock platform API.
//!
//! Each test creates its own in-memory database and mock server for
//! isolation.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedmill::coordinator::{Coordinator, CoordinatorConfig, FetchGenerator, GetError};
use feedmill::fetch::{
    ApiCodes, FetchClient, FetchConfig, FetchError, RateLimiter, RateLimiterConfig,
    TimestampSigner,
};
use feedmill::key::ResourceKey;
use feedmill::storage::{CacheLookup, Database};

async fn test_db() -> Arc<Database> {
    Arc::new(Database::open(":memory:").await.unwrap())
}

fn fast_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::start(RateLimiterConfig {
        base_interval: Duration::from_millis(1),
        jitter: Duration::ZERO,
    }))
}

/// Wire the full stack against a mock platform API: credential in the
/// database, signed fetches through the limiter, generated documents
/// cached in the same database.
async fn coordinator_against(server: &MockServer, db: Arc<Database>) -> Coordinator {
    db.credential_set("forum", SecretString::from("tok"), None)
        .await
        .unwrap();

    let client = FetchClient::new(
        reqwest::Client::new(),
        fast_limiter(),
        db.clone(),
        Arc::new(TimestampSigner::new("app-secret")),
        "forum",
        ApiCodes::default(),
        FetchConfig {
            max_retry: 2,
            timeout: Duration::from_secs(5),
        },
    );
    let generator = FetchGenerator::new(
        Arc::new(client),
        format!("{}/feed/{{ident}}", server.uri()),
    );
    Coordinator::spawn(
        db,
        Arc::new(generator),
        CoordinatorConfig {
            ttl: Duration::from_secs(3600),
            queue_capacity: 16,
        },
    )
}

fn envelope(code: i64, data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "code": code,
        "message": "msg",
        "data": data,
    }))
}

fn key(ident: &str) -> ResourceKey {
    ResourceKey::new("forum", "topic", ident).unwrap()
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_miss_generates_once_then_serves_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(0, serde_json::json!("<rss>alpha</rss>")))
        .expect(1) // the second get must not reach the platform
        .mount(&server)
        .await;

    let db = test_db().await;
    let coordinator = coordinator_against(&server, db.clone()).await;

    let first = coordinator.get(key("alpha")).await.unwrap();
    let second = coordinator.get(key("alpha")).await.unwrap();
    assert_eq!(first, "<rss>alpha</rss>");
    assert_eq!(first, second);

    // The document is durably cached under the key's string form.
    let cached = db.cache_get("forum:topic:alpha").await.unwrap();
    assert_eq!(cached, CacheLookup::Hit("<rss>alpha</rss>".to_string()));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_distinct_keys_generate_independently() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(0, serde_json::json!("<rss>doc</rss>")))
        .expect(2)
        .mount(&server)
        .await;

    let db = test_db().await;
    let coordinator = coordinator_against(&server, db).await;

    coordinator.get(key("one")).await.unwrap();
    coordinator.get(key("two")).await.unwrap();
    coordinator.shutdown().await;
}

// ============================================================================
// Failure Paths
// ============================================================================

#[tokio::test]
async fn test_need_login_purges_credential_and_caches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(401, serde_json::Value::Null))
        .expect(1) // terminal: no retry
        .mount(&server)
        .await;

    let db = test_db().await;
    let coordinator = coordinator_against(&server, db.clone()).await;

    let err = coordinator.get(key("locked")).await.unwrap_err();
    match err {
        GetError::Generate(e) => {
            assert!(matches!(
                e.downcast_ref::<FetchError>(),
                Some(FetchError::NeedLogin)
            ));
        }
        e => panic!("Expected Generate error, got {:?}", e),
    }

    assert!(
        db.credential_get("forum").await.unwrap().is_none(),
        "rejected credential must be purged"
    );
    assert_eq!(
        db.cache_get("forum:topic:locked").await.unwrap(),
        CacheLookup::Miss
    );

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_transport_failure_exhausts_retries_and_caches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2) // max_retry is 2 in this wiring
        .mount(&server)
        .await;

    let db = test_db().await;
    let coordinator = coordinator_against(&server, db.clone()).await;

    let err = coordinator.get(key("down")).await.unwrap_err();
    match err {
        GetError::Generate(e) => {
            assert!(matches!(
                e.downcast_ref::<FetchError>(),
                Some(FetchError::RetriesExhausted { attempts: 2, .. })
            ));
        }
        e => panic!("Expected Generate error, got {:?}", e),
    }
    assert_eq!(
        db.cache_get("forum:topic:down").await.unwrap(),
        CacheLookup::Miss
    );

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_failed_generation_is_retried_by_the_next_caller() {
    let server = MockServer::start().await;
    // First request fails semantically, the second succeeds.
    Mock::given(method("GET"))
        .respond_with(envelope(400, serde_json::Value::Null))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(envelope(0, serde_json::json!("<rss>late</rss>")))
        .mount(&server)
        .await;

    let db = test_db().await;
    let coordinator = coordinator_against(&server, db).await;

    assert!(coordinator.get(key("flaky")).await.is_err());
    // Nothing was cached, so the next get generates again and succeeds.
    let document = coordinator.get(key("flaky")).await.unwrap();
    assert_eq!(document, "<rss>late</rss>");

    coordinator.shutdown().await;
}
