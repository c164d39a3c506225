use recordsync_sync::remote::mock::{InMemoryRemote, RemoteCall};
use recordsync_sync::{DeleteOutcome, HttpRemoteClient, RemoteClient, RemoteError, RemoteErrorKind, SyncConfig};
use recordsync_types::{into_fields, CanonicalId, Fields};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fields(value: serde_json::Value) -> Fields {
    into_fields(value).unwrap()
}

fn client_for(server: &MockServer) -> HttpRemoteClient {
    let config = SyncConfig {
        remote_base_url: server.uri(),
        request_timeout_ms: 500,
        ..Default::default()
    };
    HttpRemoteClient::new(&config).unwrap()
}

// ── HTTP client ─────────────────────────────────────────────────

#[tokio::test]
async fn create_strips_identifier_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .and(body_json(json!({"title": "X"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "abc", "title": "X"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = client
        .create(&fields(json!({"title": "X", "id": "local-1", "_id": 7, "localId": "x", "local_id": "y"})))
        .await
        .unwrap();

    assert_eq!(record.canonical_id(), Some(&CanonicalId::new("abc")));
    assert_eq!(record.fields, fields(json!({"title": "X"})));
}

#[tokio::test]
async fn create_accepts_numeric_and_wrapped_ids() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"_id": 42, "title": "X"}})))
        .mount(&server)
        .await;

    let record = client_for(&server).create(&fields(json!({"title": "X"}))).await.unwrap();
    assert_eq!(record.canonical_id(), Some(&CanonicalId::new("42")));
}

#[tokio::test]
async fn list_accepts_array_and_data_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "title": "A"},
            {"id": "b", "title": "B"}
        ])))
        .mount(&server)
        .await;
    let records = client_for(&server).list().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].canonical_id(), Some(&CanonicalId::new("b")));

    let wrapped = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "c"}]})))
        .mount(&wrapped)
        .await;
    let records = client_for(&wrapped).list().await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn update_with_empty_body_echoes_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/records/abc"))
        .and(body_json(json!({"title": "Y"})))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let record = client_for(&server)
        .update(&CanonicalId::new("abc"), &fields(json!({"title": "Y"})))
        .await
        .unwrap();
    assert_eq!(record.canonical_id(), Some(&CanonicalId::new("abc")));
    assert_eq!(record.get("title"), Some(&json!("Y")));
}

#[tokio::test]
async fn update_with_plain_text_body_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/records/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let record = client_for(&server)
        .update(&CanonicalId::new("abc"), &fields(json!({"title": "Y"})))
        .await
        .unwrap();
    assert_eq!(record.canonical_id(), Some(&CanonicalId::new("abc")));
    assert_eq!(record.fields, fields(json!({"title": "Y"})));
}

#[tokio::test]
async fn delete_with_plain_text_body_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/records/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Deleted"))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(
        client_for(&server).delete(&CanonicalId::new("abc")).await.unwrap(),
        DeleteOutcome::Deleted
    );
}

#[tokio::test]
async fn malformed_create_response_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(201).set_body_string("Created"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create(&fields(json!({"title": "X"})))
        .await
        .unwrap_err();
    assert_eq!(err.status, Some(201));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn delete_not_found_is_already_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/records/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/records/here"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(
        client.delete(&CanonicalId::new("gone")).await.unwrap(),
        DeleteOutcome::AlreadyDeleted
    );
    assert_eq!(
        client.delete(&CanonicalId::new("here")).await.unwrap(),
        DeleteOutcome::Deleted
    );
}

#[tokio::test]
async fn validation_error_carries_status_message_and_details() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({"message": "title required", "field": "title"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).create(&fields(json!({}))).await.unwrap_err();
    assert_eq!(err.status, Some(422));
    assert_eq!(err.message, "title required");
    assert_eq!(err.details.as_ref().and_then(|d| d.get("field")), Some(&json!("title")));
    assert_eq!(err.classify(), RemoteErrorKind::Validation);
}

#[tokio::test]
async fn server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let err = client_for(&server).list().await.unwrap_err();
    assert_eq!(err.status, Some(503));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn timeout_has_no_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = client_for(&server).list().await.unwrap_err();
    assert_eq!(err.status, None);
    assert_eq!(err.classify(), RemoteErrorKind::Unavailable);
}

#[tokio::test]
async fn ping_hits_health_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).ping().await.unwrap();
}

#[tokio::test]
async fn ping_fails_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(client_for(&server).ping().await.is_err());
}

#[tokio::test]
async fn malformed_record_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"title": "no id"})))
        .mount(&server)
        .await;

    assert!(client_for(&server).create(&fields(json!({"title": "X"}))).await.is_err());
}

// ── In-memory authority ─────────────────────────────────────────

#[tokio::test]
async fn in_memory_assigns_unique_ids() {
    let remote = InMemoryRemote::new();
    let a = remote.create(&fields(json!({"n": 1}))).await.unwrap();
    let b = remote.create(&fields(json!({"n": 2}))).await.unwrap();
    remote.delete(a.canonical_id().unwrap()).await.unwrap();
    let c = remote.create(&fields(json!({"n": 3}))).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.id, c.id);
    assert_ne!(b.id, c.id);
}

#[tokio::test]
async fn in_memory_offline_and_injected_failures() {
    let remote = InMemoryRemote::new();
    remote.set_online(false);
    let err = remote.list().await.unwrap_err();
    assert_eq!(err.status, None);
    assert!(remote.ping().await.is_err());

    remote.set_online(true);
    remote.fail_next(RemoteError::new(Some(500), "boom"));
    assert_eq!(remote.list().await.unwrap_err().status, Some(500));
    assert!(remote.list().await.is_ok());
    assert_eq!(remote.calls(), vec![RemoteCall::List, RemoteCall::List, RemoteCall::List]);
}

#[tokio::test]
async fn in_memory_rejects_configured_field() {
    let remote = InMemoryRemote::new();
    remote.reject_field("bad");
    let err = remote.create(&fields(json!({"bad": true}))).await.unwrap_err();
    assert_eq!(err.status, Some(422));
    assert!(remote.records().is_empty());
}

#[tokio::test]
async fn in_memory_delete_missing_is_already_deleted() {
    let remote = InMemoryRemote::new();
    assert_eq!(
        remote.delete(&CanonicalId::new("nope")).await.unwrap(),
        DeleteOutcome::AlreadyDeleted
    );
    let err = remote
        .update(&CanonicalId::new("nope"), &fields(json!({})))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
