//! End-to-end lifecycle tests
//!
//! Drives the real router over an in-memory SQLite metadata store and
//! the in-memory object store: reserve -> upload -> hash -> link ->
//! download, plus the refusal paths (quota, duplicates, passwords,
//! single-use, rate limits) and the reaper.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tower::ServiceExt;

use filedrop_core::config::{Config, ObjectStoreConfig};
use filedrop_core::domain::newtypes::{FileId, UserId};
use filedrop_core::domain::{FileState, User};
use filedrop_core::ports::{bytestream_from, IMetadataStore, IObjectStore};
use filedrop_core::usecases::HashFileUseCase;
use filedrop_object::{InMemoryObjectStore, Sha256DigestProvider};
use filedrop_server::state::AppState;
use filedrop_server::{build_app, routes::build_router};
use filedrop_store::{DatabasePool, SqliteMetadataStore};

const SIGNING_SECRET: &str = "integration-signing-key-0123456789abcdef0123";

struct TestApp {
    router: Router,
    state: AppState,
    metadata: Arc<dyn IMetadataStore>,
    objects: Arc<InMemoryObjectStore>,
    /// Kept alive so the hash queue stays open even when no worker
    /// consumes it (tests that drive hashing by hand).
    _idle_worker: Option<filedrop_server::hash_worker::HashWorker>,
    _db: DatabasePool,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.public_base_url = "https://drop.test".into();
    config.security.session_secret = "s".repeat(48);
    config.security.download_signing_secret = SIGNING_SECRET.into();
    config.security.max_link_ttl_secs = 7 * 24 * 3600;
    config.object_store = ObjectStoreConfig {
        endpoint: "http://unused.test".into(),
        region: "test".into(),
        access_key: "unused".into(),
        secret_key: "u".repeat(40),
        bucket: "unused".into(),
        force_path_style: true,
    };
    // The reaper is driven by hand in these tests.
    config.cleanup.enabled = false;
    config
}

async fn spawn_app(mutate: impl FnOnce(&mut Config), run_worker: bool) -> TestApp {
    let mut config = test_config();
    mutate(&mut config);
    assert!(config.validate().is_empty(), "test config must validate");

    let db = DatabasePool::in_memory().await.unwrap();
    let metadata: Arc<dyn IMetadataStore> =
        Arc::new(SqliteMetadataStore::new(db.pool().clone()));
    let objects = Arc::new(InMemoryObjectStore::new());

    let app = build_app(&config, Arc::clone(&metadata), objects.clone());
    let idle_worker = if run_worker {
        tokio::spawn(app.hash_worker.run());
        None
    } else {
        Some(app.hash_worker)
    };

    TestApp {
        router: build_router(app.state.clone()),
        state: app.state,
        metadata,
        objects,
        _idle_worker: idle_worker,
        _db: db,
    }
}

async fn register_user(app: &TestApp, quota: Option<u64>) -> UserId {
    let user = User::new(UserId::new(), quota, false);
    app.metadata.upsert_user(&user).await.unwrap();
    user.id()
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn reserve(
    app: &TestApp,
    user: UserId,
    name: &str,
    size: u64,
    extra: serde_json::Value,
) -> axum::response::Response {
    let mut body = serde_json::json!({
        "orig_name": name,
        "content_type": "text/plain",
        "size_bytes": size,
    });
    if let Some(extra) = extra.as_object() {
        for (k, v) in extra {
            body[k.as_str()] = v.clone();
        }
    }
    app.router
        .clone()
        .oneshot(
            Request::post("/files")
                .header("x-filedrop-user", user.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn upload(app: &TestApp, user: UserId, file_id: FileId, data: &[u8]) -> StatusCode {
    let boundary = "lifecycle-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f\"\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    app.router
        .clone()
        .oneshot(
            Request::post(format!("/upload?id={file_id}"))
                .header("x-filedrop-user", user.to_string())
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

/// Polls until the hash worker lands the file in a settled state
async fn wait_for_state(app: &TestApp, file_id: FileId, want: FileState) {
    for _ in 0..200 {
        let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
        if file.state() == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("file never reached {want:?}");
}

async fn issue_link(
    app: &TestApp,
    user: UserId,
    file_id: FileId,
    ttl_seconds: i64,
    single_use: bool,
) -> serde_json::Value {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/links")
                .header("x-filedrop-user", user.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "id": file_id,
                        "ttl_seconds": ttl_seconds,
                        "single_use": single_use,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await
}

async fn download(app: &TestApp, token: &str) -> axum::response::Response {
    app.router
        .clone()
        .oneshot(
            Request::get(format!("/download?token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_hello_world() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    // Reserve 11 bytes.
    let response = reserve(&app, user, "hello.txt", 11, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // Upload the body and let the worker hash it.
    assert_eq!(upload(&app, user, file_id, b"Hello World").await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(
        file.digest_hex().unwrap().as_str(),
        "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e"
    );
    assert_eq!(file.digest_bytes(), Some(11));

    // Link and download: bytes come back byte-equal with the metadata
    // headers.
    let link = issue_link(&app, user, file_id, 3600, false).await;
    assert!(link["url"].as_str().unwrap().starts_with("https://drop.test/download?token="));

    let response = download(&app, link["token"].as_str().unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("hello.txt"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"Hello World");

    // Fire-and-forget stats land shortly after.
    for _ in 0..100 {
        let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
        if file.download_count() == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("download count never recorded");
}

#[tokio::test]
async fn test_zero_byte_upload_gets_empty_digest() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "empty.txt", 0, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, b"").await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(
        file.digest_hex().unwrap().as_str(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

// ============================================================================
// Refusal paths
// ============================================================================

#[tokio::test]
async fn test_quota_enforcement_at_reserve() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, Some(100)).await;

    // Existing ready file of 80 bytes.
    let response = reserve(&app, user, "eighty.bin", 80, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, &[0u8; 80]).await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    // 30 more does not fit; 20 does.
    let response = reserve(&app, user, "thirty.bin", 30, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response_json(response).await["error"], "quota_exceeded");

    let response = reserve(&app, user, "twenty.bin", 20, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_size_ceiling_rejected_before_any_row() {
    let app = spawn_app(
        |config| config.upload.max_upload_bytes = 1000,
        false,
    )
    .await;
    let user = register_user(&app, None).await;

    // Exactly at the ceiling is fine.
    let response = reserve(&app, user, "exact.bin", 1000, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // One byte more is refused.
    let response = reserve(&app, user, "over.bin", 1001, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response_json(response).await["error"], "size_exceeded");
}

#[tokio::test]
async fn test_duplicate_reservation_in_window() {
    let app = spawn_app(|_| {}, false).await;
    let user = register_user(&app, None).await;

    let first = reserve(&app, user, "dup.bin", 7, serde_json::json!({})).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = reserve(&app, user, "dup.bin", 7, serde_json::json!({})).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(second).await["error"], "duplicate_in_window");
}

#[tokio::test]
async fn test_upload_overrun_is_size_mismatch() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "short.bin", 5, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let status = upload(&app, user, file_id, b"way more than five bytes").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The reservation failed terminally and no object survived.
    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.state(), FileState::Failed);
    assert_eq!(app.objects.object_count(), 0);
}

#[tokio::test]
async fn test_upload_underrun_is_size_mismatch() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "long.bin", 100, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let status = upload(&app, user, file_id, b"tiny").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.state(), FileState::Failed);
}

#[tokio::test]
async fn test_upload_requires_pending_state() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "twice.bin", 3, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, b"abc").await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    // A second body hits a non-pending file.
    assert_eq!(upload(&app, user, file_id, b"abc").await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unauthenticated_and_forbidden() {
    let app = spawn_app(|_| {}, true).await;
    let alice = register_user(&app, None).await;
    let mallory = register_user(&app, None).await;

    // No principal header at all.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/files")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({"orig_name": "x", "content_type": "a/b", "size_bytes": 1})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-correlation-id"));

    // Mallory cannot delete Alice's file.
    let response = reserve(&app, alice, "hers.bin", 1, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::delete(format!("/user/files/{file_id}"))
                .header("x-filedrop-user", mallory.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_can_delete_anything() {
    let app = spawn_app(|_| {}, true).await;
    let alice = register_user(&app, None).await;
    let admin = User::new(UserId::new(), None, true);
    app.metadata.upsert_user(&admin).await.unwrap();

    let response = reserve(&app, alice, "hers.bin", 1, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::delete(format!("/user/files/{file_id}"))
                .header("x-filedrop-user", admin.id().to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.metadata.get_file(file_id).await.unwrap().is_none());
}

// ============================================================================
// Tokens, passwords, single-use
// ============================================================================

#[tokio::test]
async fn test_expired_token_is_refused() {
    use filedrop_core::ports::{ILinkSigner, LinkClaims};
    use filedrop_token::HmacLinkSigner;

    let app = spawn_app(|_| {}, true).await;

    // Forge nothing: sign a genuinely expired token with the real key.
    let signer = HmacLinkSigner::new(SIGNING_SECRET.as_bytes().to_vec());
    let token = signer
        .issue(&LinkClaims {
            file_id: FileId::new(),
            expires_at: Utc::now() - chrono::Duration::seconds(5),
            nonce: [1u8; 16],
            password_salt: None,
        })
        .unwrap();

    let response = download(&app, &token).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(response_json(response).await["error"], "link_expired");
}

#[tokio::test]
async fn test_tampered_token_is_refused() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "t.bin", 3, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, b"abc").await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    let link = issue_link(&app, user, file_id, 3600, false).await;
    let mut token = link["token"].as_str().unwrap().to_string();
    // Flip a character near the MAC.
    let flipped = if token.ends_with('A') { 'B' } else { 'A' };
    token.pop();
    token.push(flipped);

    let response = download(&app, &token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response_json(response).await["error"], "token_invalid");
}

#[tokio::test]
async fn test_password_gated_download() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(
        &app,
        user,
        "locked.bin",
        6,
        serde_json::json!({"password": "open sesame"}),
    )
    .await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, b"secret").await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    let link = issue_link(&app, user, file_id, 3600, false).await;
    let token = link["token"].as_str().unwrap();

    // No password: required.
    let response = download(&app, token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["error"], "password_required");

    // Wrong password: incorrect.
    let post = |password: &str| {
        app.router.clone().oneshot(
            Request::post(format!("/download?token={token}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({"password": password}).to_string(),
                ))
                .unwrap(),
        )
    };
    let response = post("wrong").await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response_json(response).await["error"], "password_incorrect");

    // Right password: payload.
    let response = post("open sesame").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"secret");
}

#[tokio::test]
async fn test_single_use_link_consumes() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "once.bin", 4, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, b"once").await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    let link = issue_link(&app, user, file_id, 3600, true).await;
    let token = link["token"].as_str().unwrap();

    assert_eq!(download(&app, token).await.status(), StatusCode::OK);
    assert_eq!(download(&app, token).await.status(), StatusCode::GONE);

    // A regular link on the same file keeps working.
    let link = issue_link(&app, user, file_id, 3600, false).await;
    let token = link["token"].as_str().unwrap();
    assert_eq!(download(&app, token).await.status(), StatusCode::OK);
    assert_eq!(download(&app, token).await.status(), StatusCode::OK);
}

// ============================================================================
// Integrity and the reaper
// ============================================================================

#[tokio::test]
async fn test_integrity_mismatch_fails_file_and_removes_object() {
    // No worker: the hash step is driven by hand after tampering.
    let app = spawn_app(|_| {}, false).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "tampered.bin", 5, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, b"12345").await, StatusCode::OK);

    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.state(), FileState::Stored);

    // The object shrinks behind the engine's back.
    app.objects
        .put(file.object_key(), bytestream_from(&b"123"[..]))
        .await
        .unwrap();

    let hasher = HashFileUseCase::new(
        Arc::clone(&app.state.metadata),
        app.state.objects.clone(),
        Arc::new(Sha256DigestProvider::new()),
    );
    hasher
        .execute(file_id, &filedrop_core::usecases::RequestMeta::internal())
        .await
        .unwrap();

    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.state(), FileState::Failed);
    assert!(app.objects.stat(file.object_key()).await.unwrap().is_none());

    // Any token for it now dead-ends in NotFound.
    use filedrop_core::ports::{ILinkSigner, LinkClaims};
    let signer = filedrop_token::HmacLinkSigner::new(SIGNING_SECRET.as_bytes().to_vec());
    let token = signer
        .issue(&LinkClaims {
            file_id,
            expires_at: Utc::now() + chrono::Duration::minutes(5),
            nonce: [2u8; 16],
            password_salt: None,
        })
        .unwrap();
    assert_eq!(download(&app, &token).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reaper_removes_expired_files() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(
        &app,
        user,
        "fleeting.bin",
        4,
        serde_json::json!({
            "expires_at": Utc::now() + chrono::Duration::milliseconds(50),
            "auto_delete": true,
        }),
    )
    .await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(upload(&app, user, file_id, b"gone").await, StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    // A link issued before expiry outlives the file.
    let link = issue_link(&app, user, file_id, 3600, false).await;
    let token = link["token"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(80)).await;
    let summary = app.state.cleanup.sweep(Utc::now()).await.unwrap();
    assert_eq!(summary.expired_removed, 1);
    assert!(app.metadata.get_file(file_id).await.unwrap().is_none());
    assert_eq!(app.objects.object_count(), 0);

    // The still-unexpired token now reports the file gone.
    let response = download(&app, &token).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(response_json(response).await["error"], "file_gone");

    // Idempotence: a second sweep changes nothing.
    let summary = app.state.cleanup.sweep(Utc::now()).await.unwrap();
    assert_eq!(summary.expired_removed, 0);
}

#[tokio::test]
async fn test_reaper_fails_stale_pending_and_purges_failed() {
    let app = spawn_app(
        |config| config.cleanup.max_age_secs = 0,
        false,
    )
    .await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "abandoned.bin", 9, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // max_age 0: the pending row is immediately stale.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let summary = app.state.cleanup.sweep(Utc::now()).await.unwrap();
    assert_eq!(summary.pending_failed, 1);
    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.state(), FileState::Failed);

    // With failed retention also zero, the next sweep purges the row.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let summary = app.state.cleanup.sweep(Utc::now()).await.unwrap();
    assert_eq!(summary.failed_purged, 1);
    assert!(app.metadata.get_file(file_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_orphan_scan_removes_unreferenced_objects() {
    let app = spawn_app(|_| {}, false).await;

    // An object nothing references.
    let orphan_key = filedrop_core::domain::ObjectKey::generate();
    app.objects
        .put(&orphan_key, bytestream_from(&b"garbage"[..]))
        .await
        .unwrap();

    let summary = app.state.cleanup.sweep(Utc::now()).await.unwrap();
    assert_eq!(summary.orphans_removed, 1);
    assert_eq!(app.objects.object_count(), 0);
}

// ============================================================================
// Resumable sessions
// ============================================================================

#[tokio::test]
async fn test_resumable_session_roundtrip() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "chunked.bin", 10, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // Open.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/upload/sessions")
                .header("x-filedrop-user", user.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({"file_id": file_id}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let session = response_json(response).await;
    let session_id = session["session_id"].as_str().unwrap().to_string();

    // A single final chunk carrying all ten bytes.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::put(format!("/upload/sessions/{session_id}"))
                .header("x-filedrop-user", user.to_string())
                .body(Body::from(&b"0123456789"[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["current_size"], 10);

    // Complete: file finalizes and hashes like a single-shot upload.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::post(format!("/upload/sessions/{session_id}/complete"))
                .header("x-filedrop-user", user.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_state(&app, file_id, FileState::Ready).await;

    let link = issue_link(&app, user, file_id, 600, false).await;
    let response = download(&app, link["token"].as_str().unwrap()).await;
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"0123456789");
}

#[tokio::test]
async fn test_session_abort_fails_file() {
    let app = spawn_app(|_| {}, false).await;
    let user = register_user(&app, None).await;

    let response = reserve(&app, user, "aborted.bin", 10, serde_json::json!({})).await;
    let file_id: FileId = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/upload/sessions")
                .header("x-filedrop-user", user.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({"file_id": file_id}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = response_json(response).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::delete(format!("/upload/sessions/{session_id}"))
                .header("x-filedrop-user", user.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let file = app.metadata.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.state(), FileState::Failed);
}

// ============================================================================
// Rate limiting and quota endpoint
// ============================================================================

#[tokio::test]
async fn test_upload_class_rate_limit() {
    let app = spawn_app(
        |config| {
            config.rate_limits.upload_burst = 2;
            config.rate_limits.upload_per_hour = 1;
        },
        false,
    )
    .await;
    let user = register_user(&app, None).await;

    assert_eq!(
        reserve(&app, user, "a.bin", 1, serde_json::json!({}))
            .await
            .status(),
        StatusCode::CREATED
    );
    assert_eq!(
        reserve(&app, user, "b.bin", 1, serde_json::json!({}))
            .await
            .status(),
        StatusCode::CREATED
    );

    let response = reserve(&app, user, "c.bin", 1, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(response_json(response).await["error"], "rate_limited");
}

#[tokio::test]
async fn test_quota_endpoint_reports_usage() {
    let app = spawn_app(|_| {}, true).await;
    let user = register_user(&app, Some(500)).await;

    let response = reserve(&app, user, "counted.bin", 123, serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/quota")
                .header("x-filedrop-user", user.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["used_bytes"], 123);
    assert_eq!(body["limit_bytes"], 500);
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = spawn_app(|_| {}, false).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["metadata"]["healthy"], true);
    assert_eq!(body["object_store"]["healthy"], true);
}
