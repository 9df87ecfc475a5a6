#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end API tests: a real server on a loopback port, driven by a
//! signing HTTP client, with the in-memory directory behind the
//! identity gateway.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;

use {
    stint_gateway::{AppState, build_router},
    stint_identity::{DirectoryClient, IdentityGateway, MemoryDirectory, PollSettings},
    stint_notify::NullSink,
    stint_protocol::request::RequestStatus,
    stint_service::RequestService,
    stint_signing::{
        HEADER_KEY_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, KeySet, Signer, Verifier,
    },
    stint_store::Store,
    stint_workflow::{Orchestrator, RetryPolicy},
};

struct TestServer {
    addr: SocketAddr,
    client: reqwest::Client,
    signer: Signer,
    store: Store,
    directory: Arc<MemoryDirectory>,
}

impl TestServer {
    /// Spin up a server with the given key spec, on a fresh store.
    async fn start(key_spec: &str) -> Self {
        let store = Store::in_memory().await.unwrap();
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_user("idp-u-r", "r@example.com", "r@example.com");
        Self::start_with(key_spec, store, directory).await
    }

    /// Spin up a server sharing an existing store and directory
    /// (used by the rotation tests to simulate a key-set reload).
    async fn start_with(key_spec: &str, store: Store, directory: Arc<MemoryDirectory>) -> Self {
        let keys = Arc::new(KeySet::from_spec(key_spec, None).unwrap());
        let identity = IdentityGateway::with_settings(
            Arc::clone(&directory) as Arc<dyn DirectoryClient>,
            PollSettings::fast(),
        );
        let orchestrator = Orchestrator::with_retry(
            store.clone(),
            identity.clone(),
            Arc::new(NullSink),
            RetryPolicy::fast(),
        );
        let service = Arc::new(RequestService::new(
            store.clone(),
            identity,
            Arc::new(NullSink),
            Arc::new(orchestrator),
        ));
        let verifier = Arc::new(Verifier::new(Arc::clone(&keys), Arc::new(store.clone())));
        let app = build_router(AppState::new(service, verifier));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            signer: Signer::new(keys),
            store,
            directory,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Sign and send. Only the path is part of the canonical message;
    /// query parameters ride outside the signature.
    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: serde_json::Value,
    ) -> reqwest::Response {
        let bytes = if body.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&body).unwrap()
        };
        let headers = self.signer.sign(method.as_str(), path, &bytes).unwrap();

        let mut request = self
            .client
            .request(method, self.url(path))
            .header(HEADER_KEY_ID, &headers.key_id)
            .header(HEADER_TIMESTAMP, &headers.timestamp)
            .header(HEADER_NONCE, &headers.nonce)
            .header(HEADER_SIGNATURE, &headers.signature);
        if !query.is_empty() {
            request = request.query(query);
        }
        if !bytes.is_empty() {
            request = request.header("content-type", "application/json").body(bytes);
        }
        request.send().await.unwrap()
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.send(reqwest::Method::POST, path, &[], body).await
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> reqwest::Response {
        self.send(reqwest::Method::GET, path, query, serde_json::Value::Null)
            .await
    }

    async fn bind_channel(&self) {
        let response = self
            .post(
                "/config/bind",
                serde_json::json!({
                    "channelId": "ch1",
                    "accountId": "123456789012",
                    "approverIds": ["u_a"],
                }),
            )
            .await;
        assert_eq!(response.status(), 200);
    }

    async fn create_request(&self) -> serde_json::Value {
        let response = self
            .post(
                "/requests",
                serde_json::json!({
                    "accountId": "123456789012",
                    "channelId": "ch1",
                    "requesterChatId": "u_r",
                    "requesterEmail": "r@example.com",
                    "ticket": "OPS-1234",
                    "requestedDurationMinutes": 60,
                }),
            )
            .await;
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    async fn wait_for_status(&self, id: &str, status: RequestStatus) -> serde_json::Value {
        for _ in 0..500 {
            let response = self.get(&format!("/requests/{id}"), &[]).await;
            assert_eq!(response.status(), 200);
            let body: serde_json::Value = response.json().await.unwrap();
            if body["status"] == status.as_str() {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("request {id} never reached {status}");
    }
}

fn actor(chat_id: &str) -> serde_json::Value {
    serde_json::json!({
        "actorChatId": chat_id,
        "actorEmail": format!("{chat_id}@example.com"),
    })
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_approve_grant_flow() {
    let server = TestServer::start("top-secret").await;
    server.bind_channel().await;

    let request = server.create_request().await;
    assert_eq!(request["status"], "PENDING");
    let id = request["requestId"].as_str().unwrap().to_string();

    let response = server
        .post(&format!("/requests/{id}/approve"), actor("u_a"))
        .await;
    assert_eq!(response.status(), 200);

    // The orchestrator takes it from APPROVED to GRANTED.
    let granted = server.wait_for_status(&id, RequestStatus::Granted).await;
    assert!(granted["grantTime"].is_i64());
    assert!(server.directory.has_assignment("123456789012", "idp-u-r"));

    let events = server.store.audit_for_request(&id).await.unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["REQUESTED", "APPROVED", "GRANTED"]);
}

#[tokio::test]
async fn test_manual_revoke_flow() {
    let server = TestServer::start("top-secret").await;
    server.bind_channel().await;
    let request = server.create_request().await;
    let id = request["requestId"].as_str().unwrap().to_string();

    server
        .post(&format!("/requests/{id}/approve"), actor("u_a"))
        .await;
    server.wait_for_status(&id, RequestStatus::Granted).await;

    let response = server
        .post(&format!("/requests/{id}/revoke"), actor("u_a"))
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "REVOKED");
    assert!(!server.directory.has_assignment("123456789012", "idp-u-r"));

    // Revoking again is an idempotent success.
    let again = server
        .post(&format!("/requests/{id}/revoke"), actor("u_a"))
        .await;
    assert_eq!(again.status(), 200);
    assert_eq!(
        again.json::<serde_json::Value>().await.unwrap()["status"],
        "REVOKED"
    );
}

// ── Authorization ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_self_approval_blocked() {
    let server = TestServer::start("top-secret").await;
    let response = server
        .post(
            "/config/bind",
            serde_json::json!({
                "channelId": "ch1",
                "accountId": "123456789012",
                "approverIds": ["u_r", "u_other"],
                "allowSelfApproval": false,
            }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let request = server.create_request().await;
    let id = request["requestId"].as_str().unwrap();

    let response = server
        .post(&format!("/requests/{id}/approve"), actor("u_r"))
        .await;
    assert_eq!(response.status(), 403);

    // Still pending, and no APPROVED audit was written.
    let body = server.get(&format!("/requests/{id}"), &[]).await;
    assert_eq!(body.json::<serde_json::Value>().await.unwrap()["status"], "PENDING");
    let events = server.store.audit_for_request(id).await.unwrap();
    assert!(events.iter().all(|e| e.event_type.as_str() != "APPROVED"));
}

#[tokio::test]
async fn test_non_approver_forbidden() {
    let server = TestServer::start("top-secret").await;
    server.bind_channel().await;
    let request = server.create_request().await;
    let id = request["requestId"].as_str().unwrap();

    let response = server
        .post(&format!("/requests/{id}/deny"), actor("u_stranger"))
        .await;
    assert_eq!(response.status(), 403);
}

// ── Validation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_duration_over_limit_rejected() {
    let server = TestServer::start("top-secret").await;
    let response = server
        .post(
            "/config/bind",
            serde_json::json!({
                "channelId": "ch1",
                "accountId": "123456789012",
                "approverIds": ["u_a"],
                "maxRequestHours": 1,
            }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let response = server
        .post(
            "/requests",
            serde_json::json!({
                "accountId": "123456789012",
                "channelId": "ch1",
                "requesterChatId": "u_r",
                "requesterEmail": "r@example.com",
                "reason": "deploy",
                "requestedDurationMinutes": 120,
            }),
        )
        .await;
    assert_eq!(response.status(), 400);

    // No request row persisted.
    let list = server.get("/requests", &[("channelId", "ch1")]).await;
    let page: serde_json::Value = list.json().await.unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_request_404() {
    let server = TestServer::start("top-secret").await;
    let response = server.get("/requests/nope", &[]).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_approve_twice_conflicts() {
    let server = TestServer::start("top-secret").await;
    server.bind_channel().await;
    let request = server.create_request().await;
    let id = request["requestId"].as_str().unwrap();

    let first = server.post(&format!("/requests/{id}/approve"), actor("u_a")).await;
    assert_eq!(first.status(), 200);
    let second = server.post(&format!("/requests/{id}/approve"), actor("u_a")).await;
    assert_eq!(second.status(), 409);
}

#[tokio::test]
async fn test_list_requires_a_selector() {
    let server = TestServer::start("top-secret").await;
    let response = server.get("/requests", &[]).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_list_accepts_snake_case_aliases() {
    let server = TestServer::start("top-secret").await;
    server.bind_channel().await;
    server.create_request().await;

    let response = server.get("/requests", &[("channel_id", "ch1")]).await;
    assert_eq!(response.status(), 200);
    let page: serde_json::Value = response.json().await.unwrap();
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["filters"]["channelId"], "ch1");
}

#[tokio::test]
async fn test_config_accounts_listing() {
    let server = TestServer::start("top-secret").await;
    server.bind_channel().await;

    let response = server.get("/config/accounts", &[("channelId", "ch1")]).await;
    assert_eq!(response.status(), 200);
    let bindings: serde_json::Value = response.json().await.unwrap();
    assert_eq!(bindings[0]["accountId"], "123456789012");
}

// ── Authentication ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unsigned_request_rejected() {
    let server = TestServer::start("top-secret").await;
    let response = server
        .client
        .get(server.url("/requests/whatever"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_healthz_is_unsigned() {
    let server = TestServer::start("top-secret").await;
    let response = server.client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_tampered_body_rejected() {
    let server = TestServer::start("top-secret").await;
    let headers = server.signer.sign("POST", "/config/bind", b"{}").unwrap();
    let response = server
        .client
        .post(server.url("/config/bind"))
        .header(HEADER_KEY_ID, &headers.key_id)
        .header(HEADER_TIMESTAMP, &headers.timestamp)
        .header(HEADER_NONCE, &headers.nonce)
        .header(HEADER_SIGNATURE, &headers.signature)
        .header("content-type", "application/json")
        .body(r#"{"channelId": "evil"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_replayed_request_rejected() {
    let server = TestServer::start("top-secret").await;

    let body = serde_json::json!({
        "channelId": "ch1",
        "accountId": "123456789012",
        "approverIds": ["u_a"],
    });
    let bytes = serde_json::to_vec(&body).unwrap();
    let headers = server.signer.sign("POST", "/config/bind", &bytes).unwrap();

    let send_captured = || async {
        server
            .client
            .post(server.url("/config/bind"))
            .header(HEADER_KEY_ID, &headers.key_id)
            .header(HEADER_TIMESTAMP, &headers.timestamp)
            .header(HEADER_NONCE, &headers.nonce)
            .header(HEADER_SIGNATURE, &headers.signature)
            .header("content-type", "application/json")
            .body(bytes.clone())
            .send()
            .await
            .unwrap()
    };

    // The original goes through; the captured replay does not.
    assert_eq!(send_captured().await.status(), 200);
    let replayed = send_captured().await;
    assert_eq!(replayed.status(), 401);
    let error: serde_json::Value = replayed.json().await.unwrap();
    assert!(error["error"].as_str().unwrap().contains("nonce"));

    // And it caused no duplicate side effects.
    let bindings = server.store.list_bindings_for_channel("ch1").await.unwrap();
    assert_eq!(bindings.len(), 1);
}

#[tokio::test]
async fn test_key_rotation_overlap() {
    // Phase 1: only k1 exists.
    let server_k1 = TestServer::start(r#"{"k1": "alpha"}"#).await;
    server_k1.bind_channel().await;

    // Phase 2: k2 is added; the same store now validates both keys.
    let server_both = TestServer::start_with(
        r#"{"k1": "alpha", "k2": "beta"}"#,
        server_k1.store.clone(),
        Arc::clone(&server_k1.directory),
    )
    .await;

    let old_signer = Signer::new(Arc::new(KeySet::from_spec(r#"{"k1": "alpha"}"#, None).unwrap()));
    let new_signer = Signer::new(Arc::new(KeySet::from_spec(r#"{"k2": "beta"}"#, None).unwrap()));

    for signer in [&old_signer, &new_signer] {
        let headers = signer.sign("GET", "/config/accounts", b"").unwrap();
        let response = server_both
            .client
            .get(server_both.url("/config/accounts"))
            .query(&[("channelId", "ch1")])
            .header(HEADER_KEY_ID, &headers.key_id)
            .header(HEADER_TIMESTAMP, &headers.timestamp)
            .header(HEADER_NONCE, &headers.nonce)
            .header(HEADER_SIGNATURE, &headers.signature)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // Phase 3: k1 is removed; only k2 validates.
    let server_k2 = TestServer::start_with(
        r#"{"k2": "beta"}"#,
        server_k1.store.clone(),
        Arc::clone(&server_k1.directory),
    )
    .await;

    let headers = old_signer.sign("GET", "/config/accounts", b"").unwrap();
    let response = server_k2
        .client
        .get(server_k2.url("/config/accounts"))
        .query(&[("channelId", "ch1")])
        .header(HEADER_KEY_ID, &headers.key_id)
        .header(HEADER_TIMESTAMP, &headers.timestamp)
        .header(HEADER_NONCE, &headers.nonce)
        .header(HEADER_SIGNATURE, &headers.signature)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let headers = new_signer.sign("GET", "/config/accounts", b"").unwrap();
    let response = server_k2
        .client
        .get(server_k2.url("/config/accounts"))
        .query(&[("channelId", "ch1")])
        .header(HEADER_KEY_ID, &headers.key_id)
        .header(HEADER_TIMESTAMP, &headers.timestamp)
        .header(HEADER_NONCE, &headers.nonce)
        .header(HEADER_SIGNATURE, &headers.signature)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}
