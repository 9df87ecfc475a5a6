//! HMAC signature middleware.

use {
    axum::{
        body::Body,
        extract::{Request, State},
        http::{HeaderMap, StatusCode},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    tracing::warn,
};

use {
    stint_protocol::now_secs,
    stint_signing::{
        HEADER_KEY_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, InboundHeaders,
    },
};

use crate::AppState;

/// Requests larger than this are rejected before verification.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// Verify the four signature headers against the canonical message
/// before any handler runs. The signed path is the path as received
/// by this router; deployments must not rewrite it in between.
pub async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer request body");
            return unauthorized("unreadable request body");
        },
    };

    let inbound = inbound_headers(&parts.headers);
    let path = parts.uri.path().to_string();
    match state
        .verifier
        .verify(inbound, parts.method.as_str(), &path, &bytes, now_secs())
        .await
    {
        Ok(_key_id) => {
            let request = Request::from_parts(parts, Body::from(bytes));
            next.run(request).await
        },
        Err(e) => {
            warn!(method = %parts.method, path = %path, reason = %e, "rejected unsigned or invalid request");
            unauthorized(&e.to_string())
        },
    }
}

/// Header lookup is case-insensitive by construction of `HeaderMap`.
fn inbound_headers(headers: &HeaderMap) -> InboundHeaders<'_> {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    InboundHeaders {
        key_id: get(HEADER_KEY_ID),
        timestamp: get(HEADER_TIMESTAMP),
        nonce: get(HEADER_NONCE),
        signature: get(HEADER_SIGNATURE),
    }
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": reason })),
    )
        .into_response()
}
