//! The HTTP surface: HMAC-authenticated JSON API over axum.
//!
//! Every route except `/healthz` sits behind the signature middleware;
//! a request only reaches its handler after the MAC validated and its
//! nonce was consumed.

pub mod error;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use {axum::Router, tower_http::trace::TraceLayer};

use {stint_service::RequestService, stint_signing::Verifier};

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RequestService>,
    pub verifier: Arc<Verifier>,
}

impl AppState {
    pub fn new(service: Arc<RequestService>, verifier: Arc<Verifier>) -> Self {
        Self { service, verifier }
    }
}

/// Assemble the full router.
pub fn build_router(state: AppState) -> Router {
    let signed = routes::api_router().layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::require_signature,
    ));

    Router::new()
        .route("/healthz", axum::routing::get(routes::healthz))
        .merge(signed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
