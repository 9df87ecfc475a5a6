//! Outbound signed callbacks to the chat plugin.
//!
//! Transitions to GRANTED, REVOKED, EXPIRED, and ERROR are delivered
//! to the configured webhook URL as signed JSON posts. Delivery is
//! best-effort: bounded retries, then a logged failure — a lost
//! callback never changes request state.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    thiserror::Error,
    tracing::{debug, warn},
};

use {
    stint_protocol::api::CallbackPayload,
    stint_signing::{HEADER_KEY_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, Signer},
};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook URL is invalid: {0}")]
    BadUrl(String),

    #[error("callback not delivered after {attempts} attempts: {last}")]
    DeliveryFailed { attempts: usize, last: String },

    #[error(transparent)]
    Signing(#[from] stint_signing::SigningError),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;

/// Where callbacks go. The workflow and service only see this trait;
/// tests substitute a recorder.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<()>;
}

/// Sink for deployments without a webhook: logs and drops.
pub struct NullSink;

#[async_trait]
impl CallbackSink for NullSink {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<()> {
        debug!(
            request_id = %payload.request_id,
            status = %payload.status,
            "no webhook configured, dropping callback"
        );
        Ok(())
    }
}

/// Signed webhook delivery over HTTP.
pub struct WebhookSender {
    client: reqwest::Client,
    url: reqwest::Url,
    path: String,
    signer: Signer,
    retry_schedule: Vec<Duration>,
}

impl WebhookSender {
    pub fn new(webhook_url: &str, signer: Signer) -> Result<Self> {
        let url: reqwest::Url =
            webhook_url.parse().map_err(|_| NotifyError::BadUrl(webhook_url.to_string()))?;
        let path = url.path().to_string();
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            path,
            signer,
            retry_schedule: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        })
    }

    /// Override the retry schedule (tests).
    pub fn with_retry_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.retry_schedule = schedule;
        self
    }

    async fn post_once(&self, body: &[u8]) -> std::result::Result<(), String> {
        // Each attempt gets a fresh nonce and timestamp; re-sending an
        // already-delivered signature would be rejected as a replay.
        let headers = self
            .signer
            .sign("POST", &self.path, body)
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .post(self.url.clone())
            .header("content-type", "application/json")
            .header(HEADER_KEY_ID, &headers.key_id)
            .header(HEADER_TIMESTAMP, &headers.timestamp)
            .header(HEADER_NONCE, &headers.nonce)
            .header(HEADER_SIGNATURE, &headers.signature)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        match response.error_for_status() {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl CallbackSink for WebhookSender {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let attempts = self.retry_schedule.len() + 1;
        let mut last = String::new();

        for (attempt, backoff) in std::iter::once(None)
            .chain(self.retry_schedule.iter().map(Some))
            .enumerate()
        {
            if let Some(delay) = backoff {
                tokio::time::sleep(*delay).await;
            }
            match self.post_once(&body).await {
                Ok(()) => {
                    debug!(
                        request_id = %payload.request_id,
                        status = %payload.status,
                        attempt = attempt + 1,
                        "callback delivered"
                    );
                    return Ok(());
                },
                Err(reason) => {
                    warn!(
                        request_id = %payload.request_id,
                        status = %payload.status,
                        attempt = attempt + 1,
                        %reason,
                        "callback attempt failed"
                    );
                    last = reason;
                },
            }
        }

        Err(NotifyError::DeliveryFailed { attempts, last })
    }
}

/// Convenience for the common `Arc<dyn CallbackSink>` wiring.
pub fn null_sink() -> Arc<dyn CallbackSink> {
    Arc::new(NullSink)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        collections::HashSet,
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use {
        axum::{
            Router,
            body::Bytes,
            extract::State,
            http::{HeaderMap, StatusCode},
            routing::post,
        },
        tokio::net::TcpListener,
    };

    use {
        stint_protocol::{api::CallbackPayload, now_secs, request::RequestStatus},
        stint_signing::{InboundHeaders, KeySet, NonceStore, Verifier},
    };

    use super::*;

    #[derive(Default)]
    struct MemoryNonces {
        seen: Mutex<HashSet<(String, String)>>,
    }

    #[async_trait]
    impl NonceStore for MemoryNonces {
        async fn seen(&self, key_id: &str, nonce: &str) -> anyhow::Result<bool> {
            Ok(self
                .seen
                .lock()
                .unwrap()
                .contains(&(key_id.to_string(), nonce.to_string())))
        }

        async fn insert(&self, key_id: &str, nonce: &str, _expires_at: i64) -> anyhow::Result<bool> {
            Ok(self
                .seen
                .lock()
                .unwrap()
                .insert((key_id.to_string(), nonce.to_string())))
        }
    }

    #[derive(Clone)]
    struct Captured {
        hits: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
        fail_first: Arc<Mutex<usize>>,
    }

    async fn hook(State(state): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
        {
            let mut remaining = state.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
        state.hits.lock().unwrap().push((headers, body));
        StatusCode::OK
    }

    async fn start_receiver(fail_first: usize) -> (SocketAddr, Captured) {
        let state = Captured {
            hits: Arc::new(Mutex::new(Vec::new())),
            fail_first: Arc::new(Mutex::new(fail_first)),
        };
        let app = Router::new().route("/hook", post(hook)).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state)
    }

    fn payload() -> CallbackPayload {
        CallbackPayload {
            request_id: "r1".into(),
            status: RequestStatus::Granted,
            account_id: "123456789012".into(),
            channel_id: "ch1".into(),
            actor: "system".into(),
            details: Default::default(),
        }
    }

    fn sender(addr: SocketAddr, keys: Arc<KeySet>) -> WebhookSender {
        WebhookSender::new(&format!("http://{addr}/hook"), Signer::new(keys))
            .unwrap()
            .with_retry_schedule(vec![Duration::from_millis(5), Duration::from_millis(5)])
    }

    #[tokio::test]
    async fn test_delivered_callback_verifies() {
        let (addr, captured) = start_receiver(0).await;
        let keys = Arc::new(KeySet::single("k1", "secret").unwrap());
        sender(addr, Arc::clone(&keys)).deliver(&payload()).await.unwrap();

        let hits = captured.hits.lock().unwrap().clone();
        assert_eq!(hits.len(), 1);
        let (headers, body) = &hits[0];

        let verifier = Verifier::new(keys, Arc::new(MemoryNonces::default()));
        let inbound = InboundHeaders {
            key_id: headers.get(HEADER_KEY_ID).and_then(|v| v.to_str().ok()),
            timestamp: headers.get(HEADER_TIMESTAMP).and_then(|v| v.to_str().ok()),
            nonce: headers.get(HEADER_NONCE).and_then(|v| v.to_str().ok()),
            signature: headers.get(HEADER_SIGNATURE).and_then(|v| v.to_str().ok()),
        };
        verifier
            .verify(inbound, "POST", "/hook", body, now_secs())
            .await
            .unwrap();

        let decoded: CallbackPayload = serde_json::from_slice(body).unwrap();
        assert_eq!(decoded, payload());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (addr, captured) = start_receiver(2).await;
        let keys = Arc::new(KeySet::single("k1", "secret").unwrap());
        sender(addr, keys).deliver(&payload()).await.unwrap();
        assert_eq!(captured.hits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_schedule() {
        let (addr, captured) = start_receiver(10).await;
        let keys = Arc::new(KeySet::single("k1", "secret").unwrap());
        let err = sender(addr, keys).deliver(&payload()).await.unwrap_err();
        match err {
            NotifyError::DeliveryFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(captured.hits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_sink_accepts_everything() {
        NullSink.deliver(&payload()).await.unwrap();
    }
}
