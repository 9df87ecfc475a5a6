//! Listing queries and pagination cursors.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use stint_protocol::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, request::RequestStatus};

use crate::error::{Error, Result};

/// A resolved listing query. At least one selector must be set; the
/// store rejects unfiltered enumeration. Time bounds are epoch seconds
/// on `created_at`, inclusive.
#[derive(Debug, Clone, Default)]
pub struct RequestQuery {
    pub channel_id: Option<String>,
    pub account_id: Option<String>,
    pub requester_email: Option<String>,
    pub status: Option<RequestStatus>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub limit: Option<i64>,
    pub cursor: Option<Cursor>,
}

impl RequestQuery {
    pub fn has_selector(&self) -> bool {
        self.channel_id.is_some()
            || self.account_id.is_some()
            || self.requester_email.is_some()
            || self.status.is_some()
    }

    /// Effective page size: requested, clamped to `[1, MAX_PAGE_SIZE]`.
    pub fn page_size(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// Position of the last row of the previous page. Rows are ordered
/// `created_at DESC, request_id DESC`, so the token is deterministic
/// for identical queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: i64,
    pub request_id: String,
}

impl Cursor {
    /// Opaque wire form: URL-safe base64 of `created_at:request_id`.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.created_at, self.request_id))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| Error::BadPageToken)?;
        let text = String::from_utf8(raw).map_err(|_| Error::BadPageToken)?;
        let (ts, id) = text.split_once(':').ok_or(Error::BadPageToken)?;
        let created_at: i64 = ts.parse().map_err(|_| Error::BadPageToken)?;
        if id.is_empty() {
            return Err(Error::BadPageToken);
        }
        Ok(Self {
            created_at,
            request_id: id.to_string(),
        })
    }
}

/// One page of results plus the cursor for the next, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Cursor>,
}
