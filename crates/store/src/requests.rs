//! Request persistence: conditional create, conditional status
//! updates, and the indexed listing queries.

use sqlx::Row;

use stint_protocol::request::{AccessRequest, Justification, RequestStatus};

use crate::{
    error::{Error, Result},
    query::{Cursor, Page, RequestQuery},
    sqlite::Store,
};

/// Fields a transition may set alongside the status. Only the fields
/// the specific transition owns should be populated; everything else
/// stays untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub approved_at: Option<i64>,
    pub denied_at: Option<i64>,
    pub grant_time: Option<i64>,
    pub revoked_at: Option<i64>,
    pub expired_at: Option<i64>,
    pub approver_chat_id: Option<String>,
    pub approver_email: Option<String>,
    pub error_details: Option<String>,
}

impl Store {
    /// Conditional create: fails with a duplicate error when
    /// `request_id` already exists.
    pub async fn create_request(&self, request: &AccessRequest) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO requests
                (request_id, account_id, channel_id, requester_chat_id, requester_email,
                 ticket, reason, requested_duration_minutes, status, created_at, end_time,
                 identity_user_id, approved_at, denied_at, grant_time, revoked_at, expired_at,
                 approver_chat_id, approver_email, error_details)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.request_id)
        .bind(&request.account_id)
        .bind(&request.channel_id)
        .bind(&request.requester_chat_id)
        .bind(&request.requester_email)
        .bind(&request.justification.ticket)
        .bind(&request.justification.reason)
        .bind(request.requested_duration_minutes)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.end_time)
        .bind(&request.identity_user_id)
        .bind(request.approved_at)
        .bind(request.denied_at)
        .bind(request.grant_time)
        .bind(request.revoked_at)
        .bind(request.expired_at)
        .bind(&request.approver_chat_id)
        .bind(&request.approver_email)
        .bind(&request.error_details)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::duplicate_request(&request.request_id))
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_request(&self, request_id: &str) -> Result<Option<AccessRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE request_id = ?"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_request).transpose()
    }

    /// The sole mechanism for advancing a request's state: applies the
    /// update only when the stored status equals `expected`. On a
    /// precondition failure, returns [`Error::StatusConflict`] carrying
    /// the actual status (or [`Error::RequestNotFound`] if the row is
    /// gone). Returns the updated row on success.
    pub async fn transition(
        &self,
        request_id: &str,
        expected: RequestStatus,
        new_status: RequestStatus,
        fields: TransitionFields,
    ) -> Result<AccessRequest> {
        let mut sets = vec!["status = ?"];
        if fields.approved_at.is_some() {
            sets.push("approved_at = ?");
        }
        if fields.denied_at.is_some() {
            sets.push("denied_at = ?");
        }
        if fields.grant_time.is_some() {
            sets.push("grant_time = ?");
        }
        if fields.revoked_at.is_some() {
            sets.push("revoked_at = ?");
        }
        if fields.expired_at.is_some() {
            sets.push("expired_at = ?");
        }
        if fields.approver_chat_id.is_some() {
            sets.push("approver_chat_id = ?");
        }
        if fields.approver_email.is_some() {
            sets.push("approver_email = ?");
        }
        if fields.error_details.is_some() {
            sets.push("error_details = ?");
        }
        let sql = format!(
            "UPDATE requests SET {} WHERE request_id = ? AND status = ?",
            sets.join(", ")
        );

        let mut q = sqlx::query(&sql).bind(new_status.as_str());
        if let Some(v) = fields.approved_at {
            q = q.bind(v);
        }
        if let Some(v) = fields.denied_at {
            q = q.bind(v);
        }
        if let Some(v) = fields.grant_time {
            q = q.bind(v);
        }
        if let Some(v) = fields.revoked_at {
            q = q.bind(v);
        }
        if let Some(v) = fields.expired_at {
            q = q.bind(v);
        }
        if let Some(v) = fields.approver_chat_id {
            q = q.bind(v);
        }
        if let Some(v) = fields.approver_email {
            q = q.bind(v);
        }
        if let Some(v) = fields.error_details {
            q = q.bind(v);
        }
        let result = q.bind(request_id).bind(expected.as_str()).execute(&self.pool).await?;

        if result.rows_affected() > 0 {
            return self
                .get_request(request_id)
                .await?
                .ok_or_else(|| Error::request_not_found(request_id));
        }

        // Precondition failed: distinguish a missing row from a stale
        // expectation so callers can tell "gone" from "lost the race".
        match self.get_request(request_id).await? {
            None => Err(Error::request_not_found(request_id)),
            Some(actual) => Err(Error::StatusConflict {
                request_id: request_id.to_string(),
                expected,
                actual: actual.status,
            }),
        }
    }

    /// Listing query. Requires at least one selector; newest first.
    pub async fn list_requests(&self, query: &RequestQuery) -> Result<Page<AccessRequest>> {
        if !query.has_selector() {
            return Err(Error::UnfilteredQuery);
        }

        let mut clauses: Vec<&str> = Vec::new();
        if query.channel_id.is_some() {
            clauses.push("channel_id = ?");
        }
        if query.account_id.is_some() {
            clauses.push("account_id = ?");
        }
        if query.requester_email.is_some() {
            clauses.push("requester_email = ?");
        }
        if query.status.is_some() {
            clauses.push("status = ?");
        }
        if query.created_after.is_some() {
            clauses.push("created_at >= ?");
        }
        if query.created_before.is_some() {
            clauses.push("created_at <= ?");
        }

        let mut sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE {}",
            clauses.join(" AND ")
        );
        if query.cursor.is_some() {
            sql.push_str(" AND (created_at < ? OR (created_at = ? AND request_id < ?))");
        }
        sql.push_str(" ORDER BY created_at DESC, request_id DESC LIMIT ?");

        let page_size = query.page_size();

        let mut q = sqlx::query(&sql);
        for value in [
            query.channel_id.as_deref(),
            query.account_id.as_deref(),
            query.requester_email.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            q = q.bind(value.to_string());
        }
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        if let Some(after) = query.created_after {
            q = q.bind(after);
        }
        if let Some(before) = query.created_before {
            q = q.bind(before);
        }
        if let Some(ref cursor) = query.cursor {
            q = q
                .bind(cursor.created_at)
                .bind(cursor.created_at)
                .bind(cursor.request_id.clone());
        }
        // Fetch one extra row to learn whether another page exists.
        q = q.bind(page_size + 1);

        let rows = q.fetch_all(&self.pool).await?;
        let mut items: Vec<AccessRequest> = rows
            .into_iter()
            .map(row_to_request)
            .collect::<Result<_>>()?;

        let next = if items.len() as i64 > page_size {
            items.truncate(page_size as usize);
            items.last().map(|last| Cursor {
                created_at: last.created_at,
                request_id: last.request_id.clone(),
            })
        } else {
            None
        };

        Ok(Page { items, next })
    }

    /// Grants whose end time has passed: the reconciler's work list.
    pub async fn expired_grants(&self, now: i64) -> Result<Vec<AccessRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests
             WHERE status = ? AND end_time <= ?
             ORDER BY end_time",
        ))
        .bind(RequestStatus::Granted.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_request).collect()
    }

    /// All requests currently in `status` (used to resume in-flight
    /// workflow executions at startup).
    pub async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<AccessRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE status = ? ORDER BY created_at",
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_request).collect()
    }
}

const REQUEST_COLUMNS: &str = "request_id, account_id, channel_id, requester_chat_id, \
     requester_email, ticket, reason, requested_duration_minutes, status, created_at, \
     end_time, identity_user_id, approved_at, denied_at, grant_time, revoked_at, \
     expired_at, approver_chat_id, approver_email, error_details";

fn row_to_request(row: sqlx::sqlite::SqliteRow) -> Result<AccessRequest> {
    let status_raw: String = row.get("status");
    let status = RequestStatus::parse(&status_raw)
        .ok_or_else(|| Error::corrupt_row(format!("unknown request status {status_raw:?}")))?;
    Ok(AccessRequest {
        request_id: row.get("request_id"),
        account_id: row.get("account_id"),
        channel_id: row.get("channel_id"),
        requester_chat_id: row.get("requester_chat_id"),
        requester_email: row.get("requester_email"),
        justification: Justification {
            ticket: row.get("ticket"),
            reason: row.get("reason"),
        },
        requested_duration_minutes: row.get("requested_duration_minutes"),
        status,
        created_at: row.get("created_at"),
        end_time: row.get("end_time"),
        identity_user_id: row.get("identity_user_id"),
        approved_at: row.get("approved_at"),
        denied_at: row.get("denied_at"),
        grant_time: row.get("grant_time"),
        revoked_at: row.get("revoked_at"),
        expired_at: row.get("expired_at"),
        approver_chat_id: row.get("approver_chat_id"),
        approver_email: row.get("approver_email"),
        error_details: row.get("error_details"),
    })
}
