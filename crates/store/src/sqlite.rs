//! SQLite-backed store: schema, bindings, audit events, and nonces.
//!
//! Request operations live in [`crate::requests`].

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use {
    stint_protocol::{
        audit::{AuditEvent, AuditEventType},
        binding::ChannelBinding,
        now_secs,
    },
    stint_signing::NonceStore,
};

use crate::error::{Error, Result};

/// The durable store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Open (or create) a database at `url` and initialize the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// In-memory database on a single connection, for tests and dev.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bindings (
                channel_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                approver_ids TEXT NOT NULL,
                allow_self_approval INTEGER NOT NULL DEFAULT 0,
                max_request_hours INTEGER NOT NULL DEFAULT 4,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (channel_id, account_id)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bindings_account ON bindings(account_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS requests (
                request_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                requester_chat_id TEXT NOT NULL,
                requester_email TEXT NOT NULL,
                ticket TEXT,
                reason TEXT,
                requested_duration_minutes INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                identity_user_id TEXT NOT NULL,
                approved_at INTEGER,
                denied_at INTEGER,
                grant_time INTEGER,
                revoked_at INTEGER,
                expired_at INTEGER,
                approver_chat_id TEXT,
                approver_email TEXT,
                error_details TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_requests_channel ON requests(channel_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_requests_account ON requests(account_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_requests_email ON requests(requester_email, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_requests_expiry ON requests(status, end_time)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_events (
                request_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                event_time INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                account_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                actor_chat_id TEXT NOT NULL,
                actor_email TEXT NOT NULL,
                details TEXT NOT NULL,
                PRIMARY KEY (request_id, event_time, event_id)
            )",
        )
        .execute(&self.pool)
        .await?;
        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_audit_account ON audit_events(account_id, event_time)",
            "CREATE INDEX IF NOT EXISTS idx_audit_channel ON audit_events(channel_id, event_time)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nonces (
                key_id TEXT NOT NULL,
                nonce TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (key_id, nonce)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ── Bindings ─────────────────────────────────────────────────────────────────

impl Store {
    /// Insert or replace the binding for `(channel_id, account_id)`.
    /// The caller is responsible for the one-channel-per-account rule;
    /// use [`Store::find_binding_for_account`] to check it.
    pub async fn put_binding(&self, binding: &ChannelBinding) -> Result<()> {
        let approvers = serde_json::to_string(&binding.approver_ids)?;
        sqlx::query(
            "INSERT INTO bindings
                (channel_id, account_id, approver_ids, allow_self_approval, max_request_hours, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(channel_id, account_id) DO UPDATE SET
                approver_ids = excluded.approver_ids,
                allow_self_approval = excluded.allow_self_approval,
                max_request_hours = excluded.max_request_hours,
                updated_at = excluded.updated_at",
        )
        .bind(&binding.channel_id)
        .bind(&binding.account_id)
        .bind(&approvers)
        .bind(binding.allow_self_approval)
        .bind(binding.max_request_hours)
        .bind(binding.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_binding(
        &self,
        channel_id: &str,
        account_id: &str,
    ) -> Result<Option<ChannelBinding>> {
        let row = sqlx::query(
            "SELECT channel_id, account_id, approver_ids, allow_self_approval, max_request_hours, updated_at
             FROM bindings WHERE channel_id = ? AND account_id = ?",
        )
        .bind(channel_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_binding).transpose()
    }

    /// The binding currently holding `account_id`, regardless of channel.
    pub async fn find_binding_for_account(&self, account_id: &str) -> Result<Option<ChannelBinding>> {
        let row = sqlx::query(
            "SELECT channel_id, account_id, approver_ids, allow_self_approval, max_request_hours, updated_at
             FROM bindings WHERE account_id = ? LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_binding).transpose()
    }

    pub async fn list_bindings_for_channel(&self, channel_id: &str) -> Result<Vec<ChannelBinding>> {
        let rows = sqlx::query(
            "SELECT channel_id, account_id, approver_ids, allow_self_approval, max_request_hours, updated_at
             FROM bindings WHERE channel_id = ? ORDER BY account_id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_binding).collect()
    }

    /// Remove a binding. Not exposed over the API; this is the
    /// out-of-band operator action.
    pub async fn delete_binding(&self, channel_id: &str, account_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM bindings WHERE channel_id = ? AND account_id = ?")
            .bind(channel_id)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace the approver list on every binding of `channel_id`,
    /// returning the updated bindings.
    pub async fn set_channel_approvers(
        &self,
        channel_id: &str,
        approver_ids: &[String],
        updated_at: i64,
    ) -> Result<Vec<ChannelBinding>> {
        let approvers = serde_json::to_string(approver_ids)?;
        sqlx::query("UPDATE bindings SET approver_ids = ?, updated_at = ? WHERE channel_id = ?")
            .bind(&approvers)
            .bind(updated_at)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        self.list_bindings_for_channel(channel_id).await
    }
}

// ── Audit ────────────────────────────────────────────────────────────────────

impl Store {
    /// Unconditional insert. The `(request_id, event_time, event_id)`
    /// key keeps events ordered and unique; nothing ever updates them.
    pub async fn append_audit(&self, event: &AuditEvent) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;
        sqlx::query(
            "INSERT INTO audit_events
                (request_id, event_id, event_time, event_type, account_id, channel_id,
                 actor_chat_id, actor_email, details)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.request_id)
        .bind(&event.event_id)
        .bind(event.event_time)
        .bind(event.event_type.as_str())
        .bind(&event.account_id)
        .bind(&event.channel_id)
        .bind(&event.actor_chat_id)
        .bind(&event.actor_email)
        .bind(&details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Events for one request, chronological.
    pub async fn audit_for_request(&self, request_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT request_id, event_id, event_time, event_type, account_id, channel_id,
                    actor_chat_id, actor_email, details
             FROM audit_events WHERE request_id = ?
             ORDER BY event_time, event_id",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_audit).collect()
    }

    /// Most recent events touching an account (compliance scans).
    pub async fn audit_for_account(&self, account_id: &str, limit: i64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT request_id, event_id, event_time, event_type, account_id, channel_id,
                    actor_chat_id, actor_email, details
             FROM audit_events WHERE account_id = ?
             ORDER BY event_time DESC, event_id DESC LIMIT ?",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_audit).collect()
    }

    /// Most recent events raised from a channel (compliance scans).
    pub async fn audit_for_channel(&self, channel_id: &str, limit: i64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT request_id, event_id, event_time, event_type, account_id, channel_id,
                    actor_chat_id, actor_email, details
             FROM audit_events WHERE channel_id = ?
             ORDER BY event_time DESC, event_id DESC LIMIT ?",
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_audit).collect()
    }
}

// ── Nonces ───────────────────────────────────────────────────────────────────

impl Store {
    /// Record `(key_id, nonce)` until `expires_at`. Returns `false`
    /// when the pair already exists. Expired rows for the key are
    /// purged opportunistically on each write.
    pub async fn put_nonce(
        &self,
        key_id: &str,
        nonce: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<bool> {
        sqlx::query("DELETE FROM nonces WHERE key_id = ? AND expires_at <= ?")
            .bind(key_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let inserted = sqlx::query("INSERT INTO nonces (key_id, nonce, expires_at) VALUES (?, ?, ?)")
            .bind(key_id)
            .bind(nonce)
            .bind(expires_at)
            .execute(&self.pool)
            .await;
        match inserted {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn nonce_seen(&self, key_id: &str, nonce: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM nonces WHERE key_id = ? AND nonce = ?")
            .bind(key_id)
            .bind(nonce)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl NonceStore for Store {
    async fn seen(&self, key_id: &str, nonce: &str) -> anyhow::Result<bool> {
        Ok(self.nonce_seen(key_id, nonce).await?)
    }

    async fn insert(&self, key_id: &str, nonce: &str, expires_at: i64) -> anyhow::Result<bool> {
        Ok(self.put_nonce(key_id, nonce, expires_at, now_secs()).await?)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────────

fn row_to_binding(row: sqlx::sqlite::SqliteRow) -> Result<ChannelBinding> {
    let approvers_raw: String = row.get("approver_ids");
    let approver_ids: Vec<String> = serde_json::from_str(&approvers_raw)?;
    Ok(ChannelBinding {
        channel_id: row.get("channel_id"),
        account_id: row.get("account_id"),
        approver_ids,
        allow_self_approval: row.get("allow_self_approval"),
        max_request_hours: row.get("max_request_hours"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_audit(row: sqlx::sqlite::SqliteRow) -> Result<AuditEvent> {
    let type_raw: String = row.get("event_type");
    let event_type = AuditEventType::parse(&type_raw)
        .ok_or_else(|| Error::corrupt_row(format!("unknown audit event type {type_raw:?}")))?;
    let details_raw: String = row.get("details");
    Ok(AuditEvent {
        request_id: row.get("request_id"),
        event_id: row.get("event_id"),
        event_time: row.get("event_time"),
        event_type,
        account_id: row.get("account_id"),
        channel_id: row.get("channel_id"),
        actor_chat_id: row.get("actor_chat_id"),
        actor_email: row.get("actor_email"),
        details: serde_json::from_str(&details_raw)?,
    })
}
