//! SQLite message store for dmsync-relay.

use super::{Profile, StoreStats};
use crate::config::Config;
use crate::error::{StorageError, StorageResult};
use crate::feed::FeedHub;
use crate::server::RelayMetrics;
use async_trait::async_trait;
use dmsync_client::{MessageStore, ProfileDirectory, Session, Subscription};
use dmsync_types::{
    BulkReadReceipt, DmError, LiveEvent, MarkOutcome, Message, MessageId, Pair, Timestamp, UserId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Default size of the connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Longest accepted display name, in characters.
const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// SQLite-backed message store.
///
/// Uses WAL mode for concurrent reads. Every write goes through one gate
/// that also stamps commit times, so `created_at` never runs backwards and
/// the change feed sees events in commit order.
///
/// Clones share the pool, feed and gate; each clone carries its own session.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    hub: FeedHub,
    write_gate: Arc<Mutex<Timestamp>>,
    metrics: Arc<RelayMetrics>,
    session: Session,
}

impl SqliteStore {
    /// Open (or create) a database file with default pool and feed sizes.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        Self::open(
            path,
            DEFAULT_MAX_CONNECTIONS,
            dmsync_client::DEFAULT_FEED_CAPACITY,
        )
        .await
    }

    /// Open the database named by the relay configuration.
    pub async fn from_config(config: &Config) -> StorageResult<Self> {
        Self::open(
            &config.storage.database,
            config.storage.max_connections,
            config.feed.capacity,
        )
        .await
    }

    /// Open (or create) a database file.
    pub async fn open(
        path: &Path,
        max_connections: u32,
        feed_capacity: usize,
    ) -> StorageResult<Self> {
        if path.as_os_str().is_empty() || path.to_str().is_none() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        Self::with_pool(pool, feed_capacity).await
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        Self::in_memory_with_feed_capacity(dmsync_client::DEFAULT_FEED_CAPACITY).await
    }

    /// Create an in-memory store whose subscribers lag after `capacity` events.
    pub async fn in_memory_with_feed_capacity(capacity: usize) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection that is never recycled: the database lives in it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        Self::with_pool(pool, capacity).await
    }

    async fn with_pool(pool: SqlitePool, feed_capacity: usize) -> StorageResult<Self> {
        run_migrations(&pool).await?;

        let last_created: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(created_at), 0) FROM messages")
                .fetch_one(&pool)
                .await
                .map_err(StorageError::Database)?;

        let metrics = Arc::new(RelayMetrics::default());
        Ok(Self {
            pool,
            hub: FeedHub::new(feed_capacity, Arc::clone(&metrics)),
            write_gate: Arc::new(Mutex::new(Timestamp::from_millis(last_created))),
            metrics,
            session: Session::anonymous(),
        })
    }

    /// A handle on the same database acting for `session`.
    pub fn with_session(&self, session: Session) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }

    /// A handle on the same database verified as `user`.
    pub fn session_for(&self, user: UserId) -> Self {
        self.with_session(Session::verified(user))
    }

    /// Counters shared by every handle on this database.
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// The change-feed hub.
    pub fn hub(&self) -> &FeedHub {
        &self.hub
    }

    /// Row counts.
    pub async fn stats(&self) -> StorageResult<StoreStats> {
        let (messages, unread, profiles): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM messages),
                (SELECT COUNT(*) FROM messages WHERE read_at IS NULL),
                (SELECT COUNT(*) FROM profiles)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(StoreStats {
            messages: messages as u64,
            unread: unread as u64,
            profiles: profiles as u64,
        })
    }

    // ===========================================
    // Profiles
    // ===========================================

    /// Register `user` under `display_name`, or rename them.
    ///
    /// Names are unique; a name held by someone else is a validation error.
    pub async fn upsert_profile(
        &self,
        user: UserId,
        display_name: &str,
    ) -> Result<Profile, DmError> {
        self.session.require(user)?;
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(DmError::Validation("display name cannot be empty".into()));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(DmError::Validation(format!(
                "display name exceeds {} characters",
                MAX_DISPLAY_NAME_CHARS
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO profiles (user_id, display_name)
            VALUES (?1, ?2)
            ON CONFLICT(user_id) DO UPDATE SET display_name = excluded.display_name
            "#,
        )
        .bind(user.as_bytes())
        .bind(display_name)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(user = %user, display_name, "profile saved");
                Ok(Profile {
                    user_id: user,
                    display_name: display_name.to_string(),
                })
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(DmError::Validation(
                format!("display name {:?} is taken", display_name),
            )),
            Err(e) => Err(self.fail("upsert_profile", StorageError::Database(e))),
        }
    }

    /// Every registered profile, ordered by name.
    pub async fn profiles(&self) -> Result<Vec<Profile>, DmError> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id, display_name FROM profiles ORDER BY display_name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.fail("profiles", e.into()))?;

        rows.into_iter()
            .map(Profile::try_from)
            .collect::<StorageResult<Vec<_>>>()
            .map_err(|e| self.fail("profiles", e))
    }

    /// The profile registered under `display_name`, if any.
    pub async fn find_profile(&self, display_name: &str) -> Result<Option<Profile>, DmError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id, display_name FROM profiles WHERE display_name = ?1",
        )
        .bind(display_name.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.fail("find_profile", e.into()))?;

        row.map(Profile::try_from)
            .transpose()
            .map_err(|e| self.fail("find_profile", e))
    }

    // ===========================================
    // Row access
    // ===========================================

    async fn insert_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
        created_at: Timestamp,
    ) -> StorageResult<Message> {
        let pair = Pair::new(sender_id, receiver_id);
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (sender_id, receiver_id, pair_low, pair_high, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(sender_id.as_bytes())
        .bind(receiver_id.as_bytes())
        .bind(pair.low().as_bytes())
        .bind(pair.high().as_bytes())
        .bind(content)
        .bind(created_at.as_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(Message {
            id: MessageId::new(id as u64),
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at,
            read_at: None,
        })
    }

    async fn pair_rows(&self, pair: Pair) -> StorageResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender_id, receiver_id, content, created_at, read_at
            FROM messages
            WHERE pair_low = ?1 AND pair_high = ?2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(pair.low().as_bytes())
        .bind(pair.high().as_bytes())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn get_message(&self, id: i64) -> StorageResult<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender_id, receiver_id, content, created_at, read_at
            FROM messages
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(Message::try_from).transpose()
    }

    async fn mark_sender_rows(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
        now: Timestamp,
    ) -> StorageResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages SET read_at = ?1
            WHERE receiver_id = ?2 AND sender_id = ?3 AND read_at IS NULL
            RETURNING id, sender_id, receiver_id, content, created_at, read_at
            "#,
        )
        .bind(now.as_millis())
        .bind(receiver_id.as_bytes())
        .bind(sender_id.as_bytes())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        let mut marked = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<StorageResult<Vec<_>>>()?;
        marked.sort_by_key(|m| m.id);
        Ok(marked)
    }

    async fn mark_row(
        &self,
        id: i64,
        receiver_id: UserId,
        now: Timestamp,
    ) -> StorageResult<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages SET read_at = ?1
            WHERE id = ?2 AND receiver_id = ?3 AND read_at IS NULL
            RETURNING id, sender_id, receiver_id, content, created_at, read_at
            "#,
        )
        .bind(now.as_millis())
        .bind(id)
        .bind(receiver_id.as_bytes())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(Message::try_from).transpose()
    }

    async fn latest_rows(&self, user: UserId) -> StorageResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT m.id, m.sender_id, m.receiver_id, m.content, m.created_at, m.read_at
            FROM messages m
            WHERE (m.sender_id = ?1 OR m.receiver_id = ?1)
              AND NOT EXISTS (
                  SELECT 1 FROM messages n
                  WHERE n.pair_low = m.pair_low
                    AND n.pair_high = m.pair_high
                    AND (n.created_at > m.created_at
                         OR (n.created_at = m.created_at AND n.id > m.id))
              )
            ORDER BY m.created_at DESC, m.id DESC
            "#,
        )
        .bind(user.as_bytes())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn unread_rows(&self, user: UserId) -> StorageResult<Vec<MessageId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM messages WHERE receiver_id = ?1 AND read_at IS NULL ORDER BY id ASC",
        )
        .bind(user.as_bytes())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(ids.into_iter().map(|id| MessageId::new(id as u64)).collect())
    }

    async fn names_for(&self, ids: &[UserId]) -> StorageResult<HashMap<UserId, String>> {
        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT user_id, display_name FROM profiles WHERE user_id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.as_bytes().to_vec());
        }
        separated.push_unseparated(")");

        let rows = query
            .build_query_as::<ProfileRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        rows.into_iter()
            .map(|row| Profile::try_from(row).map(|p| (p.user_id, p.display_name)))
            .collect()
    }

    /// Record a storage failure and convert it for callers.
    fn fail(&self, operation: &'static str, e: StorageError) -> DmError {
        self.metrics.store_errors.fetch_add(1, Ordering::Relaxed);
        error!(operation, error = %e, "storage operation failed");
        e.into()
    }
}

/// Advance the write clock and return the commit time.
fn tick(last: &mut Timestamp) -> Timestamp {
    let now = Timestamp::now().max(*last);
    *last = now;
    now
}

fn not_found(id: MessageId) -> DmError {
    DmError::NotFound(format!("message {}", id))
}

/// Create tables and indexes.
async fn run_migrations(pool: &SqlitePool) -> StorageResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id BLOB NOT NULL,
            receiver_id BLOB NOT NULL,
            pair_low BLOB NOT NULL,
            pair_high BLOB NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            read_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(StorageError::Database)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            user_id BLOB PRIMARY KEY,
            display_name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(StorageError::Database)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(pair_low, pair_high, created_at, id)",
    )
    .execute(pool)
    .await
    .map_err(StorageError::Database)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(receiver_id, read_at)",
    )
    .execute(pool)
    .await
    .map_err(StorageError::Database)?;

    Ok(())
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn session(&self) -> &Session {
        &self.session
    }

    async fn send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, DmError> {
        self.session.require(sender_id)?;
        Message::validate_content(content)?;
        if sender_id == receiver_id {
            return Err(DmError::Validation(
                "cannot send a message to yourself".into(),
            ));
        }

        let mut last = self.write_gate.lock().await;
        let created_at = tick(&mut last);
        let message = self
            .insert_message(sender_id, receiver_id, content, created_at)
            .await
            .map_err(|e| self.fail("send", e))?;

        self.hub.publish(&LiveEvent::Created(message.clone()));
        drop(last);

        self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %message.id, sender = %sender_id, receiver = %receiver_id, "message stored");
        Ok(message)
    }

    async fn history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<Message>, DmError> {
        self.session.require_any(&[user_a, user_b])?;
        self.pair_rows(Pair::new(user_a, user_b))
            .await
            .map_err(|e| self.fail("history", e))
    }

    async fn mark_read_bulk(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
    ) -> Result<BulkReadReceipt, DmError> {
        self.session.require(receiver_id)?;

        let mut last = self.write_gate.lock().await;
        let now = tick(&mut last);
        let transitioned = self
            .mark_sender_rows(receiver_id, sender_id, now)
            .await
            .map_err(|e| self.fail("mark_read_bulk", e))?;
        for row in &transitioned {
            self.hub.publish(&LiveEvent::Updated(row.clone()));
        }
        drop(last);

        self.metrics.bulk_marks.fetch_add(1, Ordering::Relaxed);
        if transitioned.is_empty() {
            self.metrics.noop_marks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics
                .rows_marked_read
                .fetch_add(transitioned.len() as u64, Ordering::Relaxed);
            debug!(receiver = %receiver_id, sender = %sender_id, count = transitioned.len(), "marked conversation read");
        }
        Ok(BulkReadReceipt { transitioned })
    }

    async fn mark_read_one(
        &self,
        message_id: MessageId,
        expected_receiver_id: UserId,
    ) -> Result<MarkOutcome, DmError> {
        self.session.require(expected_receiver_id)?;
        let Ok(id) = i64::try_from(message_id.value()) else {
            return Err(not_found(message_id));
        };

        let mut last = self.write_gate.lock().await;
        let now = tick(&mut last);
        let marked = self
            .mark_row(id, expected_receiver_id, now)
            .await
            .map_err(|e| self.fail("mark_read_one", e))?;

        let outcome = match marked {
            Some(row) => {
                self.hub.publish(&LiveEvent::Updated(row.clone()));
                MarkOutcome::Transitioned(row)
            }
            None => {
                let current = self
                    .get_message(id)
                    .await
                    .map_err(|e| self.fail("mark_read_one", e))?;
                match current {
                    None => return Err(not_found(message_id)),
                    Some(row) if row.receiver_id != expected_receiver_id => {
                        if !row.involves(expected_receiver_id) {
                            return Err(not_found(message_id));
                        }
                        MarkOutcome::NotAddressed(row)
                    }
                    Some(row) => MarkOutcome::AlreadyRead(row),
                }
            }
        };
        drop(last);

        self.metrics.single_marks.fetch_add(1, Ordering::Relaxed);
        if outcome.transitioned() {
            self.metrics.rows_marked_read.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.noop_marks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    async fn recent_per_peer(&self, user: UserId) -> Result<Vec<Message>, DmError> {
        self.session.require(user)?;
        self.latest_rows(user)
            .await
            .map_err(|e| self.fail("recent_per_peer", e))
    }

    async fn unread_count(&self, user: UserId) -> Result<u64, DmError> {
        self.session.require(user)?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read_at IS NULL",
        )
        .bind(user.as_bytes())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.fail("unread_count", e.into()))?;

        Ok(count as u64)
    }

    async fn unread_ids(&self, user: UserId) -> Result<Vec<MessageId>, DmError> {
        self.session.require(user)?;
        self.unread_rows(user)
            .await
            .map_err(|e| self.fail("unread_ids", e))
    }

    async fn subscribe(&self, user: UserId) -> Result<Subscription, DmError> {
        self.session.require(user)?;
        Ok(self.hub.subscribe(user))
    }
}

#[async_trait]
impl ProfileDirectory for SqliteStore {
    async fn display_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, DmError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.names_for(ids)
            .await
            .map_err(|e| self.fail("display_names", e))
    }
}

/// Internal row type for message queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sender_id: Vec<u8>,
    receiver_id: Vec<u8>,
    content: String,
    created_at: i64,
    read_at: Option<i64>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |column| StorageError::CorruptRow { id, column };
        Ok(Message {
            id: MessageId::new(u64::try_from(id).map_err(|_| corrupt("id"))?),
            sender_id: UserId::from_bytes(&row.sender_id).ok_or_else(|| corrupt("sender_id"))?,
            receiver_id: UserId::from_bytes(&row.receiver_id)
                .ok_or_else(|| corrupt("receiver_id"))?,
            created_at: Timestamp::from_millis(row.created_at),
            read_at: row.read_at.map(Timestamp::from_millis),
            content: row.content,
        })
    }
}

/// Internal row type for profile queries.
#[derive(sqlx::FromRow)]
struct ProfileRow {
    user_id: Vec<u8>,
    display_name: String,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StorageError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            user_id: UserId::from_bytes(&row.user_id).ok_or(StorageError::CorruptRow {
                id: 0,
                column: "user_id",
            })?,
            display_name: row.display_name,
        })
    }
}
