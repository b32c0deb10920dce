//! Durable translation cache
//!
//! Rows are unique on `(original_text, target_lang, content_type)`; inserting
//! a colliding row replaces the old one. The SQLite store runs every statement
//! on the blocking pool, so a mutation is committed once its future resolves.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::Error::FromSqlConversionFailure;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::errors::Result;
use crate::core::models::{ContentType, EngineKind, NewTranslation, TranslationRecord};

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i32 = 2;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS translation_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_text TEXT NOT NULL,
    translated_text TEXT NOT NULL,
    source_lang TEXT NOT NULL,
    target_lang TEXT NOT NULL,
    content_type TEXT NOT NULL,
    video_code TEXT,
    timestamp INTEGER NOT NULL,
    api_key_fingerprint TEXT NOT NULL DEFAULT '',
    chars_consumed INTEGER NOT NULL DEFAULT 0,
    UNIQUE (original_text, target_lang, content_type)
);
CREATE INDEX IF NOT EXISTS idx_translation_cache_video
    ON translation_cache(video_code);
CREATE INDEX IF NOT EXISTS idx_translation_cache_timestamp
    ON translation_cache(timestamp);";

const SELECT_COLUMNS: &str = "SELECT id, original_text, translated_text, source_lang, target_lang,
        content_type, video_code, timestamp, engine_used, api_key_fingerprint, chars_consumed
     FROM translation_cache";

/// Storage contract used by the orchestrator
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Exact-match lookup
    async fn get(
        &self,
        original: &str,
        target_lang: &str,
        content_type: ContentType,
    ) -> Result<Option<TranslationRecord>>;

    /// Upsert by the lookup key; returns the row id
    async fn insert(&self, record: NewTranslation) -> Result<i64>;

    /// Records tagged with a video code, newest first
    async fn get_by_video_code(&self, video_code: &str) -> Result<Vec<TranslationRecord>>;

    /// Every record, newest first
    async fn get_all(&self) -> Result<Vec<TranslationRecord>>;

    /// Live view of every record, newest first, refreshed after each mutation
    async fn watch_all(&self) -> Result<watch::Receiver<Vec<TranslationRecord>>>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn delete_by_content_type(&self, content_type: ContentType) -> Result<usize>;

    async fn delete_all(&self) -> Result<usize>;

    /// Billable characters charged to a key fingerprint within `[from, to]`
    async fn chars_consumed(
        &self,
        fingerprint: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64>;
}

/// SQLite-backed cache store.
///
/// The live record list is only re-queried while someone holds a receiver
/// from [`CacheStore::watch_all`].
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
    all_tx: Arc<watch::Sender<Vec<TranslationRecord>>>,
}

impl SqliteCacheStore {
    /// Open (or create) the cache database at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::from_connection(conn)?;
        info!(path = %db_path.display(), "translation cache opened");
        Ok(store)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        let (all_tx, _) = watch::channel(Vec::new());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            all_tx: Arc::new(all_tx),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await?
    }

    /// Run a mutation and, if anyone is watching, republish the live record
    /// list under the same lock
    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let all_tx = Arc::clone(&self.all_tx);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let value = f(&conn)?;
            if all_tx.receiver_count() > 0 {
                publish(&conn, &all_tx);
            }
            Ok(value)
        })
        .await?
    }
}

/// Replace the live list; the mutation already committed, so a failed
/// re-query only leaves watchers one update behind
fn publish(conn: &Connection, all_tx: &watch::Sender<Vec<TranslationRecord>>) {
    match query_all(conn) {
        Ok(records) => {
            all_tx.send_replace(records);
        }
        Err(e) => warn!("failed to refresh live cache view: {}", e),
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(
        &self,
        original: &str,
        target_lang: &str,
        content_type: ContentType,
    ) -> Result<Option<TranslationRecord>> {
        let original = original.to_string();
        let target_lang = target_lang.to_string();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!(
                        "{} WHERE original_text = ?1 AND target_lang = ?2 AND content_type = ?3",
                        SELECT_COLUMNS
                    ),
                    params![original, target_lang, content_type.as_str()],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn insert(&self, record: NewTranslation) -> Result<i64> {
        let id = self
            .mutate(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO translation_cache
                     (original_text, translated_text, source_lang, target_lang, content_type,
                      video_code, timestamp, engine_used, api_key_fingerprint, chars_consumed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.original_text,
                        record.translated_text,
                        record.source_lang,
                        record.target_lang,
                        record.content_type.as_str(),
                        record.video_code,
                        record.timestamp.timestamp_millis(),
                        record.engine_used.as_str(),
                        record.api_key_fingerprint,
                        record.chars_consumed as i64,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        debug!(id, "cache record written");
        Ok(id)
    }

    async fn get_by_video_code(&self, video_code: &str) -> Result<Vec<TranslationRecord>> {
        let video_code = video_code.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE video_code = ?1 ORDER BY timestamp DESC, id DESC",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![video_code], record_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<TranslationRecord>> {
        self.with_conn(query_all).await
    }

    async fn watch_all(&self) -> Result<watch::Receiver<Vec<TranslationRecord>>> {
        // subscribe before querying so no mutation slips between the two
        let mut receiver = self.all_tx.subscribe();
        let all_tx = Arc::clone(&self.all_tx);
        self.with_conn(move |conn| {
            all_tx.send_replace(query_all(conn)?);
            Ok(())
        })
        .await?;
        drop(receiver.borrow_and_update());
        Ok(receiver)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.mutate(move |conn| {
            Ok(conn.execute("DELETE FROM translation_cache WHERE id = ?1", params![id])? > 0)
        })
        .await
    }

    async fn delete_by_content_type(&self, content_type: ContentType) -> Result<usize> {
        let removed = self
            .mutate(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM translation_cache WHERE content_type = ?1",
                    params![content_type.as_str()],
                )?)
            })
            .await?;
        info!(removed, content_type = %content_type, "cache pruned by content type");
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<usize> {
        let removed = self
            .mutate(|conn| Ok(conn.execute("DELETE FROM translation_cache", [])?))
            .await?;
        info!(removed, "cache cleared");
        Ok(removed)
    }

    async fn chars_consumed(
        &self,
        fingerprint: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        let fingerprint = fingerprint.to_string();
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(chars_consumed), 0) FROM translation_cache
                 WHERE api_key_fingerprint = ?1 AND timestamp >= ?2 AND timestamp <= ?3",
                params![fingerprint, from.timestamp_millis(), to.timestamp_millis()],
                |row| row.get(0),
            )?;
            Ok(total.max(0) as u64)
        })
        .await
    }
}

/// Bring any earlier schema up to [`SCHEMA_VERSION`]
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLE)?;

    let has_engine_column = conn
        .prepare("PRAGMA table_info(translation_cache)")?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|name| name == "engine_used");

    if !has_engine_column {
        // rows written before the engine column existed came from the remote API
        conn.execute_batch(
            "ALTER TABLE translation_cache
             ADD COLUMN engine_used TEXT NOT NULL DEFAULT 'REMOTE_API';",
        )?;
        info!("translation cache upgraded to schema {}", SCHEMA_VERSION);
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn query_all(conn: &Connection) -> Result<Vec<TranslationRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{} ORDER BY timestamp DESC, id DESC",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([], record_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TranslationRecord> {
    let content_type: String = row.get(5)?;
    let content_type: ContentType = content_type
        .parse()
        .map_err(|e| FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    let engine_used: String = row.get(8)?;
    let engine_used: EngineKind = engine_used
        .parse()
        .map_err(|e| FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let timestamp: i64 = row.get(7)?;
    let chars_consumed: i64 = row.get(10)?;

    Ok(TranslationRecord {
        id: row.get(0)?,
        original_text: row.get(1)?,
        translated_text: row.get(2)?,
        source_lang: row.get(3)?,
        target_lang: row.get(4)?,
        content_type,
        video_code: row.get(6)?,
        timestamp: Utc
            .timestamp_millis_opt(timestamp)
            .single()
            .unwrap_or_else(Utc::now),
        engine_used,
        api_key_fingerprint: row.get(9)?,
        chars_consumed: chars_consumed.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::TranslationError;
    use chrono::Duration;

    fn record(original: &str, translated: &str, content_type: ContentType) -> NewTranslation {
        NewTranslation::new(original, translated, content_type, EngineKind::RemoteApi)
    }

    #[tokio::test]
    async fn test_get_miss_and_hit() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        assert!(store.get("你好", "EN", ContentType::Title).await.unwrap().is_none());

        store
            .insert(record("你好", "Hello", ContentType::Title).with_video_code(Some("12345")))
            .await
            .unwrap();

        let hit = store.get("你好", "EN", ContentType::Title).await.unwrap().unwrap();
        assert_eq!(hit.translated_text, "Hello");
        assert_eq!(hit.video_code.as_deref(), Some("12345"));
        assert_eq!(hit.engine_used, EngineKind::RemoteApi);
    }

    #[tokio::test]
    async fn test_key_includes_content_type_and_target_lang() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.insert(record("你好", "Hello", ContentType::Title)).await.unwrap();

        assert!(store.get("你好", "EN", ContentType::Description).await.unwrap().is_none());
        assert!(store.get("你好", "DE", ContentType::Title).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_replaces_on_conflict() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.insert(record("你好", "Hello", ContentType::Title)).await.unwrap();
        store
            .insert(NewTranslation::new("你好", "Hi", ContentType::Title, EngineKind::LocalModel))
            .await
            .unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].translated_text, "Hi");
        assert_eq!(all[0].engine_used, EngineKind::LocalModel);
    }

    #[tokio::test]
    async fn test_video_code_query_is_newest_first() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .insert(record("一", "one", ContentType::Title).with_video_code(Some("v1")).with_timestamp(now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .insert(record("二", "two", ContentType::Comment).with_video_code(Some("v1")).with_timestamp(now))
            .await
            .unwrap();
        store
            .insert(record("三", "three", ContentType::Title).with_video_code(Some("v2")))
            .await
            .unwrap();

        let rows = store.get_by_video_code("v1").await.unwrap();
        let texts: Vec<&str> = rows.iter().map(|r| r.translated_text.as_str()).collect();
        assert_eq!(texts, vec!["two", "one"]);
    }

    #[tokio::test]
    async fn test_watch_all_reflects_later_mutations() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let mut all = store.watch_all().await.unwrap();
        assert!(all.borrow().is_empty());

        let id = store.insert(record("你好", "Hello", ContentType::Title)).await.unwrap();
        all.changed().await.unwrap();
        assert_eq!(all.borrow_and_update().len(), 1);

        assert!(store.delete(id).await.unwrap());
        all.changed().await.unwrap();
        assert!(all.borrow_and_update().is_empty());
        assert!(!store.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_live_view_idle_without_watchers() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.insert(record("你好", "Hello", ContentType::Title)).await.unwrap();
        assert!(store.all_tx.borrow().is_empty());

        let all = store.watch_all().await.unwrap();
        assert_eq!(all.borrow().len(), 1);
        assert!(!all.has_changed().unwrap());
        drop(all);

        store.insert(record("再见", "Bye", ContentType::Title)).await.unwrap();
        assert_eq!(store.all_tx.borrow().len(), 1);
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_all_is_newest_first() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .insert(record("一", "one", ContentType::Title).with_timestamp(now - Duration::minutes(1)))
            .await
            .unwrap();
        store.insert(record("二", "two", ContentType::Tag).with_timestamp(now)).await.unwrap();

        let rows = store.get_all().await.unwrap();
        let texts: Vec<&str> = rows.iter().map(|r| r.translated_text.as_str()).collect();
        assert_eq!(texts, vec!["two", "one"]);
    }

    #[tokio::test]
    async fn test_unknown_stored_content_type_is_an_error() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO translation_cache
                 (original_text, translated_text, source_lang, target_lang, content_type,
                  video_code, timestamp)
                 VALUES ('你好', 'Hello', 'ZH', 'EN', 'BOGUS', 'v1', 0)",
                [],
            )
            .unwrap();

        assert!(store.get("你好", "EN", ContentType::Other).await.unwrap().is_none());
        let err = store.get_by_video_code("v1").await.unwrap_err();
        assert!(matches!(
            err,
            TranslationError::SqliteError(FromSqlConversionFailure(5, Type::Text, _))
        ), "got {err:?}");
        assert!(store.get_all().await.is_err());
    }

    #[tokio::test]
    async fn test_pruning() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.insert(record("一", "one", ContentType::Title)).await.unwrap();
        store.insert(record("二", "two", ContentType::Tag)).await.unwrap();
        store.insert(record("三", "three", ContentType::Tag)).await.unwrap();

        assert_eq!(store.delete_by_content_type(ContentType::Tag).await.unwrap(), 2);
        assert_eq!(store.delete_all().await.unwrap(), 1);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chars_consumed_window() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .insert(record("一", "one", ContentType::Title).with_usage("fp-a", 10).with_timestamp(now))
            .await
            .unwrap();
        store
            .insert(record("二", "two", ContentType::Title).with_usage("fp-a", 5).with_timestamp(now - Duration::days(60)))
            .await
            .unwrap();
        store
            .insert(record("三", "three", ContentType::Title).with_usage("fp-b", 7).with_timestamp(now))
            .await
            .unwrap();

        let total = store
            .chars_consumed("fp-a", now - Duration::days(1), now)
            .await
            .unwrap();
        assert_eq!(total, 10);
        assert_eq!(
            store.chars_consumed("fp-z", now - Duration::days(1), now).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("translation.db");
        {
            let store = SqliteCacheStore::open(&path).unwrap();
            store.insert(record("你好", "Hello", ContentType::Title)).await.unwrap();
        }

        let store = SqliteCacheStore::open(&path).unwrap();
        let hit = store.get("你好", "EN", ContentType::Title).await.unwrap();
        assert_eq!(hit.unwrap().translated_text, "Hello");
    }

    #[tokio::test]
    async fn test_version_one_rows_default_to_remote_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(CREATE_TABLE).unwrap();
            conn.execute(
                "INSERT INTO translation_cache
                 (original_text, translated_text, source_lang, target_lang, content_type, timestamp)
                 VALUES ('你好', 'Hello', 'ZH', 'EN', 'TITLE', 0)",
                [],
            )
            .unwrap();
        }

        let store = SqliteCacheStore::open(&path).unwrap();
        let hit = store.get("你好", "EN", ContentType::Title).await.unwrap().unwrap();
        assert_eq!(hit.engine_used, EngineKind::RemoteApi);
    }
}
