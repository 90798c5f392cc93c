//! Face record persistence.
//!
//! The engine only needs three operations, expressed by [`FaceStore`].
//! [`SqliteStore`] keeps one active record per owner; descriptors are
//! written in the canonical [`StoredFaceData`] shape and read back with the
//! tolerant decoder, so rows written by older tooling still load.

use chrono::{DateTime, Utc};
use facegate_core::record::{decode_descriptor, StoredFaceData};
use facegate_core::{FaceIdentityRecord, QualityLabel};
use rusqlite::{params, OptionalExtension, Row};
use std::future::Future;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("failed to encode face data: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Which records a [`FaceStore::query`] returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub exclude_owner: Option<String>,
    pub min_quality: Option<QualityLabel>,
}

impl RecordFilter {
    pub fn excluding(owner_id: impl Into<String>) -> Self {
        Self {
            exclude_owner: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &FaceIdentityRecord) -> bool {
        if self.exclude_owner.as_deref() == Some(record.owner_id.as_str()) {
            return false;
        }
        self.min_quality.map_or(true, |min| record.quality_label >= min)
    }
}

/// Persistence contract for face identity records.
pub trait FaceStore: Send + Sync + 'static {
    /// Insert or replace the owner's record.
    fn put(&self, owner_id: &str, data: &StoredFaceData) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get(&self, owner_id: &str) -> impl Future<Output = Result<Option<FaceIdentityRecord>, StoreError>> + Send;

    /// Records in insertion order.
    fn query(&self, filter: &RecordFilter) -> impl Future<Output = Result<Vec<FaceIdentityRecord>, StoreError>> + Send;
}

impl<T: FaceStore> FaceStore for std::sync::Arc<T> {
    fn put(&self, owner_id: &str, data: &StoredFaceData) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).put(owner_id, data)
    }

    fn get(&self, owner_id: &str) -> impl Future<Output = Result<Option<FaceIdentityRecord>, StoreError>> + Send {
        (**self).get(owner_id)
    }

    fn query(&self, filter: &RecordFilter) -> impl Future<Output = Result<Vec<FaceIdentityRecord>, StoreError>> + Send {
        (**self).query(filter)
    }
}

/// SQLite-backed store on a dedicated connection thread.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.ensure_schema().await?;
        tracing::info!(path = %path.as_ref().display(), "opened face store");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;

                    CREATE TABLE IF NOT EXISTS face_records (
                      owner_id TEXT PRIMARY KEY NOT NULL,
                      face_data TEXT NOT NULL,
                      quality TEXT NOT NULL,
                      captured_at TEXT NOT NULL
                    );
                    "#,
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Store a raw `face_data` value as-is. Used to import rows produced by
    /// other tools, whose descriptor shape may differ from ours.
    pub async fn put_raw(
        &self,
        owner_id: &str,
        face_data: String,
        quality: QualityLabel,
        captured_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let owner = owner_id.to_owned();
        let captured_at = captured_at.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO face_records (owner_id, face_data, quality, captured_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(owner_id) DO UPDATE SET
                       face_data = excluded.face_data,
                       quality = excluded.quality,
                       captured_at = excluded.captured_at",
                    params![owner, face_data, quality.as_str(), captured_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl FaceStore for SqliteStore {
    async fn put(&self, owner_id: &str, data: &StoredFaceData) -> Result<(), StoreError> {
        let face_data = serde_json::to_string(data)?;
        self.put_raw(owner_id, face_data, data.quality, data.created_at).await?;
        tracing::info!(owner = %owner_id, quality = data.quality.as_str(), "face record stored");
        Ok(())
    }

    async fn get(&self, owner_id: &str) -> Result<Option<FaceIdentityRecord>, StoreError> {
        let owner = owner_id.to_owned();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT owner_id, face_data, quality, captured_at
                         FROM face_records WHERE owner_id = ?1",
                        params![owner],
                        RawRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row.map(RawRow::decode))
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<FaceIdentityRecord>, StoreError> {
        let exclude = filter.exclude_owner.clone();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT owner_id, face_data, quality, captured_at
                     FROM face_records
                     WHERE ?1 IS NULL OR owner_id != ?1
                     ORDER BY rowid",
                )?;
                let rows = stmt
                    .query_map(params![exclude], RawRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let records: Vec<FaceIdentityRecord> = rows
            .into_iter()
            .map(RawRow::decode)
            .filter(|r| filter.matches(r))
            .collect();
        tracing::debug!(count = records.len(), "face records queried");
        Ok(records)
    }
}

/// A row as stored, before decoding.
struct RawRow {
    owner_id: String,
    face_data: String,
    quality: String,
    captured_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: row.get(0)?,
            face_data: row.get(1)?,
            quality: row.get(2)?,
            captured_at: row.get(3)?,
        })
    }

    /// Never fails: an undecodable descriptor yields `descriptor: None`.
    fn decode(self) -> FaceIdentityRecord {
        let descriptor = serde_json::from_str(&self.face_data)
            .ok()
            .and_then(|value| decode_descriptor(&value));
        if descriptor.is_none() {
            tracing::warn!(owner = %self.owner_id, "stored face data has no usable descriptor");
        }

        let quality_label = QualityLabel::parse(&self.quality).unwrap_or_else(|| {
            tracing::warn!(owner = %self.owner_id, quality = %self.quality, "unknown quality label");
            QualityLabel::Poor
        });

        let captured_at = DateTime::parse_from_rfc3339(&self.captured_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| {
                tracing::warn!(owner = %self.owner_id, "unparseable capture timestamp");
                DateTime::<Utc>::default()
            });

        FaceIdentityRecord {
            owner_id: self.owner_id,
            descriptor,
            quality_label,
            captured_at,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::Descriptor;

    fn data(value: f32, quality: QualityLabel) -> StoredFaceData {
        StoredFaceData {
            descriptor: Descriptor::new(vec![value; 128]),
            confidence: 97,
            quality,
            landmarks: 68,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put("alice", &data(0.5, QualityLabel::Good)).await.unwrap();

        let record = store.get("alice").await.unwrap().unwrap();
        assert_eq!(record.owner_id, "alice");
        assert_eq!(record.quality_label, QualityLabel::Good);
        assert_eq!(record.descriptor.unwrap().as_slice(), &[0.5; 128][..]);
        assert!(store.get("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_record_per_owner() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put("alice", &data(0.1, QualityLabel::Fair)).await.unwrap();
        store.put("bob", &data(0.2, QualityLabel::Good)).await.unwrap();
        store.put("alice", &data(0.3, QualityLabel::Good)).await.unwrap();

        let all = store.query(&RecordFilter::default()).await.unwrap();
        let owners: Vec<&str> = all.iter().map(|r| r.owner_id.as_str()).collect();
        assert_eq!(owners, ["alice", "bob"]);
        assert_eq!(all[0].quality_label, QualityLabel::Good);
        assert_eq!(all[0].descriptor.as_ref().unwrap().as_slice()[0], 0.3);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put("alice", &data(0.1, QualityLabel::Poor)).await.unwrap();
        store.put("bob", &data(0.2, QualityLabel::Fair)).await.unwrap();
        store.put("carol", &data(0.3, QualityLabel::Good)).await.unwrap();

        let others = store.query(&RecordFilter::excluding("bob")).await.unwrap();
        assert_eq!(others.len(), 2);
        assert!(others.iter().all(|r| r.owner_id != "bob"));

        let filter = RecordFilter {
            min_quality: Some(QualityLabel::Fair),
            ..RecordFilter::default()
        };
        let decent = store.query(&filter).await.unwrap();
        let owners: Vec<&str> = decent.iter().map(|r| r.owner_id.as_str()).collect();
        assert_eq!(owners, ["bob", "carol"]);
    }

    #[tokio::test]
    async fn test_legacy_and_corrupt_rows_load() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        store
            .put_raw("legacy", "[[0.25, 0.5], [0.0, 0.0]]".into(), QualityLabel::Fair, now)
            .await
            .unwrap();
        store
            .put_raw("mesh", r#"{"face_descriptor": [1.0, 2.0]}"#.into(), QualityLabel::Good, now)
            .await
            .unwrap();
        store.put_raw("broken", "not json".into(), QualityLabel::Good, now).await.unwrap();

        let legacy = store.get("legacy").await.unwrap().unwrap();
        assert_eq!(legacy.descriptor.unwrap().as_slice(), &[0.25, 0.5]);
        assert_eq!(store.get("mesh").await.unwrap().unwrap().descriptor.unwrap().len(), 2);

        let broken = store.get("broken").await.unwrap().unwrap();
        assert!(broken.descriptor.is_none());
        assert_eq!(store.query(&RecordFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("facegate-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("faces.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put("alice", &data(0.4, QualityLabel::Good)).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).await.unwrap();
        assert!(reopened.get("alice").await.unwrap().is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
