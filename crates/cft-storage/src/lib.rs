//! Persistence boundary: the canonical record table, its comparison index,
//! and companion notification rows.

use async_trait::async_trait;
use cft_core::{normalize_for_compare, CanonicalRecord, IndexEntry, SourceLabel};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::warn;

pub const CRATE_NAME: &str = "cft-storage";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS scraped_project (
    id              BIGSERIAL PRIMARY KEY,
    title           TEXT NOT NULL,
    source          TEXT NOT NULL,
    source_url      TEXT NOT NULL DEFAULT '',
    source_origin   TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    organization    TEXT NOT NULL DEFAULT '',
    project_type    TEXT NOT NULL DEFAULT '',
    status          TEXT NOT NULL DEFAULT '',
    total_funding   TEXT NOT NULL DEFAULT '',
    funding_amount  DOUBLE PRECISION,
    currency        TEXT NOT NULL DEFAULT 'USD',
    country         TEXT NOT NULL DEFAULT '',
    region          TEXT NOT NULL DEFAULT '',
    document_url    TEXT NOT NULL DEFAULT '',
    additional_links TEXT NOT NULL DEFAULT '',
    completeness_score INTEGER NOT NULL DEFAULT 0,
    needs_review    BOOLEAN NOT NULL DEFAULT FALSE,
    fingerprint     VARCHAR(64) NOT NULL UNIQUE,
    scraped_at      TIMESTAMPTZ NOT NULL,
    last_updated    TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_notification (
    id          BIGSERIAL PRIMARY KEY,
    title       TEXT NOT NULL,
    message     TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("record with fingerprint {0} already persisted")]
    DuplicateFingerprint(String),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::DuplicateFingerprint(_))
    }
}

fn classify(err: sqlx::Error, fingerprint: &str) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StorageError::DuplicateFingerprint(fingerprint.to_string());
        }
    }
    StorageError::Database(err)
}

/// Storage operations the ingestion pipeline depends on. One implementation
/// speaks Postgres, one keeps everything in memory for tests and dry work.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Comparison fields of everything already persisted, loaded once per run.
    async fn load_index(&self) -> Result<Vec<IndexEntry>, StorageError>;

    /// Insert a batch atomically. On failure the whole batch is rolled back
    /// and the caller retries record by record.
    async fn insert_batch(&self, records: &[CanonicalRecord]) -> Result<(), StorageError>;

    async fn insert_record(&self, record: &CanonicalRecord) -> Result<(), StorageError>;

    async fn record_notification(&self, title: &str, message: &str) -> Result<(), StorageError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the record and notification tables when absent.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA_SQL.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_with<'e, E>(executor: E, record: &CanonicalRecord) -> Result<(), StorageError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO scraped_project (
                title, source, source_url, source_origin, description,
                organization, project_type, status, total_funding,
                funding_amount, currency, country, region, document_url,
                additional_links, completeness_score, needs_review,
                fingerprint, scraped_at, last_updated
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            "#,
        )
        .bind(&record.title)
        .bind(record.source.as_str())
        .bind(&record.source_url)
        .bind(&record.source_origin)
        .bind(&record.description)
        .bind(&record.organization)
        .bind(&record.project_type)
        .bind(&record.status)
        .bind(&record.total_funding)
        .bind(record.funding_amount)
        .bind(&record.currency)
        .bind(&record.country)
        .bind(&record.region)
        .bind(&record.document_url)
        .bind(&record.additional_links)
        .bind(record.completeness_score as i32)
        .bind(record.needs_review)
        .bind(&record.fingerprint)
        .bind(record.scraped_at)
        .bind(record.last_updated)
        .execute(executor)
        .await
        .map(|_| ())
        .map_err(|err| classify(err, &record.fingerprint))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn load_index(&self) -> Result<Vec<IndexEntry>, StorageError> {
        let rows = sqlx::query(
            "SELECT title, source, organization, additional_links, fingerprint FROM scraped_project",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let title: String = row.try_get("title")?;
            let source: String = row.try_get("source")?;
            let organization: String = row.try_get("organization")?;
            let link: String = row.try_get("additional_links")?;
            let fingerprint: String = row.try_get("fingerprint")?;
            let source = match SourceLabel::parse(&source) {
                Some(label) => label,
                None => {
                    warn!(source = %source, "unknown source label in store, treating as OTHER");
                    SourceLabel::Other
                }
            };
            entries.push(IndexEntry {
                title_norm: normalize_for_compare(&title),
                source,
                organization_norm: normalize_for_compare(&organization),
                link: link.trim().to_string(),
                fingerprint,
            });
        }
        Ok(entries)
    }

    async fn insert_batch(&self, records: &[CanonicalRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::insert_with(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_record(&self, record: &CanonicalRecord) -> Result<(), StorageError> {
        Self::insert_with(&self.pool, record).await
    }

    async fn record_notification(&self, title: &str, message: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO collection_notification (title, message) VALUES ($1, $2)")
            .bind(title)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory store with the same uniqueness semantics as the Postgres table.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: std::sync::Mutex<Vec<CanonicalRecord>>,
    notifications: std::sync::Mutex<Vec<(String, String)>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().expect("notifications lock").clone()
    }

    fn insert_one(
        records: &mut Vec<CanonicalRecord>,
        record: &CanonicalRecord,
    ) -> Result<(), StorageError> {
        if records.iter().any(|r| r.fingerprint == record.fingerprint) {
            return Err(StorageError::DuplicateFingerprint(record.fingerprint.clone()));
        }
        records.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_index(&self) -> Result<Vec<IndexEntry>, StorageError> {
        Ok(self
            .records
            .lock()
            .expect("records lock")
            .iter()
            .map(|r| r.index_entry())
            .collect())
    }

    async fn insert_batch(&self, records: &[CanonicalRecord]) -> Result<(), StorageError> {
        let mut guard = self.records.lock().expect("records lock");
        let checkpoint = guard.len();
        for record in records {
            if let Err(err) = Self::insert_one(&mut guard, record) {
                guard.truncate(checkpoint);
                return Err(err);
            }
        }
        Ok(())
    }

    async fn insert_record(&self, record: &CanonicalRecord) -> Result<(), StorageError> {
        let mut guard = self.records.lock().expect("records lock");
        Self::insert_one(&mut guard, record)
    }

    async fn record_notification(&self, title: &str, message: &str) -> Result<(), StorageError> {
        self.notifications
            .lock()
            .expect("notifications lock")
            .push((title.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(title: &str, link: &str) -> CanonicalRecord {
        let now = Utc::now();
        let mut record = CanonicalRecord {
            title: title.to_string(),
            source: SourceLabel::Gef,
            source_url: "thegef.org".to_string(),
            source_origin: "GEF_Mauritania_Projects.csv".to_string(),
            description: String::new(),
            organization: "Ministry X".to_string(),
            project_type: String::new(),
            status: "Active".to_string(),
            total_funding: String::new(),
            funding_amount: None,
            currency: "USD".to_string(),
            country: "Mauritania".to_string(),
            region: "Africa".to_string(),
            document_url: String::new(),
            additional_links: link.to_string(),
            completeness_score: 0,
            needs_review: false,
            fingerprint: String::new(),
            scraped_at: now,
            last_updated: now,
        };
        record.seal_fingerprint();
        record
    }

    #[tokio::test]
    async fn duplicate_fingerprints_are_rejected() {
        let store = MemoryRecordStore::new();
        let first = record("Solar Grid Expansion", "https://gef.example/123");
        store.insert_record(&first).await.expect("insert");

        let err = store.insert_record(&first).await.expect_err("conflict");
        assert!(err.is_conflict());
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn failed_batches_roll_back() {
        let store = MemoryRecordStore::new();
        let a = record("Solar Grid Expansion", "https://gef.example/123");
        store.insert_record(&a).await.expect("seed");

        let b = record("Wetland Restoration", "https://gef.example/124");
        let result = store.insert_batch(&[b, a.clone()]).await;
        assert!(result.is_err());
        // The batch is atomic: the fresh record did not survive the conflict.
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn index_entries_are_comparison_normalized() {
        let store = MemoryRecordStore::new();
        let rec = record("  Solar   GRID Expansion ", " https://gef.example/123 ");
        store.insert_record(&rec).await.expect("insert");

        let index = store.load_index().await.expect("index");
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].title_norm, "solar grid expansion");
        assert_eq!(index[0].link, "https://gef.example/123");
        assert_eq!(index[0].source, SourceLabel::Gef);
    }
}
