//! libSQL persistence for article jobs (offline, single process).
//!
//! The [`Storage`] struct wraps a libSQL database holding job records,
//! per-stage artifacts, downloaded image assets, and publish receipts.
//! Jobs round-trip losslessly: the full [`ArticleJob`] is stored as JSON
//! alongside queryable columns, and stage artifacts let a restarted process
//! resume a job from its last completed stage.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};

use autoblogger_shared::{
    ArticleJob, AutoBloggerError, Draft, ImageAsset, JobId, PipelineStage, PublishReceipt,
    Result, SeoMetadata,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AutoBloggerError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    AutoBloggerError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert or replace the full job record.
    pub async fn upsert_job(&self, job: &ArticleJob) -> Result<()> {
        let job_json = serde_json::to_string(job)
            .map_err(|e| AutoBloggerError::Storage(format!("serialize job: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO jobs (id, state_label, terminal, job_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                   state_label = excluded.state_label,
                   terminal = excluded.terminal,
                   job_json = excluded.job_json,
                   updated_at = excluded.updated_at",
                params![
                    job.id.to_string(),
                    job.state.label(),
                    job.state.is_terminal() as i64,
                    job_json,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Load a job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<ArticleJob>> {
        let mut rows = self
            .conn
            .query(
                "SELECT job_json FROM jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json: String = row
                    .get(0)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
                let job = serde_json::from_str(&json)
                    .map_err(|e| AutoBloggerError::Storage(format!("deserialize job: {e}")))?;
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AutoBloggerError::Storage(e.to_string())),
        }
    }

    /// List all jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<ArticleJob>> {
        self.query_jobs("SELECT job_json FROM jobs ORDER BY created_at DESC")
            .await
    }

    /// List jobs that have not reached a terminal state (resume candidates).
    pub async fn list_resumable(&self) -> Result<Vec<ArticleJob>> {
        self.query_jobs(
            "SELECT job_json FROM jobs WHERE terminal = 0 ORDER BY created_at ASC",
        )
        .await
    }

    async fn query_jobs(&self, sql: &str) -> Result<Vec<ArticleJob>> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let json: String = row
                .get(0)
                .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
            let job = serde_json::from_str(&json)
                .map_err(|e| AutoBloggerError::Storage(format!("deserialize job: {e}")))?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    // -----------------------------------------------------------------------
    // Stage artifacts
    // -----------------------------------------------------------------------

    /// Persist the draft produced by a stage.
    pub async fn save_draft(&self, id: &JobId, stage: PipelineStage, draft: &Draft) -> Result<()> {
        self.save_artifact(id, stage.as_str(), draft).await
    }

    /// Load the draft produced by a stage, if any.
    pub async fn load_draft(&self, id: &JobId, stage: PipelineStage) -> Result<Option<Draft>> {
        self.load_artifact(id, stage.as_str()).await
    }

    /// Persist the SEO metadata produced by enrichment.
    pub async fn save_seo(&self, id: &JobId, seo: &SeoMetadata) -> Result<()> {
        self.save_artifact(id, "seo_metadata", seo).await
    }

    /// Load the SEO metadata, if enrichment has completed.
    pub async fn load_seo(&self, id: &JobId) -> Result<Option<SeoMetadata>> {
        self.load_artifact(id, "seo_metadata").await
    }

    async fn save_artifact<T: serde::Serialize>(
        &self,
        id: &JobId,
        stage: &str,
        payload: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(payload)
            .map_err(|e| AutoBloggerError::Storage(format!("serialize artifact: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO artifacts (job_id, stage, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(job_id, stage) DO UPDATE SET
                   payload = excluded.payload,
                   created_at = excluded.created_at",
                params![
                    id.to_string(),
                    stage,
                    json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn load_artifact<T: serde::de::DeserializeOwned>(
        &self,
        id: &JobId,
        stage: &str,
    ) -> Result<Option<T>> {
        let mut rows = self
            .conn
            .query(
                "SELECT payload FROM artifacts WHERE job_id = ?1 AND stage = ?2",
                params![id.to_string(), stage],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json: String = row
                    .get(0)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
                let payload = serde_json::from_str(&json).map_err(|e| {
                    AutoBloggerError::Storage(format!("deserialize artifact: {e}"))
                })?;
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AutoBloggerError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Image assets
    // -----------------------------------------------------------------------

    /// Persist a downloaded image asset (bytes stored as a blob).
    pub async fn save_image(&self, id: &JobId, image: &ImageAsset) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO images (job_id, bytes, mime, attribution, source_url, license, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(job_id) DO UPDATE SET
                   bytes = excluded.bytes,
                   mime = excluded.mime,
                   attribution = excluded.attribution,
                   source_url = excluded.source_url,
                   license = excluded.license,
                   created_at = excluded.created_at",
                params![
                    id.to_string(),
                    image.bytes.clone(),
                    image.mime.as_str(),
                    image.attribution.as_str(),
                    image.source_url.as_str(),
                    image.license.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Load a stored image asset, if any.
    pub async fn load_image(&self, id: &JobId) -> Result<Option<ImageAsset>> {
        let mut rows = self
            .conn
            .query(
                "SELECT bytes, mime, attribution, source_url, license
                 FROM images WHERE job_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(ImageAsset {
                bytes: row
                    .get::<Vec<u8>>(0)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?,
                mime: row
                    .get::<String>(1)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?,
                attribution: row
                    .get::<String>(2)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?,
                source_url: row
                    .get::<String>(3)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?,
                license: row
                    .get::<String>(4)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(AutoBloggerError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Publish receipts
    // -----------------------------------------------------------------------

    /// Record a publish receipt for a job.
    pub async fn insert_receipt(
        &self,
        id: &JobId,
        receipt: &PublishReceipt,
        idempotency_token: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO receipts (job_id, post_id, url, published_at, idempotency_token)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id) DO NOTHING",
                params![
                    id.to_string(),
                    receipt.post_id as i64,
                    receipt.url.as_str(),
                    receipt.published_at.to_rfc3339(),
                    idempotency_token,
                ],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
        Ok(())
    }

    /// The receipt previously issued for a job, if it has published.
    pub async fn get_receipt(&self, id: &JobId) -> Result<Option<PublishReceipt>> {
        let mut rows = self
            .conn
            .query(
                "SELECT post_id, url, published_at FROM receipts WHERE job_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let post_id: i64 = row
                    .get(0)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
                let url: String = row
                    .get(1)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;
                let published_at: String = row
                    .get(2)
                    .map_err(|e| AutoBloggerError::Storage(e.to_string()))?;

                Ok(Some(PublishReceipt {
                    post_id: post_id as u64,
                    url,
                    published_at: published_at
                        .parse()
                        .map_err(|e| AutoBloggerError::Storage(format!("bad timestamp: {e}")))?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AutoBloggerError::Storage(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use autoblogger_shared::{
        Block, ErrorKind, JobState, SeoLink, SourceReference,
    };

    async fn open_test_storage() -> (Storage, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("ab-storage-test-{}", uuid::Uuid::now_v7()));
        let storage = Storage::open(&dir.join("jobs.db")).await.unwrap();
        (storage, dir)
    }

    fn sample_job() -> ArticleJob {
        let mut job = ArticleJob::new(SourceReference::Url {
            url: "https://news.example.com/a".into(),
        });
        job.state = JobState::Enriching;
        job.retries.bump(PipelineStage::Rewrite);
        job.record_failure(
            PipelineStage::Rewrite,
            ErrorKind::Model,
            "timed out".into(),
        );
        job
    }

    #[tokio::test]
    async fn job_roundtrip_is_lossless() {
        let (storage, dir) = open_test_storage().await;

        let job = sample_job();
        storage.upsert_job(&job).await.unwrap();

        let loaded = storage.get_job(&job.id).await.unwrap().expect("job exists");
        assert_eq!(loaded, job);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn upsert_replaces_state() {
        let (storage, dir) = open_test_storage().await;

        let mut job = sample_job();
        storage.upsert_job(&job).await.unwrap();

        job.state = JobState::Succeeded;
        storage.upsert_job(&job).await.unwrap();

        let loaded = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, JobState::Succeeded);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn resumable_excludes_terminal_jobs() {
        let (storage, dir) = open_test_storage().await;

        let running = sample_job();
        storage.upsert_job(&running).await.unwrap();

        let mut done = sample_job();
        done.state = JobState::Succeeded;
        storage.upsert_job(&done).await.unwrap();

        let mut failed = sample_job();
        failed.state = JobState::Failed {
            stage: PipelineStage::Publish,
            kind: ErrorKind::Submit,
            message: "rejected".into(),
        };
        storage.upsert_job(&failed).await.unwrap();

        let resumable = storage.list_resumable().await.unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].id, running.id);

        assert_eq!(storage.list_jobs().await.unwrap().len(), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn draft_artifacts_roundtrip_per_stage() {
        let (storage, dir) = open_test_storage().await;
        let job = sample_job();
        storage.upsert_job(&job).await.unwrap();

        let extracted = Draft {
            title: "Original".into(),
            blocks: vec![Block::paragraph("source text")],
            source_url: Some("https://news.example.com/a".into()),
            attribution: Some("news.example.com".into()),
            keywords: vec!["gardening".into()],
        };
        let rewritten = Draft {
            title: "Rewritten".into(),
            blocks: vec![Block::paragraph("fresh text")],
            ..extracted.clone()
        };

        storage
            .save_draft(&job.id, PipelineStage::Extract, &extracted)
            .await
            .unwrap();
        storage
            .save_draft(&job.id, PipelineStage::Rewrite, &rewritten)
            .await
            .unwrap();

        let loaded_extract = storage
            .load_draft(&job.id, PipelineStage::Extract)
            .await
            .unwrap()
            .unwrap();
        let loaded_rewrite = storage
            .load_draft(&job.id, PipelineStage::Rewrite)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded_extract, extracted);
        assert_eq!(loaded_rewrite, rewritten);
        assert!(
            storage
                .load_draft(&job.id, PipelineStage::Enrich)
                .await
                .unwrap()
                .is_none()
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn seo_metadata_roundtrip() {
        let (storage, dir) = open_test_storage().await;
        let job = sample_job();
        storage.upsert_job(&job).await.unwrap();

        let seo = SeoMetadata {
            category: "gardening".into(),
            tags: vec!["gardening".into(), "soil".into()],
            meta_description: "A short description".into(),
            links: vec![SeoLink {
                anchor: "soil".into(),
                url: "https://blog.example.com/soil".into(),
                follow: true,
                block_index: 0,
            }],
        };
        storage.save_seo(&job.id, &seo).await.unwrap();

        let loaded = storage.load_seo(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, seo);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn image_blob_roundtrip() {
        let (storage, dir) = open_test_storage().await;
        let job = sample_job();
        storage.upsert_job(&job).await.unwrap();

        let image = ImageAsset {
            bytes: vec![0xFF, 0xD8, 0xFF, 0x00, 0x10],
            mime: "image/jpeg".into(),
            attribution: "Photo by A via openverse (by)".into(),
            source_url: "https://img.example/a.jpg".into(),
            license: "by".into(),
        };
        storage.save_image(&job.id, &image).await.unwrap();

        let loaded = storage.load_image(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, image);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn receipt_is_write_once() {
        let (storage, dir) = open_test_storage().await;
        let job = sample_job();
        storage.upsert_job(&job).await.unwrap();

        assert!(storage.get_receipt(&job.id).await.unwrap().is_none());

        let receipt = PublishReceipt {
            post_id: 42,
            url: "https://blog.example.com/?p=42".into(),
            published_at: Utc::now(),
        };
        storage
            .insert_receipt(&job.id, &receipt, "token-1")
            .await
            .unwrap();

        // A second insert for the same job does not overwrite the original
        let other = PublishReceipt {
            post_id: 99,
            url: "https://blog.example.com/?p=99".into(),
            published_at: Utc::now(),
        };
        storage
            .insert_receipt(&job.id, &other, "token-1")
            .await
            .unwrap();

        let loaded = storage.get_receipt(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.post_id, 42);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
