//! The stage bundle: every external-service client the pipeline needs,
//! plus per-stage execution with operation timeouts.
//!
//! Components are explicit resources owned by the bundle and handed to each
//! stage by the orchestrator — nothing is reached through ambient globals.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use autoblogger_extractor::Extractor;
use autoblogger_images::ImageSourcer;
use autoblogger_publisher::Publisher;
use autoblogger_rewriter::Rewriter;
use autoblogger_rules::RuleSet;
use autoblogger_seo::EnrichParams;
use autoblogger_shared::{
    AppConfig, ArticleJob, AutoBloggerError, PipelineStage, PublishReceipt, Result,
    TimeoutsConfig,
};
use autoblogger_storage::Storage;

/// All stage components plus the shared read-only rule set.
pub struct Pipeline {
    pub extractor: Extractor,
    pub rewriter: Rewriter,
    pub sourcer: ImageSourcer,
    pub publisher: Publisher,
    pub rules: Arc<RuleSet>,
    pub enrich_params: EnrichParams,
    /// Name of the style template used for rewriting.
    pub style: String,
    pub timeouts: TimeoutsConfig,
}

impl Pipeline {
    /// Build the bundle from application config, resolving secrets from the
    /// env vars each config section names.
    pub fn from_config(config: &AppConfig, rules: Arc<RuleSet>) -> Result<Self> {
        let model_key = std::env::var(&config.model.api_key_env).unwrap_or_default();
        let images_key = std::env::var(&config.images.api_key_env)
            .ok()
            .filter(|v| !v.is_empty());
        let cms_password = std::env::var(&config.cms.password_env).unwrap_or_default();

        let timeouts = config.timeouts.clone();

        Ok(Self {
            extractor: Extractor::new(
                &config.extract,
                Duration::from_secs(timeouts.fetch_secs),
            )?,
            rewriter: Rewriter::new(
                model_key,
                &config.model,
                Duration::from_secs(timeouts.model_secs),
            )?,
            sourcer: ImageSourcer::new(
                images_key,
                &config.images,
                Duration::from_secs(timeouts.image_secs),
            )?,
            publisher: Publisher::new(
                cms_password,
                &config.cms,
                Duration::from_secs(timeouts.publish_secs),
            )?,
            rules,
            enrich_params: EnrichParams::from(&config.seo),
            style: config.defaults.style.clone(),
            timeouts,
        })
    }

    /// Run one stage for a job. Stage inputs come from persisted artifacts
    /// of prior stages; outputs are persisted before returning so a restart
    /// resumes from the last completed stage. Returns the receipt when the
    /// publish stage completes.
    #[instrument(skip_all, fields(job_id = %job.id, stage = %stage))]
    pub(crate) async fn run_stage(
        &self,
        stage: PipelineStage,
        job: &ArticleJob,
        storage: &Storage,
    ) -> Result<Option<PublishReceipt>> {
        match stage {
            PipelineStage::Extract => {
                let draft = with_timeout(
                    Duration::from_secs(self.timeouts.fetch_secs),
                    stage,
                    self.extractor.extract(&job.source),
                )
                .await?;
                debug!(blocks = draft.blocks.len(), "draft extracted");
                storage.save_draft(&job.id, stage, &draft).await?;
                Ok(None)
            }

            PipelineStage::Rewrite => {
                let draft = storage
                    .load_draft(&job.id, PipelineStage::Extract)
                    .await?
                    .ok_or_else(|| missing_artifact(PipelineStage::Extract))?;
                let template = self.rules.style(&self.style).ok_or_else(|| {
                    AutoBloggerError::config(format!(
                        "style template \"{}\" not found in rule tables",
                        self.style
                    ))
                })?;

                let rewritten = with_timeout(
                    Duration::from_secs(self.timeouts.model_secs),
                    stage,
                    self.rewriter.rewrite(&draft, template, &self.rules),
                )
                .await?;
                storage.save_draft(&job.id, stage, &rewritten).await?;
                Ok(None)
            }

            PipelineStage::Enrich => {
                let draft = storage
                    .load_draft(&job.id, PipelineStage::Rewrite)
                    .await?
                    .ok_or_else(|| missing_artifact(PipelineStage::Rewrite))?;

                // Enrichment is pure and deterministic; no timeout needed.
                let (enriched, seo) =
                    autoblogger_seo::enrich(&draft, &self.rules, &self.enrich_params)?;
                storage.save_draft(&job.id, stage, &enriched).await?;
                storage.save_seo(&job.id, &seo).await?;
                Ok(None)
            }

            PipelineStage::SourceImage => {
                let draft = storage
                    .load_draft(&job.id, PipelineStage::Enrich)
                    .await?
                    .ok_or_else(|| missing_artifact(PipelineStage::Enrich))?;

                let image = with_timeout(
                    Duration::from_secs(self.timeouts.image_secs),
                    stage,
                    self.sourcer.source(&draft.keywords),
                )
                .await?;
                storage.save_image(&job.id, &image).await?;
                Ok(None)
            }

            PipelineStage::Publish => {
                let draft = storage
                    .load_draft(&job.id, PipelineStage::Enrich)
                    .await?
                    .ok_or_else(|| missing_artifact(PipelineStage::Enrich))?;
                let seo = storage
                    .load_seo(&job.id)
                    .await?
                    .ok_or_else(|| missing_artifact(PipelineStage::Enrich))?;
                let image = storage
                    .load_image(&job.id)
                    .await?
                    .ok_or_else(|| missing_artifact(PipelineStage::SourceImage))?;

                let receipt = with_timeout(
                    Duration::from_secs(self.timeouts.publish_secs),
                    stage,
                    self.publisher.publish(&job.id, &draft, &seo, &image, storage),
                )
                .await?;
                Ok(Some(receipt))
            }
        }
    }
}

/// Bound an operation by the stage timeout. Exceeding the timeout is a
/// transient failure counted against the stage's retry budget.
async fn with_timeout<T>(
    duration: Duration,
    stage: PipelineStage,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(stage_timeout_error(stage)),
    }
}

/// The transient error a stage reports when its operation timed out.
fn stage_timeout_error(stage: PipelineStage) -> AutoBloggerError {
    let message = format!("{stage} stage timed out");
    match stage {
        PipelineStage::Extract | PipelineStage::SourceImage => {
            AutoBloggerError::fetch_transient(message)
        }
        PipelineStage::Rewrite => AutoBloggerError::model(message),
        PipelineStage::Enrich => AutoBloggerError::enrichment(message),
        PipelineStage::Publish => AutoBloggerError::submit_transient(message),
    }
}

/// A later stage found its input artifact missing — the job record is
/// inconsistent with the artifact store.
fn missing_artifact(produced_by: PipelineStage) -> AutoBloggerError {
    AutoBloggerError::Storage(format!(
        "missing artifact from {produced_by} stage; job state is inconsistent"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_errors_are_transient_per_stage() {
        assert!(stage_timeout_error(PipelineStage::Extract).is_retryable());
        assert!(stage_timeout_error(PipelineStage::Rewrite).is_retryable());
        assert!(stage_timeout_error(PipelineStage::SourceImage).is_retryable());
        assert!(stage_timeout_error(PipelineStage::Publish).is_retryable());
    }

    #[test]
    fn rewrite_timeout_classifies_as_model_error() {
        let err = stage_timeout_error(PipelineStage::Rewrite);
        assert_eq!(err.kind(), autoblogger_shared::ErrorKind::Model);
    }
}
