//! Core domain types for the autoblogger pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Current schema version for persisted job records.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for article job identifiers (time-sortable).
///
/// The identifier is stable across retries and restarts; the publish
/// idempotency token is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// SourceReference
// ---------------------------------------------------------------------------

/// What an article job starts from: a URL to scrape or raw supplied text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceReference {
    /// Fetch and extract the article at this URL.
    Url { url: String },
    /// Use the supplied text verbatim as the source article.
    RawText { text: String },
}

impl SourceReference {
    /// Short display form for logs and job listings.
    pub fn label(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::RawText { text } => {
                let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                format!("(raw text) {}", first.trim())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages and job state
// ---------------------------------------------------------------------------

/// The five transformation stages a job passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extract,
    Rewrite,
    Enrich,
    SourceImage,
    Publish,
}

impl PipelineStage {
    /// Stable string key used in storage and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Rewrite => "rewrite",
            Self::Enrich => "enrich",
            Self::SourceImage => "source_image",
            Self::Publish => "publish",
        }
    }

    /// All stages in pipeline order.
    pub fn all() -> [PipelineStage; 5] {
        [
            Self::Extract,
            Self::Rewrite,
            Self::Enrich,
            Self::SourceImage,
            Self::Publish,
        ]
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job currently is in its lifecycle.
///
/// `Succeeded`, `Failed`, and `Abandoned` are terminal; everything else
/// advances strictly forward. `Failed` records the failing stage, the error
/// kind, and a human-readable cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Created,
    Extracting,
    Rewriting,
    Enriching,
    SourcingImage,
    Publishing,
    Succeeded,
    Failed {
        stage: PipelineStage,
        kind: ErrorKind,
        message: String,
    },
    Abandoned,
}

impl JobState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed { .. } | Self::Abandoned
        )
    }

    /// The in-flight state corresponding to a pipeline stage.
    pub fn running(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Extract => Self::Extracting,
            PipelineStage::Rewrite => Self::Rewriting,
            PipelineStage::Enrich => Self::Enriching,
            PipelineStage::SourceImage => Self::SourcingImage,
            PipelineStage::Publish => Self::Publishing,
        }
    }

    /// Short display label for job listings.
    pub fn label(&self) -> String {
        match self {
            Self::Created => "created".into(),
            Self::Extracting => "extracting".into(),
            Self::Rewriting => "rewriting".into(),
            Self::Enriching => "enriching".into(),
            Self::SourcingImage => "sourcing image".into(),
            Self::Publishing => "publishing".into(),
            Self::Succeeded => "succeeded".into(),
            Self::Failed { stage, kind, .. } => format!("failed ({stage}: {kind})"),
            Self::Abandoned => "abandoned".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry counters and failure records
// ---------------------------------------------------------------------------

/// Per-stage retry counters, persisted with the job after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounters {
    #[serde(default)]
    pub extract: u32,
    #[serde(default)]
    pub rewrite: u32,
    #[serde(default)]
    pub enrich: u32,
    #[serde(default)]
    pub source_image: u32,
    #[serde(default)]
    pub publish: u32,
}

impl RetryCounters {
    /// The retry count recorded for a stage.
    pub fn get(&self, stage: PipelineStage) -> u32 {
        match stage {
            PipelineStage::Extract => self.extract,
            PipelineStage::Rewrite => self.rewrite,
            PipelineStage::Enrich => self.enrich,
            PipelineStage::SourceImage => self.source_image,
            PipelineStage::Publish => self.publish,
        }
    }

    /// Increment the retry count for a stage.
    pub fn bump(&mut self, stage: PipelineStage) {
        match stage {
            PipelineStage::Extract => self.extract += 1,
            PipelineStage::Rewrite => self.rewrite += 1,
            PipelineStage::Enrich => self.enrich += 1,
            PipelineStage::SourceImage => self.source_image += 1,
            PipelineStage::Publish => self.publish += 1,
        }
    }
}

/// One entry in a job's ordered error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage that failed.
    pub stage: PipelineStage,
    /// Classified error kind.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ArticleJob
// ---------------------------------------------------------------------------

/// One unit of work tracked end-to-end by the orchestrator.
///
/// Mutated only by the orchestrator and persisted after every transition so
/// a process restart resumes from the last completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleJob {
    /// Stable identifier across retries and restarts.
    pub id: JobId,
    /// What the job was submitted with.
    pub source: SourceReference,
    /// Current lifecycle state.
    pub state: JobState,
    /// Per-stage retry counters.
    #[serde(default)]
    pub retries: RetryCounters,
    /// Ordered history of stage failures.
    #[serde(default)]
    pub errors: Vec<FailureRecord>,
    /// Set once the publish stage succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PublishReceipt>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job was last persisted.
    pub updated_at: DateTime<Utc>,
}

impl ArticleJob {
    /// Create a fresh job in the `Created` state.
    pub fn new(source: SourceReference) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source,
            state: JobState::Created,
            retries: RetryCounters::default(),
            errors: Vec::new(),
            receipt: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a failure record and refresh `updated_at`.
    pub fn record_failure(&mut self, stage: PipelineStage, kind: ErrorKind, message: String) {
        self.errors.push(FailureRecord {
            stage,
            kind,
            message,
            at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// The kind of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Heading,
    Paragraph,
    List,
    Quote,
}

/// One block of article content, carried as Markdown text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
}

impl Block {
    pub fn heading(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Heading,
            text: text.into(),
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Paragraph,
            text: text.into(),
        }
    }
}

/// Immutable snapshot of article content at one pipeline stage.
///
/// Each stage consumes the prior stage's draft and produces a new one; the
/// body is a typed block list (not opaque text) so link and keyword insertion
/// can target specific blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Article title.
    pub title: String,
    /// Body as an ordered block list.
    pub blocks: Vec<Block>,
    /// Where the article came from, if scraped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Source attribution line (typically the host).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    /// Keyword candidates accumulated along the pipeline.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Draft {
    /// Render the body as Markdown (headings as `##`, quotes as `>`).
    pub fn body_markdown(&self) -> String {
        let mut out = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            match block.kind {
                BlockKind::Heading => out.push(format!("## {}", block.text)),
                BlockKind::Quote => out.push(format!("> {}", block.text)),
                BlockKind::Paragraph | BlockKind::List => out.push(block.text.clone()),
            }
        }
        out.join("\n\n")
    }

    /// The first paragraph block, if any.
    pub fn lead_paragraph(&self) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| b.kind == BlockKind::Paragraph)
            .map(|b| b.text.as_str())
    }

    /// Approximate word count across all blocks.
    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.split_whitespace().count())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// SEO metadata
// ---------------------------------------------------------------------------

/// A link inserted during enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoLink {
    /// Anchor text as it appears in the body.
    pub anchor: String,
    /// Link target.
    pub url: String,
    /// Whether the link passes ranking credit (do-follow).
    pub follow: bool,
    /// Index of the block the link was inserted into.
    pub block_index: usize,
}

/// Derived SEO artifact attached to a draft; never mutated after enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoMetadata {
    /// Assigned category.
    pub category: String,
    /// Ordered tag list, deduplicated after synonym folding.
    pub tags: Vec<String>,
    /// Meta description synthesized from the lead paragraph.
    pub meta_description: String,
    /// Links inserted into the body.
    #[serde(default)]
    pub links: Vec<SeoLink>,
}

// ---------------------------------------------------------------------------
// Image asset and publish receipt
// ---------------------------------------------------------------------------

/// A downloaded, license-compliant image with attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Content type reported by the provider (e.g. `image/jpeg`).
    pub mime: String,
    /// Attribution string required by the license.
    pub attribution: String,
    /// Where the image was found.
    pub source_url: String,
    /// License identifier (e.g. `cc0`, `by`).
    pub license: String,
}

/// Result of a successful publish; absence means the job has not yet
/// reached terminal success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Remote post identifier.
    pub post_id: u64,
    /// Canonical URL of the published post.
    pub url: String,
    /// When the CMS accepted the post.
    pub published_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let s = id.to_string();
        let parsed: JobId = s.parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_serialization_roundtrip() {
        let mut job = ArticleJob::new(SourceReference::Url {
            url: "https://news.example.com/article".into(),
        });
        job.state = JobState::Rewriting;
        job.retries.bump(PipelineStage::Rewrite);
        job.record_failure(
            PipelineStage::Rewrite,
            ErrorKind::Model,
            "model call timed out".into(),
        );

        let json = serde_json::to_string(&job).expect("serialize");
        let parsed: ArticleJob = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, job);
    }

    #[test]
    fn failed_state_serialization() {
        let state = JobState::Failed {
            stage: PipelineStage::Rewrite,
            kind: ErrorKind::Model,
            message: "retries exhausted".into(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(r#""state":"failed""#));
        assert!(json.contains(r#""stage":"rewrite""#));

        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_terminal());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Abandoned.is_terminal());
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Publishing.is_terminal());
    }

    #[test]
    fn retry_counters_per_stage() {
        let mut counters = RetryCounters::default();
        counters.bump(PipelineStage::Extract);
        counters.bump(PipelineStage::Extract);
        counters.bump(PipelineStage::Publish);
        assert_eq!(counters.get(PipelineStage::Extract), 2);
        assert_eq!(counters.get(PipelineStage::Publish), 1);
        assert_eq!(counters.get(PipelineStage::Enrich), 0);
    }

    #[test]
    fn draft_body_markdown_and_lead() {
        let draft = Draft {
            title: "Ten Tips".into(),
            blocks: vec![
                Block::heading("Getting Started"),
                Block::paragraph("First paragraph of the article."),
                Block::paragraph("Second paragraph."),
            ],
            source_url: None,
            attribution: None,
            keywords: vec![],
        };

        let md = draft.body_markdown();
        assert!(md.starts_with("## Getting Started"));
        assert_eq!(draft.lead_paragraph(), Some("First paragraph of the article."));
        assert_eq!(draft.word_count(), 9);
    }

    #[test]
    fn source_reference_label() {
        let url = SourceReference::Url {
            url: "https://a.example/x".into(),
        };
        assert_eq!(url.label(), "https://a.example/x");

        let raw = SourceReference::RawText {
            text: "\nMy Title\nbody".into(),
        };
        assert!(raw.label().contains("My Title"));
    }
}
