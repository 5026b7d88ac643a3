//! Shared types, error model, and configuration for autoblogger.
//!
//! This crate is the foundation depended on by all other autoblogger crates.
//! It provides:
//! - [`AutoBloggerError`] — the unified error type with retryable/permanent
//!   classification
//! - Domain types ([`ArticleJob`], [`Draft`], [`SeoMetadata`],
//!   [`PublishReceipt`], [`JobId`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CmsConfig, DefaultsConfig, ExtractConfig, ImagesConfig, ModelConfig,
    RetriesConfig, SeoConfig, TimeoutsConfig, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, validate_cms_credentials, validate_model_key,
};
pub use error::{AutoBloggerError, ErrorKind, Result};
pub use types::{
    ArticleJob, Block, BlockKind, CURRENT_SCHEMA_VERSION, Draft, FailureRecord, ImageAsset,
    JobId, JobState, PipelineStage, PublishReceipt, RetryCounters, SeoLink, SeoMetadata,
    SourceReference,
};
