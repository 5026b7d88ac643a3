//! Application configuration for autoblogger.
//!
//! User config lives at `~/.autoblogger/autoblogger.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file; each section names the environment
//! variable that holds its key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AutoBloggerError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "autoblogger.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".autoblogger";

// ---------------------------------------------------------------------------
// Config structs (matching autoblogger.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Language-model service settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// CMS (publishing target) settings.
    #[serde(default)]
    pub cms: CmsConfig,

    /// Stock-image provider settings.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Content-extraction thresholds.
    #[serde(default)]
    pub extract: ExtractConfig,

    /// SEO enrichment policy parameters.
    #[serde(default)]
    pub seo: SeoConfig,

    /// Per-stage retry budgets and backoff.
    #[serde(default)]
    pub retries: RetriesConfig,

    /// Per-operation timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the declarative rule tables.
    #[serde(default = "default_rules_dir")]
    pub rules_dir: String,

    /// Directory for the job-state database.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Maximum article jobs processed concurrently.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,

    /// Name of the style template to use for rewriting.
    #[serde(default = "default_style")]
    pub style: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            rules_dir: default_rules_dir(),
            state_dir: default_state_dir(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            style: default_style(),
        }
    }
}

fn default_rules_dir() -> String {
    "~/.autoblogger/rules".into()
}
fn default_state_dir() -> String {
    "~/.autoblogger/state".into()
}
fn default_max_concurrent_jobs() -> u32 {
    2
}
fn default_style() -> String {
    "default".into()
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_model_api_key_env")]
    pub api_key_env: String,

    /// Chat-completions endpoint base URL.
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Upper bound on completion tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_model_api_key_env(),
            base_url: default_model_base_url(),
            model_id: default_model_id(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_model_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model_id() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    2048
}

/// `[cms]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsConfig {
    /// Base URL of the CMS remote API.
    #[serde(default)]
    pub base_url: String,

    /// Account username.
    #[serde(default)]
    pub username: String,

    /// Name of the env var holding the account password/application key.
    #[serde(default = "default_cms_password_env")]
    pub password_env: String,

    /// Status for created posts: "draft" or "publish".
    #[serde(default = "default_publish_status")]
    pub publish_status: String,
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password_env: default_cms_password_env(),
            publish_status: default_publish_status(),
        }
    }
}

fn default_cms_password_env() -> String {
    "AUTOBLOGGER_CMS_PASSWORD".into()
}
fn default_publish_status() -> String {
    "publish".into()
}

/// `[images]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Base URL of the licensed-image search API.
    #[serde(default = "default_images_base_url")]
    pub base_url: String,

    /// Name of the env var holding the provider API key (may be unset for
    /// providers that allow anonymous queries).
    #[serde(default = "default_images_api_key_env")]
    pub api_key_env: String,

    /// Acceptable license identifiers, in preference order.
    #[serde(default = "default_licenses")]
    pub licenses: Vec<String>,

    /// Result page size per keyword query.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            base_url: default_images_base_url(),
            api_key_env: default_images_api_key_env(),
            licenses: default_licenses(),
            page_size: default_page_size(),
        }
    }
}

fn default_images_base_url() -> String {
    "https://api.openverse.org".into()
}
fn default_images_api_key_env() -> String {
    "AUTOBLOGGER_IMAGES_API_KEY".into()
}
fn default_licenses() -> Vec<String> {
    vec!["cc0".into(), "by".into(), "by-sa".into()]
}
fn default_page_size() -> u32 {
    10
}

/// `[extract]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Minimum word count for a viable article body.
    #[serde(default = "default_min_words")]
    pub min_words: u32,

    /// Minimum number of paragraph blocks for a viable article body.
    #[serde(default = "default_min_paragraphs")]
    pub min_paragraphs: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            min_paragraphs: default_min_paragraphs(),
        }
    }
}

fn default_min_words() -> u32 {
    120
}
fn default_min_paragraphs() -> u32 {
    2
}

/// `[seo]` section — all tunable policy parameters of the enricher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeoConfig {
    /// How many canonical tags to keep.
    #[serde(default = "default_top_tags")]
    pub top_tags: u32,

    /// Score multiplier for terms appearing in the title.
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,

    /// Score multiplier for terms in the lead paragraph.
    #[serde(default = "default_lead_weight")]
    pub lead_weight: f64,

    /// Flat bonus for configured custom SEO keywords found in the body.
    #[serde(default = "default_custom_keyword_bonus")]
    pub custom_keyword_bonus: f64,

    /// Maximum inserted links per paragraph block.
    #[serde(default = "default_max_links_per_block")]
    pub max_links_per_block: u32,

    /// Character budget for the meta description.
    #[serde(default = "default_meta_description_chars")]
    pub meta_description_chars: u32,

    /// Category assigned when no tag matches the category table.
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
}

impl Default for SeoConfig {
    fn default() -> Self {
        Self {
            top_tags: default_top_tags(),
            title_weight: default_title_weight(),
            lead_weight: default_lead_weight(),
            custom_keyword_bonus: default_custom_keyword_bonus(),
            max_links_per_block: default_max_links_per_block(),
            meta_description_chars: default_meta_description_chars(),
            fallback_category: default_fallback_category(),
        }
    }
}

fn default_top_tags() -> u32 {
    5
}
fn default_title_weight() -> f64 {
    3.0
}
fn default_lead_weight() -> f64 {
    2.0
}
fn default_custom_keyword_bonus() -> f64 {
    2.0
}
fn default_max_links_per_block() -> u32 {
    1
}
fn default_meta_description_chars() -> u32 {
    155
}
fn default_fallback_category() -> String {
    "general".into()
}

/// `[retries]` section — per-stage budgets and backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetriesConfig {
    #[serde(default = "default_extract_retries")]
    pub extract: u32,
    #[serde(default = "default_rewrite_retries")]
    pub rewrite: u32,
    #[serde(default = "default_enrich_retries")]
    pub enrich: u32,
    #[serde(default = "default_image_retries")]
    pub source_image: u32,
    #[serde(default = "default_publish_retries")]
    pub publish: u32,

    /// Initial backoff delay in milliseconds (doubled per attempt).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Ceiling for the backoff delay in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            extract: default_extract_retries(),
            rewrite: default_rewrite_retries(),
            enrich: default_enrich_retries(),
            source_image: default_image_retries(),
            publish: default_publish_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

fn default_extract_retries() -> u32 {
    3
}
fn default_rewrite_retries() -> u32 {
    3
}
fn default_enrich_retries() -> u32 {
    1
}
fn default_image_retries() -> u32 {
    3
}
fn default_publish_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}

/// `[timeouts]` section — per-operation bounds in seconds. Exceeding a
/// timeout is a transient failure counted against the stage's retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_model_secs")]
    pub model_secs: u64,
    #[serde(default = "default_image_secs")]
    pub image_secs: u64,
    #[serde(default = "default_publish_secs")]
    pub publish_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_fetch_secs(),
            model_secs: default_model_secs(),
            image_secs: default_image_secs(),
            publish_secs: default_publish_secs(),
        }
    }
}

fn default_fetch_secs() -> u64 {
    30
}
fn default_model_secs() -> u64 {
    120
}
fn default_image_secs() -> u64 {
    30
}
fn default_publish_secs() -> u64 {
    30
}

impl RetriesConfig {
    /// The retry budget for a stage.
    pub fn budget(&self, stage: crate::types::PipelineStage) -> u32 {
        use crate::types::PipelineStage;
        match stage {
            PipelineStage::Extract => self.extract,
            PipelineStage::Rewrite => self.rewrite,
            PipelineStage::Enrich => self.enrich,
            PipelineStage::SourceImage => self.source_image,
            PipelineStage::Publish => self.publish,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.autoblogger/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AutoBloggerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.autoblogger/autoblogger.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AutoBloggerError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AutoBloggerError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AutoBloggerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AutoBloggerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AutoBloggerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Check that the model-service API key env var is set and non-empty.
pub fn validate_model_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.model.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(AutoBloggerError::config(format!(
            "model API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the CMS credentials are usable: base URL, username, and the
/// password env var must all be present.
pub fn validate_cms_credentials(config: &AppConfig) -> Result<()> {
    if config.cms.base_url.is_empty() {
        return Err(AutoBloggerError::config(
            "cms.base_url is not set in autoblogger.toml",
        ));
    }
    if config.cms.username.is_empty() {
        return Err(AutoBloggerError::config(
            "cms.username is not set in autoblogger.toml",
        ));
    }
    let var_name = &config.cms.password_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(AutoBloggerError::config(format!(
            "CMS password not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("rules_dir"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("fallback_category"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retries.rewrite, 3);
        assert_eq!(parsed.seo.top_tags, 5);
        assert_eq!(parsed.model.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[cms]
base_url = "https://blog.example.com"
username = "editor"

[seo]
top_tags = 8
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.cms.base_url, "https://blog.example.com");
        assert_eq!(config.seo.top_tags, 8);
        // Untouched sections keep their defaults
        assert_eq!(config.seo.max_links_per_block, 1);
        assert_eq!(config.retries.publish, 5);
        assert_eq!(config.timeouts.model_secs, 120);
    }

    #[test]
    fn retry_budget_per_stage() {
        use crate::types::PipelineStage;
        let retries = RetriesConfig::default();
        assert_eq!(retries.budget(PipelineStage::Extract), 3);
        assert_eq!(retries.budget(PipelineStage::Enrich), 1);
        assert_eq!(retries.budget(PipelineStage::Publish), 5);
    }

    #[test]
    fn model_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.model.api_key_env = "AB_TEST_NONEXISTENT_KEY_98765".into();
        let result = validate_model_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn cms_validation_requires_base_url() {
        let config = AppConfig::default();
        let result = validate_cms_credentials(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cms.base_url"));
    }
}
