//! Content Extractor: source reference → normalized article draft.
//!
//! Fetches a source URL (or accepts raw text), isolates the article core
//! from page noise via [`adapters`], and produces a block-structured
//! [`Draft`]. Fetch failures are classified transient (timeout, 5xx) or
//! permanent (404, malformed URL); content that falls below the minimum
//! viable article threshold is a parse error, not a draft.

pub mod adapters;
mod blocks;

use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use autoblogger_shared::{
    AutoBloggerError, Draft, ExtractConfig, Result, SourceReference,
};

pub use adapters::{AdapterRegistry, ArticleHtml, GenericAdapter, SchemaArticleAdapter,
    SiteAdapter, WordPressAdapter};
pub use blocks::{blocks_from_html, blocks_from_raw_text};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("autoblogger/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Turns a [`SourceReference`] into a normalized [`Draft`].
pub struct Extractor {
    client: reqwest::Client,
    registry: AdapterRegistry,
    min_words: usize,
    min_paragraphs: usize,
}

impl Extractor {
    /// Create an extractor with the given thresholds and per-request timeout.
    pub fn new(config: &ExtractConfig, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| {
                AutoBloggerError::fetch_permanent(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            registry: AdapterRegistry::new(),
            min_words: config.min_words as usize,
            min_paragraphs: config.min_paragraphs as usize,
        })
    }

    /// Extract a draft from a source reference.
    #[instrument(skip_all, fields(source = %source.label()))]
    pub async fn extract(&self, source: &SourceReference) -> Result<Draft> {
        let draft = match source {
            SourceReference::Url { url } => self.extract_url(url).await?,
            SourceReference::RawText { text } => self.extract_raw(text)?,
        };
        self.check_viability(&draft)?;
        Ok(draft)
    }

    /// Fetch and extract an article from a URL.
    async fn extract_url(&self, url_str: &str) -> Result<Draft> {
        let url = Url::parse(url_str)
            .map_err(|e| AutoBloggerError::fetch_permanent(format!("malformed URL {url_str}: {e}")))?;

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify_send_error(&url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(&url, status));
        }

        let body = response.text().await.map_err(|e| {
            AutoBloggerError::fetch_transient(format!("{url}: body read failed: {e}"))
        })?;

        let doc = Html::parse_document(&body);

        let adapter = self.registry.detect(&doc, &url);
        debug!(adapter = adapter.name(), %url, "site adapter selected");

        let article = adapter.extract_article(&doc);
        let blocks = blocks_from_html(&article.html);
        let title = extract_title(&doc).unwrap_or_else(|| url_slug_title(&url));
        let keywords = extract_meta_keywords(&doc);

        Ok(Draft {
            title,
            blocks,
            source_url: Some(url.to_string()),
            attribution: url.host_str().map(|h| h.to_string()),
            keywords,
        })
    }

    /// Build a draft from raw supplied text.
    fn extract_raw(&self, text: &str) -> Result<Draft> {
        let (title, blocks) = blocks_from_raw_text(text);
        if title.is_empty() {
            return Err(AutoBloggerError::parse("raw text source has no title line"));
        }
        Ok(Draft {
            title,
            blocks,
            source_url: None,
            attribution: None,
            keywords: Vec::new(),
        })
    }

    /// Guard against extracting navigation chrome instead of an article body.
    fn check_viability(&self, draft: &Draft) -> Result<()> {
        let words = draft.word_count();
        let paragraphs = draft
            .blocks
            .iter()
            .filter(|b| b.kind == autoblogger_shared::BlockKind::Paragraph)
            .count();

        if words < self.min_words || paragraphs < self.min_paragraphs {
            return Err(AutoBloggerError::parse(format!(
                "extracted content below viability threshold: {words} words, \
                 {paragraphs} paragraphs (need {} words, {} paragraphs)",
                self.min_words, self.min_paragraphs
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Classify a reqwest send error: timeouts and connection failures are
/// transient; everything else on the wire is treated as transient too,
/// since the request itself was well-formed.
fn classify_send_error(url: &Url, e: &reqwest::Error) -> AutoBloggerError {
    if e.is_timeout() {
        AutoBloggerError::fetch_transient(format!("{url}: request timed out"))
    } else {
        AutoBloggerError::fetch_transient(format!("{url}: {e}"))
    }
}

/// Classify a non-success HTTP status: 5xx and 408/429 are transient,
/// other 4xx are permanent.
fn classify_status(url: &Url, status: reqwest::StatusCode) -> AutoBloggerError {
    if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        AutoBloggerError::fetch_transient(format!("{url}: HTTP {status}"))
    } else {
        AutoBloggerError::fetch_permanent(format!("{url}: HTTP {status}"))
    }
}

// ---------------------------------------------------------------------------
// Document helpers
// ---------------------------------------------------------------------------

/// Extract the article title: og:title meta, then first H1, then <title>.
fn extract_title(doc: &Html) -> Option<String> {
    let og_sel = Selector::parse(r#"meta[property="og:title"]"#).unwrap();
    if let Some(el) = doc.select(&og_sel).next()
        && let Some(content) = el.value().attr("content")
        && !content.trim().is_empty()
    {
        return Some(content.trim().to_string());
    }

    let h1_sel = Selector::parse("h1").unwrap();
    if let Some(el) = doc.select(&h1_sel).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }

    let title_sel = Selector::parse("title").unwrap();
    doc.select(&title_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Keyword candidates from a `<meta name="keywords">` tag.
fn extract_meta_keywords(doc: &Html) -> Vec<String> {
    let sel = Selector::parse(r#"meta[name="keywords"]"#).unwrap();
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|content| {
            content
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Fallback title derived from the last URL path segment.
fn url_slug_title(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or("untitled");

    segment
        .trim_end_matches(".html")
        .replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(c) => {
                    let upper: String = c.to_uppercase().collect();
                    format!("{upper}{}", chars.collect::<String>())
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
