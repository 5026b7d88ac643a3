//! Site adapter trait and built-in adapters for article extraction.
//!
//! Adapters isolate the article core from page noise for specific site
//! shapes (schema.org articles, WordPress themes) with a generic
//! readability fallback that always matches.

mod generic;
mod schema_article;
mod wordpress;

use scraper::Html;
use url::Url;

pub use generic::GenericAdapter;
pub use schema_article::SchemaArticleAdapter;
pub use wordpress::WordPressAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Content extraction result from an adapter: the article core as HTML,
/// with navigation/chrome stripped.
#[derive(Debug, Clone)]
pub struct ArticleHtml {
    /// Clean HTML of the article body.
    pub html: String,
}

/// Trait for site-specific article extraction.
///
/// Adapters are tried in priority order; `GenericAdapter` is the always-last fallback.
pub trait SiteAdapter: Send + Sync {
    /// Try to detect this site shape in the parsed HTML.
    /// Returns `true` if this adapter should handle the document.
    fn detect(&self, doc: &Html, url: &Url) -> bool;

    /// Extract the article body as clean HTML.
    fn extract_article(&self, doc: &Html) -> ArticleHtml;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    /// Create a registry with all built-in adapters (specific first, generic last).
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Box::new(SchemaArticleAdapter),
                Box::new(WordPressAdapter),
                Box::new(GenericAdapter),
            ],
        }
    }

    /// Detect the best adapter for the given HTML document.
    /// Always returns an adapter (GenericAdapter is the fallback).
    pub fn detect(&self, doc: &Html, url: &Url) -> &dyn SiteAdapter {
        for adapter in &self.adapters {
            if adapter.detect(doc, url) {
                return adapter.as_ref();
            }
        }
        // Unreachable: GenericAdapter always matches
        unreachable!("GenericAdapter must always match");
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip common navigation/chrome elements from extracted HTML.
pub(crate) fn strip_chrome(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let chrome_sel = scraper::Selector::parse(
        "nav, header, footer, aside, script, style, form, .sidebar, .share, .comments, .related-posts",
    )
    .unwrap();

    let mut result = html.to_string();
    for el in doc.select(&chrome_sel) {
        let outer = el.html();
        result = result.replace(&outer, "");
    }
    result
}
