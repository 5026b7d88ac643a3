//! Adapter for WordPress-themed article pages.

use scraper::{Html, Selector};
use url::Url;

use super::{ArticleHtml, SiteAdapter, strip_chrome};

/// Detects WordPress sites via the generator meta tag or the standard
/// theme content containers.
pub struct WordPressAdapter;

impl SiteAdapter for WordPressAdapter {
    fn detect(&self, doc: &Html, _url: &Url) -> bool {
        // Check for <meta name="generator" content="WordPress ...">
        let meta_sel = Selector::parse(r#"meta[name="generator"]"#).unwrap();
        for el in doc.select(&meta_sel) {
            if let Some(content) = el.value().attr("content")
                && content.to_lowercase().contains("wordpress")
            {
                return true;
            }
        }

        // Check for standard theme content containers
        let content_sel = Selector::parse(".entry-content, .post-content").unwrap();
        doc.select(&content_sel).next().is_some()
    }

    fn extract_article(&self, doc: &Html) -> ArticleHtml {
        let selectors = [".entry-content", ".post-content", "article", "main"];

        for sel_str in selectors {
            let sel = Selector::parse(sel_str).unwrap();
            if let Some(el) = doc.select(&sel).next() {
                return ArticleHtml {
                    html: strip_chrome(&el.inner_html()),
                };
            }
        }

        ArticleHtml {
            html: String::new(),
        }
    }

    fn name(&self) -> &str {
        "wordpress"
    }
}
