//! Generic (fallback) site adapter.
//!
//! Always matches — used when no site-specific adapter is detected.
//! Uses readability heuristics to find the main content area.

use scraper::{Html, Selector};
use url::Url;

use super::{ArticleHtml, SiteAdapter, strip_chrome};

/// Generic adapter that works on arbitrary HTML pages.
/// Always matches as the lowest-priority fallback.
pub struct GenericAdapter;

impl SiteAdapter for GenericAdapter {
    fn detect(&self, _doc: &Html, _url: &Url) -> bool {
        // Generic adapter always matches
        true
    }

    fn extract_article(&self, doc: &Html) -> ArticleHtml {
        // Readability heuristics: try <main>, <article>, then known containers
        let selectors = ["main", "article", r#"[role="main"]"#, ".content"];

        for sel_str in selectors {
            let sel = Selector::parse(sel_str).unwrap();
            if let Some(el) = doc.select(&sel).next() {
                return ArticleHtml {
                    html: strip_chrome(&el.inner_html()),
                };
            }
        }

        // Last resort: use the body, stripping nav/header/footer/script/style/aside
        let body_sel = Selector::parse("body").unwrap();
        if let Some(body) = doc.select(&body_sel).next() {
            return ArticleHtml {
                html: strip_chrome(&body.inner_html()),
            };
        }

        ArticleHtml {
            html: String::new(),
        }
    }

    fn name(&self) -> &str {
        "generic"
    }
}
