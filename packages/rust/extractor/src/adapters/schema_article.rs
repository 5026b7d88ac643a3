//! Adapter for pages marked up with schema.org Article microdata.

use scraper::{Html, Selector};
use url::Url;

use super::{ArticleHtml, SiteAdapter, strip_chrome};

/// Detects and extracts articles carrying schema.org markup
/// (`itemtype="…/Article"` or an `itemprop="articleBody"` element).
pub struct SchemaArticleAdapter;

impl SiteAdapter for SchemaArticleAdapter {
    fn detect(&self, doc: &Html, _url: &Url) -> bool {
        let body_sel = Selector::parse(r#"[itemprop="articleBody"]"#).unwrap();
        if doc.select(&body_sel).next().is_some() {
            return true;
        }

        let item_sel = Selector::parse("[itemtype]").unwrap();
        for el in doc.select(&item_sel) {
            if let Some(itemtype) = el.value().attr("itemtype")
                && itemtype.to_lowercase().contains("article")
            {
                return true;
            }
        }

        false
    }

    fn extract_article(&self, doc: &Html) -> ArticleHtml {
        // Prefer the explicit articleBody element, then the article item itself
        let selectors = [r#"[itemprop="articleBody"]"#, "[itemtype] article", "article"];

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
        "schema-article"
    }
}
