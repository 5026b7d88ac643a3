//! Rule Store: declarative content-policy tables for the pipeline.
//!
//! [`RuleSet::load`] reads a fixed set of JSON tables from a rules directory,
//! validates them eagerly, and exposes read-only lookups. Schema violations
//! fail at load, never at query time. A loaded `RuleSet` is immutable for the
//! process lifetime and safe to share across concurrent jobs; reloading
//! builds a fresh aggregate and swaps it in whole.

mod tables;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use autoblogger_shared::{AutoBloggerError, Result};

pub use tables::{DoFollowTable, LinkCandidate, StyleTemplate, TABLE_FILES, default_tables};

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// The immutable aggregate of all declarative content-policy tables.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// `category -> keywords`, in table insertion order.
    categories: Vec<(String, Vec<String>)>,
    /// `term -> canonical tag`, in table insertion order (first match wins).
    synonyms: Vec<(String, String)>,
    /// Lowercased stop words.
    stop_words: HashSet<String>,
    /// `topic -> candidate links`, internal catalog.
    internal_links: Vec<(String, Vec<LinkCandidate>)>,
    /// `topic -> candidate links`, external catalog.
    external_links: Vec<(String, Vec<LinkCandidate>)>,
    /// Do-follow domain allow list.
    allow_domains: Vec<String>,
    /// Never-link domain deny list.
    deny_domains: Vec<String>,
    /// Named rewrite style templates.
    styles: BTreeMap<String, StyleTemplate>,
    /// Phrases the rewriter must never emit (lowercased).
    banned_phrases: Vec<String>,
    /// Extra keywords always considered during enrichment (lowercased).
    custom_keywords: Vec<String>,
}

impl RuleSet {
    /// Load and validate all rule tables from `dir`.
    ///
    /// Fails with a config error when any table is missing, malformed, or
    /// internally inconsistent (synonym chain/cycle, a domain in both the
    /// allow and deny lists, an unparseable link URL, an empty category,
    /// a style template without a `{body}` placeholder).
    pub fn load(dir: &Path) -> Result<Self> {
        let categories = read_keyword_map(&dir.join("category_keywords.json"))?;
        let synonyms = read_string_map(&dir.join("tag_synonyms.json"))?;
        let stop_words: HashSet<String> = read_string_list(&dir.join("stop_words.json"))?
            .into_iter()
            .map(|w| w.to_lowercase())
            .collect();
        let internal_links = read_link_map(&dir.join("internal_links.json"))?;
        let external_links = read_link_map(&dir.join("external_links.json"))?;
        let do_follow: DoFollowTable = read_table(&dir.join("do_follow_urls.json"))?;
        let styles: BTreeMap<String, StyleTemplate> = read_table(&dir.join("style_prompt.json"))?;
        let banned_phrases: Vec<String> = read_string_list(&dir.join("banned_phrases.json"))?
            .into_iter()
            .map(|p| p.to_lowercase())
            .collect();
        let custom_keywords: Vec<String> =
            read_string_list(&dir.join("custom_seo_keywords.json"))?
                .into_iter()
                .map(|k| k.to_lowercase())
                .collect();

        let ruleset = Self {
            categories,
            synonyms,
            stop_words,
            internal_links,
            external_links,
            allow_domains: do_follow.allow,
            deny_domains: do_follow.deny,
            styles,
            banned_phrases,
            custom_keywords,
        };
        ruleset.validate()?;

        info!(
            categories = ruleset.categories.len(),
            synonyms = ruleset.synonyms.len(),
            stop_words = ruleset.stop_words.len(),
            styles = ruleset.styles.len(),
            "rule tables loaded"
        );

        Ok(ruleset)
    }

    /// Write the starter tables into `dir` (created if missing).
    /// Existing files are left untouched. Returns the paths written.
    pub fn init(dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| AutoBloggerError::io(dir, e))?;

        let mut written = Vec::new();
        for (name, value) in default_tables() {
            let path = dir.join(name);
            if path.exists() {
                debug!(?path, "table exists, skipping");
                continue;
            }
            let content = serde_json::to_string_pretty(&value)
                .map_err(|e| AutoBloggerError::config(e.to_string()))?;
            std::fs::write(&path, content).map_err(|e| AutoBloggerError::io(&path, e))?;
            written.push(path);
        }
        Ok(written)
    }

    // -----------------------------------------------------------------------
    // Lookups (pure functions of the loaded tables)
    // -----------------------------------------------------------------------

    /// Fold a term to its canonical tag.
    ///
    /// Scans the synonym table in insertion order; the first case-insensitive
    /// match wins. Terms without a synonym entry are their own canonical form
    /// (lowercased). Load validation guarantees folding converges in one
    /// step, so applying this twice is idempotent.
    pub fn canonical_tag(&self, term: &str) -> String {
        let lower = term.to_lowercase();
        for (syn, canonical) in &self.synonyms {
            if syn.to_lowercase() == lower {
                return canonical.to_lowercase();
            }
        }
        lower
    }

    /// Whether a term is a stop word.
    pub fn is_stop_word(&self, term: &str) -> bool {
        self.stop_words.contains(&term.to_lowercase())
    }

    /// Candidate links for a topic: internal catalog first, then external.
    pub fn candidate_links_for(&self, topic: &str) -> Vec<&LinkCandidate> {
        let lower = topic.to_lowercase();
        let mut out = Vec::new();
        for (t, candidates) in &self.internal_links {
            if t.to_lowercase() == lower {
                out.extend(candidates.iter());
            }
        }
        for (t, candidates) in &self.external_links {
            if t.to_lowercase() == lower {
                out.extend(candidates.iter());
            }
        }
        out
    }

    /// Whether links to this domain pass ranking credit (do-follow).
    pub fn is_do_follow(&self, domain: &str) -> bool {
        domain_matches(&self.allow_domains, domain)
    }

    /// Whether this domain must never be linked.
    pub fn is_denied(&self, domain: &str) -> bool {
        domain_matches(&self.deny_domains, domain)
    }

    /// The first banned phrase contained in `text`, if any.
    pub fn banned_phrase_in(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.banned_phrases
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(|p| p.as_str())
    }

    /// A named style template.
    pub fn style(&self, name: &str) -> Option<&StyleTemplate> {
        self.styles.get(name)
    }

    /// Categories with their keyword lists, in table order.
    pub fn categories(&self) -> &[(String, Vec<String>)] {
        &self.categories
    }

    /// The category whose keyword list contains `tag`, if any.
    /// Multi-category ties resolve by table insertion order.
    pub fn category_for_tag(&self, tag: &str) -> Option<&str> {
        let lower = tag.to_lowercase();
        // A tag that *is* a category name counts as a match for it.
        for (category, keywords) in &self.categories {
            if category.to_lowercase() == lower
                || keywords.iter().any(|k| k.to_lowercase() == lower)
            {
                return Some(category.as_str());
            }
        }
        None
    }

    /// Extra keywords always considered during enrichment.
    pub fn custom_keywords(&self) -> &[String] {
        &self.custom_keywords
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn validate(&self) -> Result<()> {
        // Synonym folding must converge in one step: a canonical target may
        // not itself be a synonym key mapping somewhere else.
        for (term, canonical) in &self.synonyms {
            let canon_lower = canonical.to_lowercase();
            for (other_term, other_canonical) in &self.synonyms {
                if other_term.to_lowercase() == canon_lower
                    && other_canonical.to_lowercase() != canon_lower
                {
                    return Err(AutoBloggerError::config(format!(
                        "tag_synonyms.json: chain \"{term}\" -> \"{canonical}\" -> \
                         \"{other_canonical}\" (folding must converge in one step)"
                    )));
                }
            }
        }

        // A domain may not be simultaneously do-follow and denied.
        for allow in &self.allow_domains {
            if self
                .deny_domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(allow))
            {
                return Err(AutoBloggerError::config(format!(
                    "do_follow_urls.json: domain \"{allow}\" appears in both allow and deny"
                )));
            }
        }

        // Every category needs at least one keyword.
        for (category, keywords) in &self.categories {
            if keywords.is_empty() {
                return Err(AutoBloggerError::config(format!(
                    "category_keywords.json: category \"{category}\" has no keywords"
                )));
            }
        }

        // Every link URL must parse.
        for (topic, candidates) in self.internal_links.iter().chain(&self.external_links) {
            for candidate in candidates {
                Url::parse(&candidate.url).map_err(|e| {
                    AutoBloggerError::config(format!(
                        "link table: topic \"{topic}\" has invalid URL \"{}\": {e}",
                        candidate.url
                    ))
                })?;
            }
        }

        // Style templates must have somewhere to put the article body.
        for (name, template) in &self.styles {
            if !template.user_template.contains("{body}") {
                return Err(AutoBloggerError::config(format!(
                    "style_prompt.json: template \"{name}\" lacks a {{body}} placeholder"
                )));
            }
        }

        Ok(())
    }
}

/// Whether `domain` matches any entry in `list` exactly or as a subdomain.
fn domain_matches(list: &[String], domain: &str) -> bool {
    let lower = domain.to_lowercase();
    list.iter().any(|entry| {
        let entry = entry.to_lowercase();
        lower == entry || lower.ends_with(&format!(".{entry}"))
    })
}

// ---------------------------------------------------------------------------
// Table readers
// ---------------------------------------------------------------------------

/// Deserialize a whole table file into `T`.
fn read_table<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AutoBloggerError::config(format!("missing rule table {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        AutoBloggerError::config(format!("malformed rule table {}: {e}", path.display()))
    })
}

/// Read a `{key: "value"}` map preserving insertion order.
fn read_string_map(path: &Path) -> Result<Vec<(String, String)>> {
    let map: serde_json::Map<String, serde_json::Value> = read_table(path)?;
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        let s = value.as_str().ok_or_else(|| {
            AutoBloggerError::config(format!(
                "{}: value for \"{key}\" must be a string",
                path.display()
            ))
        })?;
        out.push((key, s.to_string()));
    }
    Ok(out)
}

/// Read a `{key: ["word", ...]}` map preserving insertion order.
fn read_keyword_map(path: &Path) -> Result<Vec<(String, Vec<String>)>> {
    let map: serde_json::Map<String, serde_json::Value> = read_table(path)?;
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        let words: Vec<String> = serde_json::from_value(value).map_err(|e| {
            AutoBloggerError::config(format!(
                "{}: value for \"{key}\" must be a list of strings: {e}",
                path.display()
            ))
        })?;
        out.push((key, words));
    }
    Ok(out)
}

/// Read a `{topic: [{anchor, url}, ...]}` map preserving insertion order.
fn read_link_map(path: &Path) -> Result<Vec<(String, Vec<LinkCandidate>)>> {
    let map: serde_json::Map<String, serde_json::Value> = read_table(path)?;
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        let candidates: Vec<LinkCandidate> = serde_json::from_value(value).map_err(|e| {
            AutoBloggerError::config(format!(
                "{}: candidates for \"{key}\" are malformed: {e}",
                path.display()
            ))
        })?;
        out.push((key, candidates));
    }
    Ok(out)
}

/// Read a plain JSON string list.
fn read_string_list(path: &Path) -> Result<Vec<String>> {
    read_table(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
