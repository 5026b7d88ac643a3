//! On-disk shapes of the rule tables and the starter seed set.
//!
//! Each table is one JSON document in the rules directory. Mapping tables are
//! order-sensitive: insertion order decides first-match-wins lookups, so they
//! deserialize through `serde_json::Map` (preserve_order) rather than a
//! `HashMap`.

use serde::{Deserialize, Serialize};

/// File names of the required tables, in load order.
pub const TABLE_FILES: [&str; 9] = [
    "category_keywords.json",
    "tag_synonyms.json",
    "stop_words.json",
    "internal_links.json",
    "external_links.json",
    "do_follow_urls.json",
    "style_prompt.json",
    "banned_phrases.json",
    "custom_seo_keywords.json",
];

/// One candidate link for a topic (`internal_links.json` / `external_links.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCandidate {
    /// Anchor text that must occur in a paragraph for the link to be inserted.
    pub anchor: String,
    /// Link target URL.
    pub url: String,
}

/// `do_follow_urls.json`: domain allow/deny lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoFollowTable {
    /// Domains whose links pass ranking credit (do-follow).
    #[serde(default)]
    pub allow: Vec<String>,
    /// Domains that must never be linked at all.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// One named style template from `style_prompt.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleTemplate {
    /// System prompt establishing voice and format.
    pub system: String,
    /// User prompt template; `{title}` and `{body}` are substituted.
    pub user_template: String,
    /// Minimum word count the rewritten body must reach.
    #[serde(default = "default_min_words")]
    pub min_words: u32,
}

fn default_min_words() -> u32 {
    250
}

/// Starter tables written by `RuleSet::init`, one `(file_name, document)` per
/// table. Small but internally consistent, so a freshly initialized rules
/// directory loads without errors.
pub fn default_tables() -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "category_keywords.json",
            serde_json::json!({
                "technology": ["software", "hardware", "gadget", "app"],
                "lifestyle": ["travel", "food", "wellness", "home"],
            }),
        ),
        (
            "tag_synonyms.json",
            serde_json::json!({
                "applications": "app",
                "programs": "software",
                "journey": "travel",
            }),
        ),
        (
            "stop_words.json",
            serde_json::json!([
                "a", "an", "and", "are", "as", "at", "be", "but", "by", "for",
                "from", "has", "have", "in", "is", "it", "its", "of", "on",
                "or", "that", "the", "this", "to", "was", "were", "will", "with",
            ]),
        ),
        (
            "internal_links.json",
            serde_json::json!({
                "software": [
                    {"anchor": "software", "url": "https://blog.example.com/topics/software"}
                ],
            }),
        ),
        (
            "external_links.json",
            serde_json::json!({
                "travel": [
                    {"anchor": "travel", "url": "https://en.wikipedia.org/wiki/Travel"}
                ],
            }),
        ),
        (
            "do_follow_urls.json",
            serde_json::json!({
                "allow": ["blog.example.com", "en.wikipedia.org"],
                "deny": [],
            }),
        ),
        (
            "style_prompt.json",
            serde_json::json!({
                "default": {
                    "system": "You are an experienced blog editor. Rewrite the article in an engaging, original voice. Start your answer with the new title as a markdown H1 (`# Title`), then the body. Use `##` for section headings and keep paragraphs separated by blank lines.",
                    "user_template": "Rewrite the following article.\n\nOriginal title: {title}\n\n{body}",
                    "min_words": 250,
                },
            }),
        ),
        ("banned_phrases.json", serde_json::json!(["click here", "as an ai"])),
        ("custom_seo_keywords.json", serde_json::json!([])),
    ]
}
