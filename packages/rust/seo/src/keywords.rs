//! Keyword tokenization and position-weighted scoring.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use autoblogger_rules::RuleSet;
use autoblogger_shared::{BlockKind, Draft};

use crate::EnrichParams;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9'-]+").unwrap());

/// Minimum token length considered a keyword candidate.
const MIN_TOKEN_LEN: usize = 3;

/// Score the draft's terms and fold them to canonical tags.
///
/// Terms are frequency-counted with position weights (title, lead paragraph,
/// body), folded through the synonym table, and merged per canonical tag.
/// The result is ordered by (score desc, tag asc) so identical input always
/// produces identical output.
pub fn score_keywords(
    draft: &Draft,
    rules: &RuleSet,
    params: &EnrichParams,
) -> Vec<(String, f64)> {
    let mut term_scores: HashMap<String, f64> = HashMap::new();

    let mut add_terms = |text: &str, weight: f64| {
        for m in WORD_RE.find_iter(text) {
            let term = m.as_str().to_lowercase();
            if term.len() < MIN_TOKEN_LEN || rules.is_stop_word(&term) {
                continue;
            }
            *term_scores.entry(term).or_insert(0.0) += weight;
        }
    };

    add_terms(&draft.title, params.title_weight);

    let mut lead_seen = false;
    for block in &draft.blocks {
        let weight = if block.kind == BlockKind::Paragraph && !lead_seen {
            lead_seen = true;
            params.lead_weight
        } else {
            1.0
        };
        add_terms(&block.text, weight);
    }

    // Keyword candidates carried on the draft (e.g. from meta tags) count once.
    for keyword in &draft.keywords {
        add_terms(keyword, 1.0);
    }

    // Configured custom SEO keywords get a bonus when the body mentions them.
    let body_lower = format!("{}\n{}", draft.title, draft.body_markdown()).to_lowercase();
    for custom in rules.custom_keywords() {
        if !rules.is_stop_word(custom) && body_lower.contains(custom.as_str()) {
            *term_scores.entry(custom.clone()).or_insert(0.0) += params.custom_keyword_bonus;
        }
    }

    // Fold to canonical tags and merge scores.
    let mut tag_scores: HashMap<String, f64> = HashMap::new();
    for (term, score) in term_scores {
        let tag = rules.canonical_tag(&term);
        *tag_scores.entry(tag).or_insert(0.0) += score;
    }

    let mut ranked: Vec<(String, f64)> = tag_scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}
