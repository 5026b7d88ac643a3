//! SEO Enricher: rewritten draft + RuleSet → enriched draft + metadata.
//!
//! Applies the Rule Store tables deterministically: keyword scoring with
//! position weights, synonym folding to canonical tags, category assignment,
//! link insertion bounded per paragraph block, and meta-description
//! synthesis. Identical (draft, rules, params) input always yields identical
//! output.

mod keywords;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};
use url::Url;

use autoblogger_rules::RuleSet;
use autoblogger_shared::{
    AutoBloggerError, BlockKind, Draft, Result, SeoConfig, SeoLink, SeoMetadata,
};

pub use keywords::score_keywords;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Tunable enrichment policy, sourced from the `[seo]` config section.
#[derive(Debug, Clone)]
pub struct EnrichParams {
    /// How many canonical tags to keep.
    pub top_tags: usize,
    /// Score multiplier for title terms.
    pub title_weight: f64,
    /// Score multiplier for lead-paragraph terms.
    pub lead_weight: f64,
    /// Bonus for configured custom keywords found in the body.
    pub custom_keyword_bonus: f64,
    /// Maximum inserted links per paragraph block.
    pub max_links_per_block: usize,
    /// Character budget for the meta description.
    pub meta_description_chars: usize,
    /// Category used when no tag matches the category table.
    pub fallback_category: String,
}

impl From<&SeoConfig> for EnrichParams {
    fn from(config: &SeoConfig) -> Self {
        Self {
            top_tags: config.top_tags as usize,
            title_weight: config.title_weight,
            lead_weight: config.lead_weight,
            custom_keyword_bonus: config.custom_keyword_bonus,
            max_links_per_block: config.max_links_per_block as usize,
            meta_description_chars: config.meta_description_chars as usize,
            fallback_category: config.fallback_category.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// Enrich a draft with SEO metadata.
///
/// Fails with an enrichment error only when the draft has no extractable
/// keyword candidates at all (degenerate input).
#[instrument(skip_all, fields(title = %draft.title))]
pub fn enrich(
    draft: &Draft,
    rules: &RuleSet,
    params: &EnrichParams,
) -> Result<(Draft, SeoMetadata)> {
    let ranked = score_keywords(draft, rules, params);
    if ranked.is_empty() {
        return Err(AutoBloggerError::enrichment(
            "draft has no keyword candidates after stop-word stripping",
        ));
    }

    let tags: Vec<String> = ranked
        .iter()
        .take(params.top_tags)
        .map(|(tag, _)| tag.clone())
        .collect();

    // Category: first tag in score order present in the category table.
    let category = tags
        .iter()
        .find_map(|tag| rules.category_for_tag(tag))
        .unwrap_or(&params.fallback_category)
        .to_string();

    let (blocks, links) = insert_links(draft, &tags, rules, params);

    let meta_description = draft
        .lead_paragraph()
        .map(|lead| truncate_at_word_boundary(&strip_markdown(lead), params.meta_description_chars))
        .unwrap_or_default();

    debug!(
        category = %category,
        tags = tags.len(),
        links = links.len(),
        "enrichment complete"
    );

    let enriched = Draft {
        title: draft.title.clone(),
        blocks,
        source_url: draft.source_url.clone(),
        attribution: draft.attribution.clone(),
        keywords: tags.clone(),
    };

    let metadata = SeoMetadata {
        category,
        tags,
        meta_description,
        links,
    };

    Ok((enriched, metadata))
}

// ---------------------------------------------------------------------------
// Link insertion
// ---------------------------------------------------------------------------

/// Insert at most one candidate link per top tag, bounded per paragraph
/// block. The anchor text must occur in the block; deny-listed domains are
/// skipped entirely; the follow flag comes from the do-follow allow list.
fn insert_links(
    draft: &Draft,
    tags: &[String],
    rules: &RuleSet,
    params: &EnrichParams,
) -> (Vec<autoblogger_shared::Block>, Vec<SeoLink>) {
    let mut blocks = draft.blocks.clone();
    let mut links_per_block = vec![0usize; blocks.len()];
    let mut inserted = Vec::new();

    for tag in tags {
        let candidates = rules.candidate_links_for(tag);

        'candidates: for candidate in candidates {
            let Some(domain) = Url::parse(&candidate.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
            else {
                continue;
            };
            if rules.is_denied(&domain) {
                debug!(url = %candidate.url, "skipping deny-listed link");
                continue;
            }

            for (i, block) in blocks.iter_mut().enumerate() {
                if block.kind != BlockKind::Paragraph
                    || links_per_block[i] >= params.max_links_per_block
                {
                    continue;
                }
                if let Some(linked) = link_anchor_in(&block.text, &candidate.anchor, &candidate.url)
                {
                    block.text = linked;
                    links_per_block[i] += 1;
                    inserted.push(SeoLink {
                        anchor: candidate.anchor.clone(),
                        url: candidate.url.clone(),
                        follow: rules.is_do_follow(&domain),
                        block_index: i,
                    });
                    // One inserted link per tag
                    break 'candidates;
                }
            }
        }
    }

    (blocks, inserted)
}

/// Replace the first whole-word occurrence of `anchor` in `text` with a
/// Markdown link, preserving the original casing. Returns `None` when the
/// anchor does not occur or is already linked.
fn link_anchor_in(text: &str, anchor: &str, url: &str) -> Option<String> {
    if anchor.is_empty() || text.contains(&format!("]({url})")) {
        return None;
    }

    let lower_text = text.to_lowercase();
    let lower_anchor = anchor.to_lowercase();

    let mut search_from = 0;
    while let Some(rel) = lower_text[search_from..].find(&lower_anchor) {
        let pos = search_from + rel;
        let end = pos + lower_anchor.len();

        // Lowercasing can shift byte offsets for non-ASCII text; only act on
        // positions that are valid boundaries in the original string.
        if !text.is_char_boundary(pos) || !text.is_char_boundary(end) {
            search_from = end;
            continue;
        }

        let boundary_before = pos == 0
            || !lower_text[..pos]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let boundary_after = end >= lower_text.len()
            || !lower_text[end..].chars().next().is_some_and(char::is_alphanumeric);
        // Don't nest inside an existing markdown link label
        let in_link_label = text[..pos]
            .rfind('[')
            .is_some_and(|open| !text[open..pos].contains(']'));
        // Don't splice into an existing markdown link target
        let in_link_target = text[..pos]
            .rfind("](")
            .is_some_and(|open| !text[open..pos].contains(')'));
        let already_linked = in_link_label || in_link_target;

        if boundary_before && boundary_after && !already_linked {
            let matched = &text[pos..end];
            return Some(format!(
                "{}[{}]({}){}",
                &text[..pos],
                matched,
                url,
                &text[end..]
            ));
        }
        search_from = end;
    }

    None
}

// ---------------------------------------------------------------------------
// Meta description
// ---------------------------------------------------------------------------

static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());

/// Strip Markdown link syntax and emphasis markers, keeping the visible text.
fn strip_markdown(text: &str) -> String {
    let no_links = MD_LINK_RE.replace_all(text, "$1");
    no_links.replace("**", "").replace('*', "").replace('`', "")
}

/// Truncate to `budget` characters at a word boundary.
fn truncate_at_word_boundary(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.trim().to_string();
    }

    let clipped: String = text.chars().take(budget).collect();
    match clipped.rfind(' ') {
        Some(pos) => clipped[..pos].trim_end().to_string(),
        None => clipped,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use autoblogger_shared::Block;

    /// Build a loadable RuleSet with the given table overrides.
    pub(crate) fn rules_with(overrides: &[(&str, serde_json::Value)]) -> RuleSet {
        let dir = std::env::temp_dir().join(format!("ab-seo-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, mut value) in autoblogger_rules::default_tables() {
            if let Some((_, replacement)) = overrides.iter().find(|(n, _)| *n == name) {
                value = replacement.clone();
            }
            std::fs::write(dir.join(name), serde_json::to_string_pretty(&value).unwrap())
                .unwrap();
        }
        let rules = RuleSet::load(&dir).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        rules
    }

    fn params() -> EnrichParams {
        EnrichParams::from(&SeoConfig::default())
    }

    fn gardening_rules() -> RuleSet {
        rules_with(&[
            (
                "category_keywords.json",
                serde_json::json!({"gardening": ["tips", "plant", "soil"]}),
            ),
            ("tag_synonyms.json", serde_json::json!({"plant": "gardening"})),
            (
                "internal_links.json",
                serde_json::json!({
                    "gardening": [
                        {"anchor": "gardening", "url": "https://blog.example.com/topics/gardening"}
                    ]
                }),
            ),
            (
                "do_follow_urls.json",
                serde_json::json!({"allow": ["blog.example.com"], "deny": []}),
            ),
        ])
    }

    fn gardening_draft() -> Draft {
        Draft {
            title: "10 Tips for Gardening".into(),
            blocks: vec![
                Block::paragraph(
                    "Every plant deserves care. A healthy plant starts with patience, \
                     and each plant rewards attentive gardening.",
                ),
                Block::paragraph(
                    "Another plant thrives in shade while one more plant prefers sun. \
                     Good soil drains well, and rich soil feeds roots.",
                ),
            ],
            source_url: None,
            attribution: None,
            keywords: vec![],
        }
    }

    #[test]
    fn gardening_scenario_category_and_top_tag() {
        // "plant" x5 folds into "gardening"; "soil" x2 stays itself.
        let (_, meta) = enrich(&gardening_draft(), &gardening_rules(), &params()).unwrap();
        assert_eq!(meta.category, "gardening");
        assert_eq!(meta.tags[0], "gardening");
        assert!(meta.tags.contains(&"soil".to_string()));
    }

    #[test]
    fn enrich_is_deterministic() {
        let draft = gardening_draft();
        let rules = gardening_rules();
        let (d1, m1) = enrich(&draft, &rules, &params()).unwrap();
        let (d2, m2) = enrich(&draft, &rules, &params()).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(m1, m2);
    }

    #[test]
    fn degenerate_draft_is_enrichment_error() {
        let draft = Draft {
            title: "The Of And".into(),
            blocks: vec![Block::paragraph("is the of and to")],
            source_url: None,
            attribution: None,
            keywords: vec![],
        };
        let err = enrich(&draft, &gardening_rules(), &params()).unwrap_err();
        assert!(err.to_string().contains("no keyword candidates"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn link_inserted_with_follow_flag() {
        let (enriched, meta) = enrich(&gardening_draft(), &gardening_rules(), &params()).unwrap();

        assert_eq!(meta.links.len(), 1);
        let link = &meta.links[0];
        assert_eq!(link.anchor, "gardening");
        assert!(link.follow);

        let block = &enriched.blocks[link.block_index];
        assert!(block.text.contains("](https://blog.example.com/topics/gardening)"));
    }

    #[test]
    fn deny_listed_domain_never_linked() {
        let rules = rules_with(&[
            (
                "category_keywords.json",
                serde_json::json!({"gardening": ["plant", "soil"]}),
            ),
            ("tag_synonyms.json", serde_json::json!({"plant": "gardening"})),
            (
                "internal_links.json",
                serde_json::json!({
                    "gardening": [
                        {"anchor": "gardening", "url": "https://spam.example.net/g"}
                    ]
                }),
            ),
            (
                "do_follow_urls.json",
                serde_json::json!({"allow": [], "deny": ["spam.example.net"]}),
            ),
        ]);

        let mut draft = gardening_draft();
        draft.blocks[0].text.push_str(" Learn gardening basics.");
        let (_, meta) = enrich(&draft, &rules, &params()).unwrap();
        assert!(meta.links.is_empty());
    }

    #[test]
    fn at_most_one_link_per_paragraph() {
        let rules = rules_with(&[
            (
                "tag_synonyms.json",
                serde_json::json!({}),
            ),
            (
                "internal_links.json",
                serde_json::json!({
                    "espresso": [{"anchor": "espresso", "url": "https://blog.example.com/espresso"}],
                    "grinder": [{"anchor": "grinder", "url": "https://blog.example.com/grinder"}]
                }),
            ),
            (
                "do_follow_urls.json",
                serde_json::json!({"allow": ["blog.example.com"], "deny": []}),
            ),
        ]);

        // Both anchors occur only in the single paragraph; cap is 1.
        let draft = Draft {
            title: "Espresso Grinder Guide".into(),
            blocks: vec![Block::paragraph(
                "A quality espresso depends on a quality grinder more than anything else.",
            )],
            source_url: None,
            attribution: None,
            keywords: vec![],
        };
        let (_, meta) = enrich(&draft, &rules, &params()).unwrap();
        assert_eq!(meta.links.len(), 1);
    }

    #[test]
    fn anchor_must_occur_as_whole_word() {
        assert!(link_anchor_in("soiled boots", "soil", "https://x.example/s").is_none());
        let linked = link_anchor_in("good soil here", "soil", "https://x.example/s").unwrap();
        assert_eq!(linked, "good [soil](https://x.example/s) here");
    }

    #[test]
    fn anchor_preserves_original_casing() {
        let linked = link_anchor_in("Gardening is fun", "gardening", "https://x.example/g").unwrap();
        assert!(linked.starts_with("[Gardening](https://x.example/g)"));
    }

    #[test]
    fn existing_link_not_nested() {
        let text = "see [soil](https://a.example/soil) for details";
        assert!(link_anchor_in(text, "soil", "https://a.example/soil").is_none());
    }

    #[test]
    fn meta_description_truncates_at_word_boundary() {
        let lead = "word ".repeat(60);
        let draft = Draft {
            title: "Espresso".into(),
            blocks: vec![
                Block::paragraph(lead.trim().to_string()),
                Block::paragraph("second espresso paragraph"),
            ],
            source_url: None,
            attribution: None,
            keywords: vec![],
        };
        let (_, meta) = enrich(&draft, &gardening_rules(), &params()).unwrap();
        assert!(meta.meta_description.chars().count() <= 155);
        assert!(!meta.meta_description.ends_with(' '));
        assert!(meta.meta_description.ends_with("word"));
    }

    #[test]
    fn meta_description_strips_markdown() {
        assert_eq!(
            strip_markdown("see [soil](https://x) and **bold** text"),
            "see soil and bold text"
        );
    }

    #[test]
    fn fallback_category_when_no_tag_matches() {
        let rules = rules_with(&[(
            "category_keywords.json",
            serde_json::json!({"finance": ["stocks", "bonds"]}),
        )]);
        let (_, meta) = enrich(&gardening_draft(), &rules, &params()).unwrap();
        assert_eq!(meta.category, "general");
    }

    #[test]
    fn custom_keywords_boost_ranking() {
        let rules = rules_with(&[
            ("custom_seo_keywords.json", serde_json::json!(["compost"])),
            ("tag_synonyms.json", serde_json::json!({})),
        ]);
        let draft = Draft {
            title: "Garden Notes".into(),
            blocks: vec![Block::paragraph(
                "A compost heap helps. Mulch helps too, mulch retains moisture.",
            )],
            source_url: None,
            attribution: None,
            keywords: vec![],
        };
        let ranked = score_keywords(&draft, &rules, &params());
        let compost = ranked.iter().find(|(t, _)| t == "compost").unwrap().1;
        let mulch = ranked.iter().find(|(t, _)| t == "mulch").unwrap().1;
        // compost: 2.0 (lead) + 2.0 (bonus) = 4.0; mulch: 2.0 + 2.0 = 4.0 — tie
        // broken alphabetically, but the bonus keeps compost from ranking below.
        assert!(compost >= mulch);
    }
}
