//! HTML → typed block-list conversion.
//!
//! Turns the clean article HTML produced by a site adapter into the ordered
//! [`Block`] list a `Draft` carries, converting each block's inner HTML to
//! Markdown via `htmd` so later stages work on text, not markup.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use autoblogger_shared::{Block, BlockKind};

static BLOCK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, p, ul, ol, blockquote").unwrap());

/// Tags that form blocks; elements nested under another block tag are
/// handled by their ancestor (a `<p>` inside a `<blockquote>` is quote text).
const BLOCK_TAGS: [&str; 8] = ["h1", "h2", "h3", "h4", "p", "ul", "ol", "blockquote"];

/// Parse clean article HTML into an ordered block list.
///
/// Empty blocks are dropped; heading text is stored without `#` markers
/// (the draft re-adds them when rendering Markdown).
pub fn blocks_from_html(content_html: &str) -> Vec<Block> {
    let doc = Html::parse_fragment(content_html);
    let mut blocks = Vec::new();

    for el in doc.select(&BLOCK_SELECTOR) {
        if has_block_ancestor(&el) {
            continue;
        }

        let tag = el.value().name();
        let block = match tag {
            "h1" | "h2" | "h3" | "h4" => {
                let text = el.text().collect::<String>().trim().to_string();
                Block {
                    kind: BlockKind::Heading,
                    text,
                }
            }
            "p" => Block {
                kind: BlockKind::Paragraph,
                text: to_markdown(&el.html()),
            },
            "ul" | "ol" => Block {
                kind: BlockKind::List,
                text: to_markdown(&el.html()),
            },
            "blockquote" => Block {
                kind: BlockKind::Quote,
                text: strip_quote_markers(&to_markdown(&el.html())),
            },
            _ => continue,
        };

        if !block.text.is_empty() {
            blocks.push(block);
        }
    }

    blocks
}

/// Parse raw supplied text into a title and block list.
///
/// The first non-empty line is the title; blank-line-separated chunks become
/// paragraphs, and `#`-prefixed lines become headings.
pub fn blocks_from_raw_text(text: &str) -> (String, Vec<Block>) {
    let mut lines = text.lines();
    let title = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim_start_matches('#')
        .trim()
        .to_string();

    let rest: String = lines.collect::<Vec<_>>().join("\n");
    let mut blocks = Vec::new();

    for chunk in rest.split("\n\n") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        if let Some(heading) = chunk.strip_prefix('#') {
            blocks.push(Block {
                kind: BlockKind::Heading,
                text: heading.trim_start_matches('#').trim().to_string(),
            });
        } else if chunk.starts_with("- ") || chunk.starts_with("* ") {
            blocks.push(Block {
                kind: BlockKind::List,
                text: chunk.to_string(),
            });
        } else {
            blocks.push(Block {
                kind: BlockKind::Paragraph,
                text: chunk.split_whitespace().collect::<Vec<_>>().join(" "),
            });
        }
    }

    (title, blocks)
}

/// Whether the element sits inside another block-forming element.
fn has_block_ancestor(el: &ElementRef) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| BLOCK_TAGS.contains(&e.name()))
    })
}

/// Convert an HTML snippet to trimmed Markdown text.
fn to_markdown(html: &str) -> String {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "iframe", "noscript", "svg", "img"])
        .build();

    converter
        .convert(html)
        .map(|md| md.trim().to_string())
        .unwrap_or_default()
}

/// Remove `> ` quote markers htmd adds for blockquote content.
fn strip_quote_markers(md: &str) -> String {
    md.lines()
        .map(|l| l.trim_start_matches("> ").trim_start_matches('>'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
