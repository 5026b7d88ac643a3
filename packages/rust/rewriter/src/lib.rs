//! AI Rewriter: draft + style template → rewritten draft.
//!
//! Sends the draft body and a Rule-Store style template to an
//! OpenAI-compatible chat-completions endpoint and parses the completion
//! back into a block-structured draft. Service faults (timeouts, rate
//! limits, malformed completions) are model errors and retryable; hard
//! content-constraint violations (empty body, below minimum length, banned
//! phrase) are content-policy errors and are not retried without a template
//! change.
//!
//! The rewriter holds no state between calls: retrying an identical
//! (draft, template) input resends the same request and either returns a
//! complete draft or fails — output is never partially applied.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use autoblogger_rules::{RuleSet, StyleTemplate};
use autoblogger_shared::{AutoBloggerError, Block, BlockKind, Draft, ModelConfig, Result};

// ---------------------------------------------------------------------------
// Wire types (OpenAI-compatible chat completions)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

// ---------------------------------------------------------------------------
// Rewriter
// ---------------------------------------------------------------------------

/// Client for the generative-language service.
pub struct Rewriter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model_id: String,
    max_tokens: u32,
}

impl Rewriter {
    /// Create a rewriter. The API key is resolved by the caller (from the
    /// env var named in config) so tests can inject one directly.
    pub fn new(api_key: impl Into<String>, config: &ModelConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AutoBloggerError::model(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model_id: config.model_id.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Override the endpoint base URL (for tests against a mock server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Rewrite a draft with the given style template.
    #[instrument(skip_all, fields(title = %draft.title, model = %self.model_id))]
    pub async fn rewrite(
        &self,
        draft: &Draft,
        template: &StyleTemplate,
        rules: &RuleSet,
    ) -> Result<Draft> {
        let user_prompt = template
            .user_template
            .replace("{title}", &draft.title)
            .replace("{body}", &draft.body_markdown());

        let request = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![
                Message {
                    role: "system".into(),
                    content: template.system.clone(),
                },
                Message {
                    role: "user".into(),
                    content: user_prompt,
                },
            ],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AutoBloggerError::model("model call timed out")
                } else {
                    AutoBloggerError::model(format!("model request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AutoBloggerError::model(format!(
                "model service returned HTTP {status}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AutoBloggerError::model(format!("malformed model response: {e}")))?;

        let completion = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");

        if completion.trim().is_empty() {
            return Err(AutoBloggerError::model("model returned an empty completion"));
        }

        debug!(completion_len = completion.len(), "completion received");

        let (title, blocks) = parse_completion(completion);
        let rewritten = Draft {
            title: title.unwrap_or_else(|| draft.title.clone()),
            blocks,
            source_url: draft.source_url.clone(),
            attribution: draft.attribution.clone(),
            keywords: draft.keywords.clone(),
        };

        enforce_constraints(&rewritten, template, rules)?;
        Ok(rewritten)
    }
}

// ---------------------------------------------------------------------------
// Completion parsing
// ---------------------------------------------------------------------------

/// Parse a markdown completion into a title candidate and typed blocks.
///
/// The first `# ` heading (or a `Title:` line) becomes the title; `##`
/// headings, list chunks, and quote chunks map to their block kinds, and
/// everything else is a paragraph.
fn parse_completion(text: &str) -> (Option<String>, Vec<Block>) {
    let mut title = None;
    let mut blocks = Vec::new();

    for chunk in text.split("\n\n") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }

        if title.is_none()
            && blocks.is_empty()
            && let Some(t) = title_line(chunk)
        {
            title = Some(t);
            continue;
        }

        if let Some(heading) = chunk.strip_prefix("## ").or_else(|| chunk.strip_prefix("### ")) {
            blocks.push(Block {
                kind: BlockKind::Heading,
                text: heading.trim().to_string(),
            });
        } else if chunk.starts_with("- ")
            || chunk.starts_with("* ")
            || chunk.starts_with("1. ")
        {
            blocks.push(Block {
                kind: BlockKind::List,
                text: chunk.to_string(),
            });
        } else if chunk.starts_with("> ") {
            let text = chunk
                .lines()
                .map(|l| l.trim_start_matches("> ").trim_start_matches('>'))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(Block {
                kind: BlockKind::Quote,
                text: text.trim().to_string(),
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

/// A chunk that is purely a title line: `# Title` or `Title: ...`.
fn title_line(chunk: &str) -> Option<String> {
    if chunk.lines().count() != 1 {
        return None;
    }
    if let Some(t) = chunk.strip_prefix("# ") {
        return Some(t.trim().to_string());
    }
    chunk
        .strip_prefix("Title:")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Hard content constraints: complete body, minimum length, no banned phrases.
fn enforce_constraints(draft: &Draft, template: &StyleTemplate, rules: &RuleSet) -> Result<()> {
    if draft.blocks.is_empty() {
        return Err(AutoBloggerError::content_policy(
            "rewritten body is empty",
        ));
    }

    let words = draft.word_count();
    if words < template.min_words as usize {
        return Err(AutoBloggerError::content_policy(format!(
            "rewritten body has {words} words, template requires {}",
            template.min_words
        )));
    }

    let full_text = format!("{}\n{}", draft.title, draft.body_markdown());
    if let Some(phrase) = rules.banned_phrase_in(&full_text) {
        return Err(AutoBloggerError::content_policy(format!(
            "rewritten body contains banned phrase \"{phrase}\""
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_rules() -> RuleSet {
        let dir = std::env::temp_dir().join(format!("ab-rw-test-{}", uuid::Uuid::now_v7()));
        RuleSet::init(&dir).unwrap();
        let rules = RuleSet::load(&dir).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        rules
    }

    fn test_template(min_words: u32) -> StyleTemplate {
        StyleTemplate {
            system: "You are an editor.".into(),
            user_template: "Rewrite: {title}\n\n{body}".into(),
            min_words,
        }
    }

    fn source_draft() -> Draft {
        Draft {
            title: "Original Title".into(),
            blocks: vec![Block::paragraph("Original paragraph.")],
            source_url: Some("https://news.example.com/a".into()),
            attribution: Some("news.example.com".into()),
            keywords: vec!["gardening".into()],
        }
    }

    fn rewriter_for(server: &MockServer) -> Rewriter {
        Rewriter::new("test-key", &ModelConfig::default(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(format!("{}/v1", server.uri()))
    }

    fn completion_response(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    fn long_body(words: usize) -> String {
        std::iter::repeat_n("word", words).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn parse_completion_title_and_blocks() {
        let text = "# New Title\n\nFirst paragraph here.\n\n## Section\n\n- a\n- b\n\n> quoted";
        let (title, blocks) = parse_completion(text);

        assert_eq!(title.as_deref(), Some("New Title"));
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].kind, BlockKind::Paragraph);
        assert_eq!(blocks[1].kind, BlockKind::Heading);
        assert_eq!(blocks[1].text, "Section");
        assert_eq!(blocks[2].kind, BlockKind::List);
        assert_eq!(blocks[3].kind, BlockKind::Quote);
        assert_eq!(blocks[3].text, "quoted");
    }

    #[test]
    fn parse_completion_title_prefix_form() {
        let (title, blocks) = parse_completion("Title: Another Name\n\nBody text.");
        assert_eq!(title.as_deref(), Some("Another Name"));
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn parse_completion_without_title() {
        let (title, blocks) = parse_completion("Just a paragraph.\n\nAnd another.");
        assert!(title.is_none());
        assert_eq!(blocks.len(), 2);
    }

    #[tokio::test]
    async fn rewrite_success() {
        let server = MockServer::start().await;
        let content = format!("# Fresh Title\n\n{}", long_body(60));
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(completion_response(&content))
            .expect(1)
            .mount(&server)
            .await;

        let rewriter = rewriter_for(&server);
        let rules = test_rules();
        let result = rewriter
            .rewrite(&source_draft(), &test_template(50), &rules)
            .await
            .expect("rewrite");

        assert_eq!(result.title, "Fresh Title");
        assert!(!result.blocks.is_empty());
        // Provenance fields carry through the rewrite
        assert_eq!(result.source_url, source_draft().source_url);
        assert_eq!(result.keywords, vec!["gardening"]);
    }

    #[tokio::test]
    async fn empty_completion_is_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion_response("   "))
            .mount(&server)
            .await;

        let rewriter = rewriter_for(&server);
        let rules = test_rules();
        let err = rewriter
            .rewrite(&source_draft(), &test_template(10), &rules)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("empty completion"));
    }

    #[tokio::test]
    async fn rate_limit_is_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let rewriter = rewriter_for(&server);
        let rules = test_rules();
        let err = rewriter
            .rewrite(&source_draft(), &test_template(10), &rules)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn malformed_response_is_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let rewriter = rewriter_for(&server);
        let rules = test_rules();
        let err = rewriter
            .rewrite(&source_draft(), &test_template(10), &rules)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn short_body_is_content_policy_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion_response("# T\n\ntoo short"))
            .mount(&server)
            .await;

        let rewriter = rewriter_for(&server);
        let rules = test_rules();
        let err = rewriter
            .rewrite(&source_draft(), &test_template(100), &rules)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("words"));
    }

    #[tokio::test]
    async fn banned_phrase_is_content_policy_error() {
        let server = MockServer::start().await;
        let content = format!("# T\n\n{} click here {}", long_body(30), long_body(30));
        Mock::given(method("POST"))
            .respond_with(completion_response(&content))
            .mount(&server)
            .await;

        let rewriter = rewriter_for(&server);
        let rules = test_rules();
        let err = rewriter
            .rewrite(&source_draft(), &test_template(10), &rules)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("banned phrase"));
    }
}
