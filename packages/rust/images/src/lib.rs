//! Image Sourcer: enrichment keywords → licensed, attributed image asset.
//!
//! Queries an Openverse-style licensed-image API with the top enrichment
//! keywords in order until a compliant candidate is found. An image is only
//! accepted when its license is on the configured allow list *and* it
//! carries attribution metadata — an unlicensed image is never attached
//! silently. Network failures are transient and retry-eligible; exhausted
//! keywords are permanent.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use autoblogger_shared::{AutoBloggerError, ImageAsset, ImagesConfig, Result};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("autoblogger/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ImageCandidate>,
}

/// One candidate from the provider's search results.
#[derive(Debug, Clone, Deserialize)]
struct ImageCandidate {
    /// Direct URL of the image file.
    url: String,
    /// License identifier (e.g. `cc0`, `by`, `by-nc`).
    #[serde(default)]
    license: String,
    /// Creator name required for attribution.
    #[serde(default)]
    creator: Option<String>,
    /// Source collection/provider name.
    #[serde(default)]
    provider: Option<String>,
}

// ---------------------------------------------------------------------------
// ImageSourcer
// ---------------------------------------------------------------------------

/// Client for the stock-image provider.
pub struct ImageSourcer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    licenses: Vec<String>,
    page_size: u32,
}

impl ImageSourcer {
    /// Create a sourcer. `api_key` is resolved by the caller from the env
    /// var named in config; `None` queries anonymously.
    pub fn new(
        api_key: Option<String>,
        config: &ImagesConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AutoBloggerError::fetch_permanent(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            licenses: config.licenses.iter().map(|l| l.to_lowercase()).collect(),
            page_size: config.page_size,
        })
    }

    /// Override the provider base URL (for tests against a mock server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Find and download a license-compliant image for the given keywords.
    ///
    /// Keywords are tried in order. After exhausting all of them the error is
    /// a license error if any candidate was seen but none was compliant,
    /// otherwise image-not-found.
    #[instrument(skip_all, fields(keywords = keywords.len()))]
    pub async fn source(&self, keywords: &[String]) -> Result<ImageAsset> {
        if keywords.is_empty() {
            return Err(AutoBloggerError::image_not_found(
                "no keywords to search with",
            ));
        }

        let mut saw_candidate = false;

        for keyword in keywords {
            let candidates = self.search(keyword).await?;
            if candidates.is_empty() {
                debug!(%keyword, "no results");
                continue;
            }
            saw_candidate = true;

            for candidate in &candidates {
                if !self.is_compliant(candidate) {
                    continue;
                }
                match self.download(candidate).await {
                    Ok(asset) => {
                        debug!(%keyword, url = %candidate.url, "image selected");
                        return Ok(asset);
                    }
                    Err(e) => {
                        warn!(url = %candidate.url, error = %e, "image download failed, trying next");
                    }
                }
            }
        }

        if saw_candidate {
            Err(AutoBloggerError::license(format!(
                "candidates found for {keywords:?} but none met license/attribution requirements"
            )))
        } else {
            Err(AutoBloggerError::image_not_found(format!(
                "no image results for any of {keywords:?}"
            )))
        }
    }

    /// Query the provider for one keyword.
    async fn search(&self, keyword: &str) -> Result<Vec<ImageCandidate>> {
        let page_size = self.page_size.to_string();
        let mut request = self
            .client
            .get(format!("{}/v1/images", self.base_url))
            .query(&[("q", keyword), ("page_size", page_size.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            AutoBloggerError::fetch_transient(format!("image search for \"{keyword}\": {e}"))
        })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AutoBloggerError::fetch_transient(format!(
                "image search for \"{keyword}\": HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(AutoBloggerError::fetch_permanent(format!(
                "image search for \"{keyword}\": HTTP {status}"
            )));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            AutoBloggerError::fetch_transient(format!("malformed search response: {e}"))
        })?;
        Ok(parsed.results)
    }

    /// License on the allow list and attribution metadata present.
    fn is_compliant(&self, candidate: &ImageCandidate) -> bool {
        self.licenses.contains(&candidate.license.to_lowercase())
            && candidate
                .creator
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }

    /// Download the image bytes and assemble the asset with its attribution.
    async fn download(&self, candidate: &ImageCandidate) -> Result<ImageAsset> {
        let response = self
            .client
            .get(&candidate.url)
            .send()
            .await
            .map_err(|e| AutoBloggerError::fetch_transient(format!("image download: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AutoBloggerError::fetch_transient(format!(
                "image download: HTTP {status}"
            )));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AutoBloggerError::fetch_transient(format!("image body read: {e}")))?;

        let creator = candidate.creator.as_deref().unwrap_or("unknown");
        let provider = candidate.provider.as_deref().unwrap_or("stock provider");
        let attribution = format!(
            "Photo by {creator} via {provider} ({})",
            candidate.license.to_lowercase()
        );

        Ok(ImageAsset {
            bytes: bytes.to_vec(),
            mime,
            attribution,
            source_url: candidate.url.clone(),
            license: candidate.license.to_lowercase(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sourcer_for(server: &MockServer) -> ImageSourcer {
        ImageSourcer::new(None, &ImagesConfig::default(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn search_body(results: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": results }))
    }

    #[tokio::test]
    async fn selects_first_compliant_candidate() {
        let server = MockServer::start().await;
        let image_url = format!("{}/files/garden.jpg", server.uri());

        Mock::given(method("GET"))
            .and(path("/v1/images"))
            .and(query_param("q", "gardening"))
            .respond_with(search_body(serde_json::json!([
                {"url": format!("{}/files/bad.jpg", server.uri()), "license": "by-nc", "creator": "A"},
                {"url": image_url, "license": "by", "creator": "Casey Gardener", "provider": "openverse"},
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/files/garden.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xFF, 0xD8, 0xFF]),
            )
            .mount(&server)
            .await;

        let asset = sourcer_for(&server)
            .source(&["gardening".into()])
            .await
            .expect("source image");

        assert_eq!(asset.bytes, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(asset.mime, "image/jpeg");
        assert_eq!(asset.license, "by");
        assert_eq!(
            asset.attribution,
            "Photo by Casey Gardener via openverse (by)"
        );
    }

    #[tokio::test]
    async fn falls_through_keywords_in_order() {
        let server = MockServer::start().await;
        let image_url = format!("{}/files/soil.jpg", server.uri());

        Mock::given(method("GET"))
            .and(path("/v1/images"))
            .and(query_param("q", "gardening"))
            .respond_with(search_body(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/images"))
            .and(query_param("q", "soil"))
            .respond_with(search_body(serde_json::json!([
                {"url": image_url, "license": "cc0", "creator": "B", "provider": "openverse"},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/soil.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .mount(&server)
            .await;

        let asset = sourcer_for(&server)
            .source(&["gardening".into(), "soil".into()])
            .await
            .expect("source image");
        assert_eq!(asset.license, "cc0");
    }

    #[tokio::test]
    async fn exhausted_keywords_is_image_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/images"))
            .respond_with(search_body(serde_json::json!([])))
            .mount(&server)
            .await;

        let err = sourcer_for(&server)
            .source(&["nothing".into(), "nada".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, AutoBloggerError::ImageNotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn only_noncompliant_matches_is_license_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/images"))
            .respond_with(search_body(serde_json::json!([
                {"url": "https://img.example/a.jpg", "license": "by-nc-nd", "creator": "A"},
                {"url": "https://img.example/b.jpg", "license": "by", "creator": ""},
            ])))
            .mount(&server)
            .await;

        let err = sourcer_for(&server)
            .source(&["gardening".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, AutoBloggerError::License { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn provider_5xx_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/images"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = sourcer_for(&server)
            .source(&["gardening".into()])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_keywords_is_image_not_found() {
        let server = MockServer::start().await;
        let err = sourcer_for(&server).source(&[]).await.unwrap_err();
        assert!(matches!(err, AutoBloggerError::ImageNotFound { .. }));
    }
}
