//! Publisher: assembled post payload → CMS remote API, idempotently.
//!
//! Maintains an authenticated session (token fetched with externally
//! supplied credentials, refreshed once on expiry without operator
//! intervention), uploads the featured image, and submits the post payload
//! with an embedded idempotency token derived from the job id.
//!
//! Idempotency invariant: a locally persisted receipt for the job id
//! short-circuits before any HTTP call, and a 409 conflict from the CMS is
//! treated as success — the existing post is fetched by token and its
//! receipt returned. A retried publish for the same job id therefore never
//! creates a duplicate remote post.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use autoblogger_shared::{
    AutoBloggerError, CmsConfig, Draft, ImageAsset, JobId, PublishReceipt, Result, SeoMetadata,
};
use autoblogger_storage::Storage;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct PostPayload<'a> {
    title: &'a str,
    content: String,
    category: &'a str,
    tags: &'a [String],
    meta_description: &'a str,
    featured_media: u64,
    links: Vec<PostLink<'a>>,
    status: &'a str,
    idempotency_token: &'a str,
}

#[derive(Debug, Serialize)]
struct PostLink<'a> {
    anchor: &'a str,
    url: &'a str,
    follow: bool,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    id: u64,
    url: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Client for the CMS remote API.
pub struct Publisher {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    publish_status: String,
    /// Cached bearer token; refreshed once on a 401.
    token: Mutex<Option<String>>,
}

impl Publisher {
    /// Create a publisher. The password is resolved by the caller from the
    /// env var named in config so tests can inject one directly.
    pub fn new(password: impl Into<String>, config: &CmsConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AutoBloggerError::submit_permanent(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: password.into(),
            publish_status: config.publish_status.clone(),
            token: Mutex::new(None),
        })
    }

    /// Override the CMS base URL (for tests against a mock server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// The idempotency token embedded in a job's publish payload.
    pub fn idempotency_token(job_id: &JobId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(job_id.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Publish a post for the given job.
    #[instrument(skip_all, fields(job_id = %job_id, title = %draft.title))]
    pub async fn publish(
        &self,
        job_id: &JobId,
        draft: &Draft,
        seo: &SeoMetadata,
        image: &ImageAsset,
        storage: &Storage,
    ) -> Result<PublishReceipt> {
        // Locally persisted receipt wins before any HTTP happens.
        if let Some(receipt) = storage.get_receipt(job_id).await? {
            info!(post_id = receipt.post_id, "receipt already persisted, skipping submit");
            return Ok(receipt);
        }

        let token = Self::idempotency_token(job_id);

        let media_id = self.upload_media(image).await?;
        debug!(media_id, "featured image uploaded");

        let links: Vec<PostLink> = seo
            .links
            .iter()
            .map(|l| PostLink {
                anchor: &l.anchor,
                url: &l.url,
                follow: l.follow,
            })
            .collect();

        let payload = PostPayload {
            title: &draft.title,
            content: draft.body_markdown(),
            category: &seo.category,
            tags: &seo.tags,
            meta_description: &seo.meta_description,
            featured_media: media_id,
            links,
            status: &self.publish_status,
            idempotency_token: &token,
        };

        let response = self
            .send_authed(|bearer| {
                self.client
                    .post(format!("{}/api/posts", self.base_url))
                    .bearer_auth(bearer)
                    .json(&payload)
            })
            .await?;

        let status = response.status();
        let receipt = if status == reqwest::StatusCode::CONFLICT {
            // The CMS already has a post for this idempotency token; treat
            // as success and fetch the existing receipt.
            warn!("CMS reported conflict for idempotency token, fetching existing post");
            self.fetch_existing(&token).await?
        } else if status.is_success() {
            let post: PostResponse = response.json().await.map_err(|e| {
                AutoBloggerError::submit_transient(format!("malformed post response: {e}"))
            })?;
            receipt_from(post)
        } else {
            return Err(classify_submit_status(status));
        };

        storage.insert_receipt(job_id, &receipt, &token).await?;
        info!(post_id = receipt.post_id, url = %receipt.url, "post published");
        Ok(receipt)
    }

    /// Upload the featured image, returning the remote media id.
    async fn upload_media(&self, image: &ImageAsset) -> Result<u64> {
        let response = self
            .send_authed(|bearer| {
                self.client
                    .post(format!("{}/api/media", self.base_url))
                    .bearer_auth(bearer)
                    .header(reqwest::header::CONTENT_TYPE, &image.mime)
                    .header("x-attribution", &image.attribution)
                    .body(image.bytes.clone())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_submit_status(status));
        }

        let media: MediaResponse = response.json().await.map_err(|e| {
            AutoBloggerError::submit_transient(format!("malformed media response: {e}"))
        })?;
        Ok(media.id)
    }

    /// Fetch the post the CMS already holds for an idempotency token.
    async fn fetch_existing(&self, token: &str) -> Result<PublishReceipt> {
        let response = self
            .send_authed(|bearer| {
                self.client
                    .get(format!("{}/api/posts", self.base_url))
                    .bearer_auth(bearer)
                    .query(&[("idempotency_token", token)])
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_submit_status(status));
        }

        let post: PostResponse = response.json().await.map_err(|e| {
            AutoBloggerError::submit_transient(format!("malformed post lookup response: {e}"))
        })?;
        Ok(receipt_from(post))
    }

    // -----------------------------------------------------------------------
    // Session management
    // -----------------------------------------------------------------------

    /// Send a request with a bearer token, refreshing the session once on 401.
    async fn send_authed<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let bearer = self.session_token(false).await?;
        let response = build(&bearer).send().await.map_err(classify_send_error)?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("session expired, refreshing token");
        let bearer = self.session_token(true).await?;
        let response = build(&bearer).send().await.map_err(classify_send_error)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AutoBloggerError::auth(
                "CMS rejected credentials after token refresh",
            ));
        }
        Ok(response)
    }

    /// Get the cached session token, fetching (or force-refreshing) it.
    async fn session_token(&self, force_refresh: bool) -> Result<String> {
        let mut guard = self.token.lock().await;
        if !force_refresh
            && let Some(token) = guard.as_ref()
        {
            return Ok(token.clone());
        }

        let response = self
            .client
            .post(format!("{}/api/token", self.base_url))
            .json(&TokenRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AutoBloggerError::auth(format!(
                "CMS rejected credentials: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(classify_submit_status(status));
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| {
            AutoBloggerError::submit_transient(format!("malformed token response: {e}"))
        })?;

        *guard = Some(parsed.token.clone());
        Ok(parsed.token)
    }
}

fn receipt_from(post: PostResponse) -> PublishReceipt {
    PublishReceipt {
        post_id: post.id,
        url: post.url,
        published_at: post.published_at.unwrap_or_else(Utc::now),
    }
}

/// Network-level failures are transient.
fn classify_send_error(e: reqwest::Error) -> AutoBloggerError {
    if e.is_timeout() {
        AutoBloggerError::submit_transient("CMS request timed out")
    } else {
        AutoBloggerError::submit_transient(format!("CMS request failed: {e}"))
    }
}

/// 5xx and 429 are transient; remaining 4xx are validation rejections.
fn classify_submit_status(status: reqwest::StatusCode) -> AutoBloggerError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AutoBloggerError::submit_transient(format!("CMS returned HTTP {status}"))
    } else {
        AutoBloggerError::submit_permanent(format!(
            "CMS rejected the submission: HTTP {status}"
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use autoblogger_shared::{ArticleJob, Block, SourceReference};
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_storage() -> (Storage, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("ab-pub-test-{}", uuid::Uuid::now_v7()));
        let storage = Storage::open(&dir.join("jobs.db")).await.unwrap();
        (storage, dir)
    }

    /// Seed the parent job row so the receipt foreign key resolves, mirroring
    /// the orchestrator, which always persists the job before publishing.
    async fn seed_job(storage: &Storage, job_id: &JobId) {
        let mut job = ArticleJob::new(SourceReference::Url {
            url: "https://news.example.com/a".into(),
        });
        job.id = job_id.clone();
        storage.upsert_job(&job).await.unwrap();
    }

    fn publisher_for(server: &MockServer) -> Publisher {
        let config = CmsConfig {
            base_url: "https://unused.example".into(),
            username: "editor".into(),
            password_env: "UNUSED".into(),
            publish_status: "publish".into(),
        };
        Publisher::new("s3cret", &config, Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn sample_inputs() -> (Draft, SeoMetadata, ImageAsset) {
        let draft = Draft {
            title: "Ten Gardening Tips".into(),
            blocks: vec![Block::paragraph("A paragraph about gardening.")],
            source_url: None,
            attribution: None,
            keywords: vec!["gardening".into()],
        };
        let seo = SeoMetadata {
            category: "gardening".into(),
            tags: vec!["gardening".into()],
            meta_description: "Tips for the garden".into(),
            links: vec![],
        };
        let image = ImageAsset {
            bytes: vec![1, 2, 3],
            mime: "image/jpeg".into(),
            attribution: "Photo by A via openverse (by)".into(),
            source_url: "https://img.example/a.jpg".into(),
            license: "by".into(),
        };
        (draft, seo, image)
    }

    async fn mount_token(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": token})),
            )
            .mount(server)
            .await;
    }

    async fn mount_media(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/media"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 7})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn publish_success_persists_receipt() {
        let server = MockServer::start().await;
        let (storage, dir) = test_storage().await;
        let job_id = JobId::new();
        seed_job(&storage, &job_id).await;
        let token = Publisher::idempotency_token(&job_id);

        mount_token(&server, "tok-1").await;
        mount_media(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/posts"))
            .and(body_string_contains(token.as_str()))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 42, "url": "https://blog.example.com/?p=42"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = publisher_for(&server);
        let (draft, seo, image) = sample_inputs();
        let receipt = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .expect("publish");

        assert_eq!(receipt.post_id, 42);
        let persisted = storage.get_receipt(&job_id).await.unwrap().unwrap();
        assert_eq!(persisted.post_id, 42);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn republish_short_circuits_on_local_receipt() {
        let server = MockServer::start().await;
        let (storage, dir) = test_storage().await;
        let job_id = JobId::new();
        seed_job(&storage, &job_id).await;

        mount_token(&server, "tok-1").await;
        mount_media(&server).await;
        // The post-creation endpoint must be hit exactly once across both calls
        Mock::given(method("POST"))
            .and(path("/api/posts"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 42, "url": "https://blog.example.com/?p=42"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = publisher_for(&server);
        let (draft, seo, image) = sample_inputs();

        let first = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .unwrap();
        let second = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .unwrap();

        assert_eq!(first, second);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn conflict_returns_existing_receipt_without_error() {
        let server = MockServer::start().await;
        let (storage, dir) = test_storage().await;
        let job_id = JobId::new();
        seed_job(&storage, &job_id).await;
        let token = Publisher::idempotency_token(&job_id);

        mount_token(&server, "tok-1").await;
        mount_media(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/posts"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/posts"))
            .and(query_param("idempotency_token", token.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 17,
                "url": "https://blog.example.com/?p=17",
                "published_at": "2026-08-01T10:00:00Z"
            })))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server);
        let (draft, seo, image) = sample_inputs();
        let receipt = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .expect("conflict treated as success");

        assert_eq!(receipt.post_id, 17);
        assert!(storage.get_receipt(&job_id).await.unwrap().is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn expired_session_is_refreshed_once() {
        let server = MockServer::start().await;
        let (storage, dir) = test_storage().await;
        let job_id = JobId::new();
        seed_job(&storage, &job_id).await;

        mount_token(&server, "tok-fresh").await;
        // First media call sees an expired session, the retry succeeds
        Mock::given(method("POST"))
            .and(path("/api/media"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_media(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/posts"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 42, "url": "https://blog.example.com/?p=42"
            })))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server);
        let (draft, seo, image) = sample_inputs();
        let receipt = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .expect("publish after refresh");
        assert_eq!(receipt.post_id, 42);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn bad_credentials_is_auth_error() {
        let server = MockServer::start().await;
        let (storage, dir) = test_storage().await;
        let job_id = JobId::new();

        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server);
        let (draft, seo, image) = sample_inputs();
        let err = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, AutoBloggerError::Auth { .. }));
        assert!(!err.is_retryable());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn validation_rejection_is_permanent() {
        let server = MockServer::start().await;
        let (storage, dir) = test_storage().await;
        let job_id = JobId::new();

        mount_token(&server, "tok-1").await;
        mount_media(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/posts"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server);
        let (draft, seo, image) = sample_inputs();
        let err = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(storage.get_receipt(&job_id).await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn gateway_error_is_transient() {
        let server = MockServer::start().await;
        let (storage, dir) = test_storage().await;
        let job_id = JobId::new();

        mount_token(&server, "tok-1").await;
        mount_media(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/posts"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server);
        let (draft, seo, image) = sample_inputs();
        let err = publisher
            .publish(&job_id, &draft, &seo, &image, &storage)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn idempotency_token_is_stable() {
        let job_id = JobId::new();
        assert_eq!(
            Publisher::idempotency_token(&job_id),
            Publisher::idempotency_token(&job_id)
        );
        assert_eq!(Publisher::idempotency_token(&job_id).len(), 64);
        assert_ne!(
            Publisher::idempotency_token(&job_id),
            Publisher::idempotency_token(&JobId::new())
        );
    }
}
