#![doc = "GitHub Releases client: implements the core `ArtifactRepository` contract over the REST API."]
//
//! # GitHub Releases client
//!
//! [`GitHubClient`] maps the relay's bucket/asset vocabulary onto GitHub:
//! a bucket is a release identified by its tag, an asset is a release asset.
//!
//! - Construct with [`GitHubClient::new`] from the `github` config section and a token.
//! - Uploads stream the request body straight from the source; nothing is buffered here.
//! - HTTP statuses are classified into [`RelayError`] kinds in one place, [`status_error`].

use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use release_relay_core::contract::{
    ArtifactRepository, AssetEntry, Bucket, ByteStream, SourceBody, StoredObjectDescriptor,
};
use release_relay_core::RelayError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

use crate::load_config::GitHubSection;

const ASSET_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ReleaseJson {
    id: u64,
    tag_name: String,
    upload_url: String,
    html_url: String,
}

impl From<ReleaseJson> for Bucket {
    fn from(r: ReleaseJson) -> Self {
        Bucket {
            tag: r.tag_name,
            id: r.id,
            publish_endpoint: r.upload_url,
            browse_url: r.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AssetJson {
    id: u64,
    name: String,
    size: u64,
    #[serde(default)]
    browser_download_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubSection, token: String) -> Result<Self, RelayError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        let http = reqwest::Client::builder()
            .user_agent(concat!("release-relay/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RelayError::Rejected(format!("cannot build HTTP client: {e}")))?;
        tracing::info!(
            repo = %config.repo,
            api_base = %config.api_base,
            token_set = !token.is_empty(),
            "Initialized GitHubClient"
        );
        Ok(GitHubClient {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo: config.repo.clone(),
            token,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.repo, path)
    }

    /// `releases/tags/<tag>` with the tag percent-encoded as one path segment.
    fn tag_url(&self, tag: &str) -> Result<Url, RelayError> {
        let base = self.repo_url("releases/tags");
        let mut url = Url::parse(&base)
            .map_err(|e| RelayError::Rejected(format!("invalid GitHub API URL {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RelayError::Rejected(format!("GitHub API URL {base} cannot take a path")))?
            .push(tag);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, RelayError> {
        self.authed(request).send().await.map_err(|e| {
            tracing::warn!(error = %e, what, "GitHub request did not complete");
            RelayError::Transport(format!("{what}: {e}"))
        })
    }
}

/// Map a non-success GitHub status to an error kind.
pub(crate) fn status_error(status: StatusCode, body: &str, what: &str) -> RelayError {
    let snippet: String = body.chars().take(400).collect();
    let msg = format!("{what} failed [{}]: {snippet}", status.as_u16());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RelayError::Transport(msg)
    } else if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("already_exists") {
        RelayError::NameConflict(msg)
    } else {
        RelayError::Rejected(msg)
    }
}

async fn error_from(response: Response, what: &str) -> RelayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let e = status_error(status, &body, what);
    tracing::error!(status = status.as_u16(), error = %e, "GitHub API error");
    e
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T, RelayError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RelayError::Transport(format!("{what}: unreadable response: {e}")))
}

/// Upload URL without the `{?name,label}` template suffix.
pub(crate) fn upload_base(publish_endpoint: &str) -> &str {
    publish_endpoint
        .split_once('{')
        .map(|(base, _)| base)
        .unwrap_or(publish_endpoint)
}

/// Gives a [`ByteStream`] the `Sync` bound request bodies ask for. The stream is
/// only ever polled through `&mut`, so the lock is never contended.
struct SyncBody(Mutex<ByteStream>);

impl Stream for SyncBody {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .poll_next_unpin(cx)
    }
}

#[async_trait]
impl ArtifactRepository for GitHubClient {
    async fn find_bucket(&self, tag: &str) -> Result<Option<Bucket>, RelayError> {
        tracing::info!(tag, "Looking up release by tag");
        let url = self.tag_url(tag)?;
        let response = self.send(self.http.get(url), "get release by tag").await?;
        match response.status() {
            StatusCode::OK => {
                let release: ReleaseJson = json_body(response, "get release by tag").await?;
                tracing::info!(tag, release_id = release.id, "Found release");
                Ok(Some(release.into()))
            }
            StatusCode::NOT_FOUND => {
                tracing::info!(tag, "No release for tag");
                Ok(None)
            }
            _ => Err(error_from(response, "get release by tag").await),
        }
    }

    async fn create_bucket(&self, tag: &str) -> Result<Bucket, RelayError> {
        tracing::info!(tag, "Creating release");
        let payload = serde_json::json!({
            "tag_name": tag,
            "name": tag,
            "body": format!("Automated uploads for tag {tag}"),
            "draft": false,
            "prerelease": false,
        });
        let response = self
            .send(self.http.post(self.repo_url("releases")).json(&payload), "create release")
            .await?;
        if !response.status().is_success() {
            return Err(error_from(response, "create release").await);
        }
        let release: ReleaseJson = json_body(response, "create release").await?;
        tracing::info!(tag, release_id = release.id, "Created release");
        Ok(release.into())
    }

    async fn upload_asset(
        &self,
        bucket: &Bucket,
        name: &str,
        body: SourceBody,
    ) -> Result<StoredObjectDescriptor, RelayError> {
        tracing::info!(
            tag = %bucket.tag,
            release_id = bucket.id,
            name,
            content_length = ?body.content_length,
            "Uploading release asset"
        );
        let mut request = self
            .http
            .post(upload_base(&bucket.publish_endpoint))
            .query(&[("name", name)])
            .header(CONTENT_TYPE, "application/octet-stream");
        // Without a length the body goes out chunked.
        if let Some(length) = body.content_length {
            request = request.header(CONTENT_LENGTH, length);
        }
        let request = request.body(reqwest::Body::wrap_stream(SyncBody(Mutex::new(body.stream))));
        let response = self.send(request, "upload asset").await?;
        if !response.status().is_success() {
            return Err(error_from(response, "upload asset").await);
        }
        let asset: AssetJson = json_body(response, "upload asset").await?;
        let download_url = asset
            .browser_download_url
            .or(asset.url)
            .unwrap_or_else(|| format!("{}/{}", bucket.browse_url, asset.name));
        tracing::info!(asset_id = asset.id, size = asset.size, url = %download_url, "Uploaded release asset");
        Ok(StoredObjectDescriptor {
            name: asset.name,
            size_bytes: asset.size,
            download_url,
        })
    }

    async fn list_assets(&self, bucket: &Bucket) -> Result<Vec<AssetEntry>, RelayError> {
        let mut entries = Vec::new();
        let mut page = 1usize;
        loop {
            let url = self.repo_url(&format!("releases/{}/assets", bucket.id));
            let request = self.http.get(url).query(&[
                ("per_page", ASSET_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ]);
            let response = self.send(request, "list release assets").await?;
            if !response.status().is_success() {
                return Err(error_from(response, "list release assets").await);
            }
            let batch: Vec<AssetJson> = json_body(response, "list release assets").await?;
            let last_page = batch.len() < ASSET_PAGE_SIZE;
            entries.extend(batch.into_iter().map(|a| AssetEntry {
                id: a.id,
                name: a.name,
                size_bytes: a.size,
            }));
            if last_page {
                break;
            }
            page += 1;
        }
        tracing::info!(release_id = bucket.id, count = entries.len(), "Listed release assets");
        Ok(entries)
    }

    async fn delete_asset(&self, bucket: &Bucket, asset_id: u64) -> Result<(), RelayError> {
        tracing::info!(release_id = bucket.id, asset_id, "Deleting release asset");
        let url = self.repo_url(&format!("releases/assets/{asset_id}"));
        let response = self.send(self.http.delete(url), "delete asset").await?;
        match response.status() {
            s if s.is_success() => {
                tracing::info!(asset_id, "Deleted release asset");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                tracing::info!(asset_id, "Release asset already gone");
                Ok(())
            }
            _ => Err(error_from(response, "delete asset").await),
        }
    }
}
