//! Artifact storage client - uploads synthesized audio and serves it back.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Narrow contract over durable artifact storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload `bytes` under `object_name`, returning the public URL.
    async fn upload(&self, object_name: &str, bytes: Vec<u8>) -> Result<String>;

    /// Download a previously uploaded artifact by its public URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// REST client for a bucket-style object store.
pub struct BucketStore {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl BucketStore {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            service_key: service_key.into(),
            bucket: bucket.into(),
        }
    }

    fn object_url(&self, object_name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, object_name
        )
    }

    fn public_url(&self, object_name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object_name
        )
    }
}

#[async_trait]
impl ArtifactStore for BucketStore {
    async fn upload(&self, object_name: &str, bytes: Vec<u8>) -> Result<String> {
        debug!(object_name, bytes = bytes.len(), "uploading artifact");
        let response = self
            .http
            .post(self.object_url(object_name))
            .bearer_auth(&self.service_key)
            .header("content-type", "audio/mpeg")
            // Re-uploading the same object (delivery regeneration) overwrites.
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .context("artifact upload request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "artifact upload returned http {}",
                response.status()
            ));
        }
        Ok(self.public_url(object_name))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("artifact download request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "artifact download returned http {}",
                response.status()
            ));
        }
        Ok(response.bytes().await.context("artifact body read failed")?.to_vec())
    }
}

/// Disk-backed store for deployments without a bucket: artifacts stay in
/// the audio work dir and the "URL" is the local path.
pub struct LocalStore {
    dir: std::path::PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn upload(&self, object_name: &str, bytes: Vec<u8>) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("artifact dir create failed")?;
        let path = self.dir.join(object_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("artifact write failed: {}", path.display()))?;
        Ok(path.display().to_string())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tokio::fs::read(url)
            .await
            .with_context(|| format!("artifact read failed: {url}"))
    }
}
