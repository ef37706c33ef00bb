//! OCI distribution registry client.
//!
//! Implements the remote blob store contract over the registry `/v2` HTTP
//! protocol: HEAD for blob existence, a POST/PUT upload session for blobs,
//! `?mount=` for cross-repository mounts, and GET/PUT for manifests.

use async_trait::async_trait;
use diskferry_core::error::{FerryError, Result};
use reqwest::StatusCode;

use crate::blobstore::RemoteBlobStore;
use crate::reference::ImageRef;

/// Manifest content type sent and accepted by this client.
const MANIFEST_CONTENT_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => request.basic_auth(username, Some(password)),
            _ => request,
        }
    }
}

/// Blob store over a single registry host.
///
/// TODO: bearer token auth flow for registries that reject basic auth.
pub struct HttpBlobStore {
    client: reqwest::Client,
    auth: RegistryAuth,
    base_url: String,
}

impl HttpBlobStore {
    /// Create a client for `registry` (e.g. "registry.local:5000").
    ///
    /// Loopback registries are addressed over plain HTTP, everything else
    /// over HTTPS.
    pub fn new(registry: &str) -> Self {
        Self::with_auth(registry, RegistryAuth::from_env())
    }

    /// Create a client with explicit credentials.
    pub fn with_auth(registry: &str, auth: RegistryAuth) -> Self {
        let scheme = if registry.starts_with("localhost")
            || registry.starts_with("127.")
            || registry.starts_with("[::1]")
        {
            "http"
        } else {
            "https"
        };
        Self {
            client: reqwest::Client::new(),
            auth,
            base_url: format!("{}://{}", scheme, registry),
        }
    }

    fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest)
    }

    fn upload_url(&self, repository: &str) -> String {
        format!("{}/v2/{}/blobs/uploads/", self.base_url, repository)
    }

    fn manifest_url(&self, reference: &ImageRef) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.base_url, reference.repository, reference.tag
        )
    }

    /// Resolve the upload session location returned by the registry, which
    /// may be relative to the registry root.
    fn absolute_location(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}{}", self.base_url, location)
        }
    }

    async fn begin_upload(&self, repository: &str, query: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.upload_url(repository), query);
        self.auth
            .apply(self.client.post(&url))
            .send()
            .await
            .map_err(request_error)
    }
}

#[async_trait]
impl RemoteBlobStore for HttpBlobStore {
    async fn exists(&self, repository: &str, digest: &str) -> Result<bool> {
        let response = self
            .auth
            .apply(self.client.head(self.blob_url(repository, digest)))
            .send()
            .await
            .map_err(request_error)?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(FerryError::Registry(format!(
                "blob HEAD for {} returned {}",
                digest, status
            ))),
        }
    }

    async fn upload(&self, repository: &str, digest: &str, bytes: Vec<u8>) -> Result<()> {
        let response = self.begin_upload(repository, "").await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(FerryError::Registry(format!(
                "blob upload session returned {}",
                response.status()
            )));
        }
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                FerryError::Registry("blob upload session has no location".to_string())
            })?;

        let separator = if location.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}digest={}",
            self.absolute_location(location),
            separator,
            digest
        );
        let response = self
            .auth
            .apply(self.client.put(&url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            return Err(FerryError::Registry(format!(
                "blob upload of {} returned {}",
                digest,
                response.status()
            )));
        }

        tracing::debug!(digest = %digest, repository = %repository, "Uploaded blob");
        Ok(())
    }

    async fn mount(
        &self,
        repository: &str,
        digest: &str,
        from_repository: &str,
    ) -> Result<bool> {
        let query = format!("?mount={}&from={}", digest, from_repository);
        let response = self.begin_upload(repository, &query).await?;
        match response.status() {
            // Created: the registry mounted the blob across repositories.
            StatusCode::CREATED => {
                tracing::debug!(
                    digest = %digest,
                    from = %from_repository,
                    "Mounted blob across repositories"
                );
                Ok(true)
            }
            // Accepted: mount declined, an upload session was opened instead.
            StatusCode::ACCEPTED => Ok(false),
            status => Err(FerryError::Registry(format!(
                "blob mount of {} returned {}",
                digest, status
            ))),
        }
    }

    async fn download(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let response = self
            .auth
            .apply(self.client.get(self.blob_url(repository, digest)))
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            return Err(FerryError::Registry(format!(
                "blob GET for {} returned {}",
                digest,
                response.status()
            )));
        }
        let bytes = response.bytes().await.map_err(request_error)?;
        Ok(bytes.to_vec())
    }

    async fn get_manifest(&self, reference: &ImageRef) -> Result<Vec<u8>> {
        let response = self
            .auth
            .apply(self.client.get(self.manifest_url(reference)))
            .header(reqwest::header::ACCEPT, MANIFEST_CONTENT_TYPE)
            .send()
            .await
            .map_err(request_error)?;
        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await.map_err(request_error)?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(FerryError::NameUnknown {
                reference: reference.full_reference(),
            }),
            status => Err(FerryError::Registry(format!(
                "manifest GET for {} returned {}",
                reference, status
            ))),
        }
    }

    async fn put_manifest(&self, reference: &ImageRef, bytes: Vec<u8>) -> Result<()> {
        let response = self
            .auth
            .apply(self.client.put(self.manifest_url(reference)))
            .header(reqwest::header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE)
            .body(bytes)
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            return Err(FerryError::Registry(format!(
                "manifest PUT for {} returned {}",
                reference,
                response.status()
            )));
        }
        Ok(())
    }
}

fn request_error(err: reqwest::Error) -> FerryError {
    FerryError::Registry(err.to_string())
}
