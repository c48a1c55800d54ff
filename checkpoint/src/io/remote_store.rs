//! Remote object-storage store.
//!
//! Writes and deletes are fire-and-forget: failures are logged and swallowed so
//! a flaky network never aborts the computation being checkpointed. Reads that
//! fail for any reason surface as [`StoreError::NotFound`], which callers
//! already treat as "start fresh".
//!
//! The bucket is provisioned lazily on first use (create-if-absent plus an
//! optional expiry rule). A failed provisioning attempt leaves the store
//! not-ready without raising; later operations simply fail the usual way.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{StatusCode, Url};
use reqwest::blocking::Client;
use tracing::{debug, info, instrument, warn};

use crate::io::store::{Store, StoreError};

/// Bucket lifecycle rule id applied by [`ObjectClient::put_bucket_expiry`].
pub const EXPIRY_RULE_ID: &str = "expiry-rule";

/// Object operations needed by [`RemoteStore`].
///
/// Tests use a scripted in-memory client; production uses [`HttpObjectClient`].
pub trait ObjectClient: Send + Sync {
    fn bucket_exists(&self, bucket: &str) -> Result<bool>;
    fn create_bucket(&self, bucket: &str) -> Result<()>;
    /// Expire every object in the bucket `days` after creation.
    fn put_bucket_expiry(&self, bucket: &str, days: u32) -> Result<()>;
    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()>;
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Store mapping put/get/delete onto objects in one bucket.
pub struct RemoteStore {
    client: Box<dyn ObjectClient>,
    bucket: String,
    expire_in_days: Option<u32>,
    ready: OnceLock<bool>,
}

impl RemoteStore {
    pub fn new(client: Box<dyn ObjectClient>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            expire_in_days: None,
            ready: OnceLock::new(),
        }
    }

    /// Apply an expiry rule to the bucket when it is provisioned.
    pub fn with_expiry_days(mut self, days: u32) -> Self {
        self.expire_in_days = Some(days);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Provision the bucket if needed and report whether that succeeded.
    pub fn is_ready(&self) -> bool {
        *self.ready.get_or_init(|| match self.provision() {
            Ok(()) => true,
            Err(err) => {
                warn!(bucket = %self.bucket, err = %err, "bucket provisioning failed");
                false
            }
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    fn provision(&self) -> Result<()> {
        if !self.client.bucket_exists(&self.bucket)? {
            info!("creating bucket");
            self.client.create_bucket(&self.bucket)?;
        }
        if let Some(days) = self.expire_in_days {
            debug!(days, "applying bucket expiry");
            self.client.put_bucket_expiry(&self.bucket, days)?;
        }
        Ok(())
    }
}

impl Store for RemoteStore {
    fn put(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.is_ready();
        if let Err(err) = self.client.put_object(&self.bucket, key, blob) {
            warn!(
                bucket = %self.bucket,
                key,
                err = %err,
                "remote put failed; checkpoint not written"
            );
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.is_ready();
        self.client.get_object(&self.bucket, key).map_err(|err| {
            debug!(bucket = %self.bucket, key, err = %err, "remote get failed");
            StoreError::not_found(key)
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.is_ready();
        if let Err(err) = self.client.delete_object(&self.bucket, key) {
            warn!(
                bucket = %self.bucket,
                key,
                err = %err,
                "remote delete failed; checkpoint left behind"
            );
        }
        Ok(())
    }
}

/// Blocking HTTP client for S3-compatible endpoints using path-style URLs.
///
/// Bucket names and keys are pushed as single percent-encoded path segments,
/// so any key string addresses exactly one object.
pub struct HttpObjectClient {
    http: Client,
    endpoint: Url,
    bearer_token: Option<String>,
}

impl HttpObjectClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("parse remote endpoint '{endpoint}'"))?;
        if endpoint.cannot_be_a_base() {
            return Err(anyhow!("remote endpoint '{endpoint}' cannot hold a path"));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint,
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn bucket_url(&self, bucket: &str) -> Result<Url> {
        self.url_with_segments(&[bucket])
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        self.url_with_segments(&[bucket, key])
    }

    fn url_with_segments(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("remote endpoint '{}' cannot hold a path", self.endpoint))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl ObjectClient for HttpObjectClient {
    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let url = self.bucket_url(bucket)?;
        let response = self
            .authorize(self.http.head(url.clone()))
            .send()
            .with_context(|| format!("HEAD {url}"))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(anyhow!("HEAD {url} returned {status}")),
        }
    }

    fn create_bucket(&self, bucket: &str) -> Result<()> {
        let url = self.bucket_url(bucket)?;
        let response = self
            .authorize(self.http.put(url.clone()))
            .send()
            .with_context(|| format!("PUT {url}"))?;
        let status = response.status();
        let body = if status.is_success() {
            String::new()
        } else {
            response
                .text()
                .with_context(|| format!("read body of {url}"))?
        };
        create_bucket_outcome(bucket, status, &body)
    }

    fn put_bucket_expiry(&self, bucket: &str, days: u32) -> Result<()> {
        let mut url = self.bucket_url(bucket)?;
        url.set_query(Some("lifecycle"));
        self.authorize(self.http.put(url.clone()))
            .header("content-type", "application/xml")
            .body(expiry_configuration(days))
            .send()
            .with_context(|| format!("PUT {url}"))?
            .error_for_status()
            .with_context(|| format!("PUT {url}"))?;
        Ok(())
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()> {
        let url = self.object_url(bucket, key)?;
        self.authorize(self.http.put(url.clone()))
            .body(body.to_vec())
            .send()
            .with_context(|| format!("PUT {url}"))?
            .error_for_status()
            .with_context(|| format!("PUT {url}"))?;
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(bucket, key)?;
        let body = self
            .authorize(self.http.get(url.clone()))
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .bytes()
            .with_context(|| format!("read body of {url}"))?;
        Ok(body.to_vec())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.object_url(bucket, key)?;
        let response = self
            .authorize(self.http.delete(url.clone()))
            .send()
            .with_context(|| format!("DELETE {url}"))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(anyhow!("DELETE {url} returned {status}")),
        }
    }
}

/// Interpret the response to a bucket creation request.
///
/// A 409 is only success when the error code says we already own the bucket;
/// `BucketAlreadyExists` means another account holds the name.
fn create_bucket_outcome(bucket: &str, status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::CONFLICT && body.contains("<Code>BucketAlreadyOwnedByYou</Code>") {
        debug!(bucket, "bucket already owned");
        return Ok(());
    }
    if status == StatusCode::CONFLICT && body.contains("<Code>BucketAlreadyExists</Code>") {
        return Err(anyhow!("bucket '{bucket}' is owned by another account"));
    }
    Err(anyhow!("create bucket '{bucket}' returned {status}"))
}

/// Lifecycle document with a single bucket-wide expiration rule.
pub fn expiry_configuration(days: u32) -> String {
    format!(
        "<LifecycleConfiguration><Rule><ID>{EXPIRY_RULE_ID}</ID><Filter><Prefix></Prefix></Filter>\
         <Status>Enabled</Status><Expiration><Days>{days}</Days></Expiration></Rule>\
         </LifecycleConfiguration>"
    )
}
