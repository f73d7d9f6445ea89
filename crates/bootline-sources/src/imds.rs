//! Instance metadata service source.
//!
//! Fetches the instance-identity document over HTTP (with an IMDSv2 session
//! token when the endpoint grants one) and serves both the
//! [`pending-time`](ImdsSource::PENDING_TIME) event and best-effort node
//! metadata for measurements.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SourceError};
use crate::event::{EventDescriptor, EventMatcher, FindResult};
use crate::source::{MetadataProvider, NodeMetadata, Source};

const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// The instance-identity document served by the metadata endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    /// Cloud region.
    pub region: String,
    /// Instance type.
    pub instance_type: String,
    /// Instance id.
    pub instance_id: String,
    /// Account id.
    pub account_id: String,
    /// CPU architecture.
    pub architecture: String,
    /// Availability zone.
    pub availability_zone: String,
    /// Private IP address.
    pub private_ip: String,
    /// Machine image id.
    pub image_id: String,
    /// When the instance entered the pending state.
    pub pending_time: DateTime<Utc>,
}

/// The instance metadata service HTTP source.
pub struct ImdsSource {
    client: reqwest::Client,
    endpoint: String,
    cache: Mutex<Option<InstanceIdentity>>,
}

impl ImdsSource {
    /// Registry name of this source.
    pub const NAME: &'static str = "imds";
    /// Default metadata endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://169.254.169.254";
    /// Metadata path for the instance's pending time.
    pub const PENDING_TIME: &'static str = "pending-time";

    /// Creates a metadata source against the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    /// Creates a metadata source with a caller-supplied HTTP client.
    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Self {
            client,
            endpoint,
            cache: Mutex::new(None),
        }
    }

    /// Requests an IMDSv2 session token. Endpoints that only speak IMDSv1
    /// fail here; callers fall back to unauthenticated requests.
    async fn session_token(&self) -> Result<String> {
        let url = format!("{}/latest/api/token", self.endpoint);
        let response = self
            .client
            .put(&url)
            .header(TOKEN_TTL_HEADER, "21600")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.text().await?)
    }

    /// Fetches (and caches) the instance-identity document.
    pub async fn identity(&self) -> Result<InstanceIdentity> {
        if let Some(cached) = self.cache.lock().clone() {
            return Ok(cached);
        }
        let url = format!("{}/latest/dynamic/instance-identity/document", self.endpoint);
        let mut request = self.client.get(&url);
        match self.session_token().await {
            Ok(token) => request = request.header(TOKEN_HEADER, token),
            Err(err) => tracing::debug!(%err, "metadata token unavailable, trying without"),
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        let identity: InstanceIdentity = response.json().await?;
        *self.cache.lock() = Some(identity.clone());
        Ok(identity)
    }

    /// Fetches a plain-text metadata path, e.g. `/latest/meta-data/hostname`.
    pub async fn metadata_text(&self, path: &str) -> Result<String> {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        let mut request = self.client.get(&url);
        match self.session_token().await {
            Ok(token) => request = request.header(TOKEN_HEADER, token),
            Err(err) => tracing::debug!(%err, "metadata token unavailable, trying without"),
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.text().await?.trim().to_string())
    }

    /// The node's DNS hostname as reported by the metadata endpoint.
    pub async fn hostname(&self) -> Result<String> {
        self.metadata_text("latest/meta-data/hostname").await
    }

    /// The year the instance was launched, derived from its pending time.
    /// Used as the fallback year for year-less syslog timestamps.
    pub async fn launch_year(&self) -> Result<i32> {
        Ok(self.identity().await?.pending_time.year())
    }
}

#[async_trait]
impl Source for ImdsSource {
    async fn find(&self, event: &EventDescriptor) -> Result<Vec<FindResult>> {
        let EventMatcher::MetadataPath(path) = &event.matcher else {
            return Err(SourceError::UnsupportedMatcher {
                source_name: Self::NAME.to_string(),
                matcher: format!("{:?}", event.matcher),
            });
        };
        if path != Self::PENDING_TIME {
            return Err(SourceError::UnknownMetadataPath(path.clone()));
        }
        let identity = self.identity().await?;
        let line = identity.pending_time.to_rfc3339();
        let comment = event.comment.map(|rule| rule.apply(&line));
        let results = vec![FindResult {
            line,
            timestamp: Some(identity.pending_time),
            comment,
            error: None,
        }];
        Ok(event.selector.select(results))
    }

    fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

#[async_trait]
impl MetadataProvider for ImdsSource {
    async fn node_metadata(&self) -> Result<NodeMetadata> {
        let identity = self.identity().await?;
        Ok(NodeMetadata {
            region: identity.region,
            instance_type: identity.instance_type,
            instance_id: identity.instance_id,
            account_id: identity.account_id,
            architecture: identity.architecture,
            availability_zone: identity.availability_zone,
            private_ip: identity.private_ip,
            image_id: identity.image_id,
        })
    }
}
