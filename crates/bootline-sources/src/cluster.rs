//! Cluster API source.
//!
//! Lists the pods scheduled on this node straight from the kube-apiserver
//! and turns their creation timestamps into events. Runs with the
//! in-cluster service-account identity; there is no kubeconfig handling.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{Result, SourceError};
use crate::event::{EventDescriptor, EventMatcher, FindResult};
use crate::source::Source;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Connection settings for the kube-apiserver.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base URL of the apiserver, e.g. `https://10.96.0.1:443`.
    pub endpoint: String,
    /// Bearer token for the service account.
    pub token: String,
    /// PEM-encoded CA bundle the apiserver's certificate chains to.
    pub ca_bundle: Option<Vec<u8>>,
}

impl ClusterConfig {
    /// Builds the config from the in-cluster environment: the
    /// `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` variables plus the
    /// mounted service-account token and CA bundle.
    pub fn in_cluster() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| SourceError::Api("KUBERNETES_SERVICE_HOST is not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| SourceError::Api("KUBERNETES_SERVICE_PORT is not set".to_string()))?;
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))?
            .trim()
            .to_string();
        let ca_bundle = std::fs::read(dir.join("ca.crt")).ok();
        Ok(Self {
            endpoint: format!("https://{host}:{port}"),
            token,
            ca_bundle,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodMetadata {
    name: String,
    namespace: String,
    creation_timestamp: DateTime<Utc>,
}

/// Event source backed by the kube-apiserver.
pub struct ClusterSource {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    node_name: String,
    namespace: String,
    cache: Mutex<Option<Vec<PodMetadata>>>,
}

impl ClusterSource {
    /// Registry name of this source.
    pub const NAME: &'static str = "k8s";

    /// Creates a cluster source scoped to one node and namespace.
    pub fn new(
        config: ClusterConfig,
        node_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = &config.ca_bundle {
            let cert = reqwest::Certificate::from_pem(pem)?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
            token: config.token,
            node_name: node_name.into(),
            namespace: namespace.into(),
            cache: Mutex::new(None),
        })
    }

    #[cfg(test)]
    fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        node_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: "test-token".to_string(),
            node_name: node_name.into(),
            namespace: namespace.into(),
            cache: Mutex::new(None),
        }
    }

    async fn pods(&self) -> Result<Vec<PodMetadata>> {
        if let Some(cached) = self.cache.lock().clone() {
            return Ok(cached);
        }
        let url = format!(
            "{}/api/v1/namespaces/{}/pods",
            self.endpoint, self.namespace
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("fieldSelector", format!("spec.nodeName={}", self.node_name))])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        let list: PodList = response.json().await?;
        let pods: Vec<PodMetadata> = list.items.into_iter().map(|pod| pod.metadata).collect();
        *self.cache.lock() = Some(pods.clone());
        Ok(pods)
    }
}

#[async_trait]
impl Source for ClusterSource {
    async fn find(&self, event: &EventDescriptor) -> Result<Vec<FindResult>> {
        if !matches!(event.matcher, EventMatcher::PodCreation) {
            return Err(SourceError::UnsupportedMatcher {
                source_name: Self::NAME.to_string(),
                matcher: format!("{:?}", event.matcher),
            });
        }
        let pods = self.pods().await?;
        if pods.is_empty() {
            return Err(SourceError::Api(format!(
                "no pods in namespace {} scheduled on node {}",
                self.namespace, self.node_name
            )));
        }
        let mut results: Vec<FindResult> = pods
            .into_iter()
            .map(|pod| {
                let line = format!("{}/{}", pod.namespace, pod.name);
                let comment = event.comment.map(|rule| rule.apply(&line));
                FindResult {
                    line,
                    timestamp: Some(pod.creation_timestamp),
                    comment,
                    error: None,
                }
            })
            .collect();
        results.sort_by_key(FindResult::sort_timestamp);
        Ok(event.selector.select(results))
    }

    fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        format!("{} (namespace {})", self.endpoint, self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MatchSelector;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pod(name: &str, created: &str) -> serde_json::Value {
        json!({
            "metadata": {
                "name": name,
                "namespace": "default",
                "creationTimestamp": created,
            }
        })
    }

    fn pod_event() -> EventDescriptor {
        EventDescriptor::new(
            "Pod Created",
            "pod_created",
            ClusterSource::NAME,
            EventMatcher::PodCreation,
        )
    }

    #[tokio::test]
    async fn lists_pods_scheduled_on_node() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/pods"))
            .and(query_param("fieldSelector", "spec.nodeName=node-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    pod("nginx", "2024-03-05T10:02:00Z"),
                    pod("coredns", "2024-03-05T10:01:00Z"),
                ]
            })))
            .mount(&server)
            .await;

        let source = ClusterSource::with_client(
            reqwest::Client::new(),
            server.uri(),
            "node-a",
            "default",
        );
        let results = source
            .find(&pod_event().with_selector(MatchSelector::All))
            .await
            .unwrap();

        // Sorted by creation time, earliest first.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].line, "default/coredns");
        assert_eq!(results[1].line, "default/nginx");
    }

    #[tokio::test]
    async fn first_selector_keeps_earliest_pod() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    pod("late", "2024-03-05T10:05:00Z"),
                    pod("early", "2024-03-05T10:01:00Z"),
                ]
            })))
            .mount(&server)
            .await;

        let source = ClusterSource::with_client(
            reqwest::Client::new(),
            server.uri(),
            "node-a",
            "default",
        );
        let results = source.find(&pod_event()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].line, "default/early");
    }

    #[tokio::test]
    async fn empty_pod_list_is_a_retryable_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(&server)
            .await;

        let source = ClusterSource::with_client(
            reqwest::Client::new(),
            server.uri(),
            "node-a",
            "default",
        );
        let err = source.find(&pod_event()).await.unwrap_err();
        assert!(matches!(err, SourceError::Api(_)));
    }

    #[tokio::test]
    async fn apiserver_rejection_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/pods"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let source = ClusterSource::with_client(
            reqwest::Client::new(),
            server.uri(),
            "node-a",
            "default",
        );
        let err = source.find(&pod_event()).await.unwrap_err();
        assert!(matches!(err, SourceError::HttpStatus { status: 401, .. }));
    }

    #[tokio::test]
    async fn pod_list_is_cached_until_cleared() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [pod("only", "2024-03-05T10:01:00Z")]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let source = ClusterSource::with_client(
            reqwest::Client::new(),
            server.uri(),
            "node-a",
            "default",
        );
        source.find(&pod_event()).await.unwrap();
        source.find(&pod_event()).await.unwrap();
        source.clear_cache();
        source.find(&pod_event()).await.unwrap();
    }
}
