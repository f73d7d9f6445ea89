//! Compute-fleet API source.
//!
//! Answers two events from the cloud compute API: when the fleet request
//! that produced this node was created, and when the instance itself was
//! launched. The API itself sits behind the [`FleetApi`] trait so the
//! source stays testable and transport-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{Result, SourceError};
use crate::event::{EventDescriptor, EventMatcher, FindResult};
use crate::source::Source;

/// Tag key the compute API stamps on instances launched by a fleet.
pub const FLEET_ID_TAG: &str = "aws:ec2:fleet-id";

static INSTANCE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"i-[0-9a-zA-Z]+").expect("static pattern compiles"));

/// An instance record as returned by the compute API.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    /// The instance id.
    pub instance_id: String,
    /// When the instance was launched.
    pub launch_time: DateTime<Utc>,
    /// Tags on the instance, as key/value pairs.
    pub tags: Vec<(String, String)>,
}

impl InstanceRecord {
    /// The fleet id this instance was launched by, if any.
    #[must_use]
    pub fn fleet_id(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|(key, _)| key == FLEET_ID_TAG)
            .map(|(_, value)| value.as_str())
    }
}

/// A fleet request record as returned by the compute API.
#[derive(Debug, Clone)]
pub struct FleetRecord {
    /// The fleet request id.
    pub fleet_id: String,
    /// When the fleet request was created.
    pub create_time: DateTime<Utc>,
}

/// The compute API calls the fleet source needs.
///
/// Implemented over whatever transport the deployment uses; tests stub it.
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Resolves a node name (private DNS name) to its instance record.
    async fn instance_for_node(&self, node_name: &str) -> Result<InstanceRecord>;

    /// Fetches an instance record by instance id.
    async fn instance(&self, instance_id: &str) -> Result<InstanceRecord>;

    /// Fetches the fleet request that launched an instance.
    async fn fleet_for_instance(&self, instance: &InstanceRecord) -> Result<FleetRecord>;
}

#[derive(Default)]
struct FleetCache {
    instance: Option<InstanceRecord>,
    fleet: Option<FleetRecord>,
}

/// Event source backed by the compute-fleet API.
pub struct FleetSource {
    api: Arc<dyn FleetApi>,
    instance_id: Option<String>,
    node_name: String,
    cache: Mutex<FleetCache>,
}

impl FleetSource {
    /// Registry name of this source.
    pub const NAME: &'static str = "fleet";

    /// Creates a fleet source for the given node. When `node_name` already
    /// looks like an instance id the node-name lookup is skipped.
    pub fn new(api: Arc<dyn FleetApi>, node_name: impl Into<String>) -> Self {
        let node_name = node_name.into();
        let instance_id = INSTANCE_ID
            .find(&node_name)
            .map(|m| m.as_str().to_string());
        Self {
            api,
            instance_id,
            node_name,
            cache: Mutex::new(FleetCache::default()),
        }
    }

    async fn instance_record(&self) -> Result<InstanceRecord> {
        if let Some(cached) = self.cache.lock().instance.clone() {
            return Ok(cached);
        }
        let record = match &self.instance_id {
            Some(id) => self.api.instance(id).await?,
            None => self.api.instance_for_node(&self.node_name).await?,
        };
        self.cache.lock().instance = Some(record.clone());
        Ok(record)
    }

    async fn fleet_record(&self) -> Result<FleetRecord> {
        if let Some(cached) = self.cache.lock().fleet.clone() {
            return Ok(cached);
        }
        let instance = self.instance_record().await?;
        let fleet = self.api.fleet_for_instance(&instance).await?;
        self.cache.lock().fleet = Some(fleet.clone());
        Ok(fleet)
    }
}

#[async_trait]
impl Source for FleetSource {
    async fn find(&self, event: &EventDescriptor) -> Result<Vec<FindResult>> {
        let (line, timestamp) = match &event.matcher {
            EventMatcher::FleetRequest => {
                let fleet = self.fleet_record().await?;
                (fleet.fleet_id, fleet.create_time)
            }
            EventMatcher::InstanceLaunch => {
                let instance = self.instance_record().await?;
                (instance.instance_id, instance.launch_time)
            }
            other => {
                return Err(SourceError::UnsupportedMatcher {
                    source_name: Self::NAME.to_string(),
                    matcher: format!("{other:?}"),
                });
            }
        };
        let comment = event.comment.map(|rule| rule.apply(&line));
        let results = vec![FindResult {
            line,
            timestamp: Some(timestamp),
            comment,
            error: None,
        }];
        Ok(event.selector.select(results))
    }

    fn clear_cache(&self) {
        *self.cache.lock() = FleetCache::default();
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        match &self.instance_id {
            Some(id) => format!("compute-fleet api for {id}"),
            None => format!("compute-fleet api for node {}", self.node_name),
        }
    }
}
