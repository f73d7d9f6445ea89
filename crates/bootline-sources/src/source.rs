//! The source contract and node metadata provider trait.
//!
//! A [`Source`] is a place where timestamped evidence of a lifecycle event
//! may appear: a log file, a metadata endpoint, a cloud or cluster API.
//! Implementations own their caches exclusively; the orchestrator owns the
//! set of sources, keyed by name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{EventDescriptor, FindResult};

/// A searchable backing store of lifecycle-event evidence.
#[async_trait]
pub trait Source: Send + Sync {
    /// Searches the source for occurrences of the event.
    ///
    /// Safe to call repeatedly; mutates nothing but the source's own cache.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing data could not be fetched at all or
    /// contained no match. Both are retryable conditions, not fatal ones.
    /// Entries in a successful result may still carry per-result errors
    /// (e.g. a timestamp that would not parse).
    async fn find(&self, event: &EventDescriptor) -> Result<Vec<FindResult>>;

    /// Drops any cached raw data so the next [`find`](Source::find)
    /// re-fetches. Idempotent.
    fn clear_cache(&self);

    /// Stable identifier used as the registry key. Must be unique across all
    /// sources registered with one measurer.
    fn name(&self) -> &str;

    /// Human-readable description, usually the log path or API endpoint.
    fn describe(&self) -> String;
}

/// Metadata about the node where measurements are executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
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
}

/// Best-effort supplier of [`NodeMetadata`].
///
/// Failures are never fatal to a measurement run; the measurement proceeds
/// with absent metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetches metadata for the node this process runs on.
    async fn node_metadata(&self) -> Result<NodeMetadata>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::event::{EventMatcher, FindResult};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    /// A stub source whose backing data can change between calls, for
    /// exercising the cache contract.
    struct StubSource {
        generation: Mutex<u32>,
        cached: Mutex<Option<u32>>,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                generation: Mutex::new(0),
                cached: Mutex::new(None),
            }
        }

        fn advance(&self) {
            *self.generation.lock() += 1;
        }
    }

    #[async_trait]
    impl Source for StubSource {
        async fn find(&self, _event: &EventDescriptor) -> Result<Vec<FindResult>> {
            let generation = {
                let mut cached = self.cached.lock();
                *cached.get_or_insert(*self.generation.lock())
            };
            Ok(vec![FindResult::with_timestamp(
                format!("generation-{generation}"),
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, generation).unwrap(),
            )])
        }

        fn clear_cache(&self) {
            *self.cached.lock() = None;
        }

        fn name(&self) -> &str {
            "stub"
        }

        fn describe(&self) -> String {
            "stub source".to_string()
        }
    }

    fn any_event() -> EventDescriptor {
        EventDescriptor::new(
            "e",
            "m",
            "stub",
            EventMatcher::MetadataPath("pending-time".to_string()),
        )
    }

    #[tokio::test]
    async fn find_reuses_cache_until_cleared() {
        let source = StubSource::new();
        let event = any_event();

        let before = source.find(&event).await.unwrap();
        assert_eq!(before[0].line, "generation-0");

        // Backing data changes, but the cache still answers.
        source.advance();
        let cached = source.find(&event).await.unwrap();
        assert_eq!(cached[0].line, "generation-0");

        // Clearing the cache forces a fresh fetch.
        source.clear_cache();
        let fresh = source.find(&event).await.unwrap();
        assert_eq!(fresh[0].line, "generation-1");
    }

    #[tokio::test]
    async fn clear_cache_is_idempotent() {
        let source = StubSource::new();
        source.clear_cache();
        source.clear_cache();
        let results = source.find(&any_event()).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn source_errors_are_data_not_panics() {
        let err = SourceError::NoMatch {
            path: "x".to_string(),
            pattern: "y".to_string(),
        };
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn node_metadata_serializes_camel_case() {
        let metadata = NodeMetadata {
            instance_id: "i-0123456789abcdef0".to_string(),
            ..NodeMetadata::default()
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"instanceId\""));
        assert!(json.contains("\"availabilityZone\""));
    }
}
