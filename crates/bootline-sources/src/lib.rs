//! # bootline-sources
//!
//! Event sources for timing a Kubernetes node's boot and bootstrap sequence.
//!
//! This crate provides:
//!
//! - [`Source`] — Trait for anything that can be searched for timestamped
//!   evidence of a lifecycle event (log files, HTTP APIs)
//! - [`EventDescriptor`] — A named lifecycle milestone bound to a source
//! - [`MatchSelector`] — Policy for reducing multiple raw matches
//! - [`FindResult`] / [`Timing`] — Raw match and finalized timing values
//! - [`LogFile`] — Shared base for line-oriented log sources with glob
//!   resolution, gzip decompression, and timestamp extraction
//! - [`SyslogSource`] / [`CniLogSource`] — Concrete log sources
//! - [`ImdsSource`] — Instance metadata service source
//! - [`FleetSource`] — Compute-fleet API source behind the [`FleetApi`] trait
//! - [`ClusterSource`] — Kubernetes API source
//!
//! ## Example
//!
//! ```rust
//! use bootline_sources::{EventDescriptor, EventMatcher, MatchSelector, SyslogSource};
//! use regex::Regex;
//!
//! let event = EventDescriptor::new(
//!     "Kubelet Start",
//!     "kubelet_start",
//!     SyslogSource::NAME,
//!     EventMatcher::Pattern(Regex::new(r".*Starting Kubernetes Kubelet.*").unwrap()),
//! )
//! .with_selector(MatchSelector::First);
//!
//! assert_eq!(event.source, "messages");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod error;
pub mod event;
pub mod fleet;
pub mod imds;
pub mod logfile;
pub mod source;

// Re-export main types
pub use cluster::{ClusterConfig, ClusterSource};
pub use error::{Result, SourceError};
pub use event::{CommentRule, EventDescriptor, EventMatcher, FindResult, MatchSelector, Timing};
pub use fleet::{FleetApi, FleetRecord, FleetSource, InstanceRecord};
pub use imds::{ImdsSource, InstanceIdentity};
pub use logfile::{CniLogSource, LogFile, SyslogSource, TimestampFormat};
pub use source::{MetadataProvider, NodeMetadata, Source};
