//! graphfeed-bundle - dependency-safe bundle partitioning
//!
//! Threat-intelligence bundles are flat lists of objects that reference each
//! other by id. Ingestion workers need every referenced object to arrive in
//! the same or an earlier message than the object referencing it, so large
//! bundles are split into partitions before they are queued.
//!
//! ```text
//! Document ──▶ ObjectIndex ──▶ collector::collect ──▶ BundlePartitioner ──▶ [Partition]
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use graphfeed_bundle::BundlePartitioner;
//!
//! let partitions = BundlePartitioner::new().partition_slice(bundle_bytes)?;
//! for partition in &partitions {
//!     queue.send(partition.to_json()?);
//! }
//! ```

pub mod collector;
pub mod error;
pub mod index;
pub mod object;
pub mod partitioner;
pub mod tlp;

pub use error::{BundleError, Result};
pub use index::ObjectIndex;
pub use object::{Document, ObjectKind, StixObject};
pub use partitioner::{BundleEnvelope, BundlePartitioner, Partition, BUNDLE_SPEC_VERSION};
pub use tlp::{check_max_tlp, TlpLevel};
