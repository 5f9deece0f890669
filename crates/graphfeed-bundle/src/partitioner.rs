//! Bundle partitioner
//!
//! Splits a document into dependency-safe partitions, each of which becomes
//! one outbound bundle. Partitions are emitted in three passes:
//!
//! 1. every report, with its members
//! 2. every relationship not already shipped, with its endpoints
//! 3. every remaining non-relationship object, with its embedded refs
//!
//! A per-call [`PartitionContext`] tracks the ids already shipped so later
//! passes skip roots that an earlier partition carried. The partitioner
//! itself is stateless and can be shared across threads.

use crate::collector;
use crate::error::{BundleError, Result};
use crate::index::ObjectIndex;
use crate::object::{Document, ObjectKind, StixObject};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Bundle `spec_version` written into every emitted envelope
pub const BUNDLE_SPEC_VERSION: &str = "2.0";

/// One dependency-closed group of objects
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    objects: Vec<StixObject>,
}

impl Partition {
    /// Objects in emission order
    pub fn objects(&self) -> &[StixObject] {
        &self.objects
    }

    /// Ids in emission order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(StixObject::id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids().any(|candidate| candidate == id)
    }

    /// Wrap the partition into a bundle envelope with a fresh id
    pub fn to_envelope(&self) -> BundleEnvelope<'_> {
        BundleEnvelope {
            kind: "bundle",
            id: format!("bundle--{}", uuid::Uuid::new_v4()),
            spec_version: BUNDLE_SPEC_VERSION,
            objects: &self.objects,
        }
    }

    /// Serialize the partition as a bundle document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_envelope())?)
    }
}

/// Serialized form of a partition
#[derive(Debug, Serialize)]
pub struct BundleEnvelope<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub spec_version: &'static str,
    pub objects: &'a [StixObject],
}

/// Scratch state of a single partitioning run
struct PartitionContext<'a> {
    index: ObjectIndex<'a>,
    shipped: HashSet<&'a str>,
    partitions: Vec<Partition>,
}

impl<'a> PartitionContext<'a> {
    fn new(document: &'a Document) -> Self {
        Self {
            index: ObjectIndex::build(document),
            shipped: HashSet::new(),
            partitions: Vec::new(),
        }
    }

    fn is_shipped(&self, id: &str) -> bool {
        self.shipped.contains(id)
    }

    /// Collect, dedupe, mark and emit the partition rooted at `root`
    fn emit(&mut self, root: &'a StixObject) -> Result<()> {
        let collected = collector::collect(root, &self.index)?;
        let items = dedupe(collected);

        self.shipped
            .extend(items.iter().copied().map(StixObject::id));
        self.partitions.push(Partition {
            objects: items.into_iter().cloned().collect(),
        });
        Ok(())
    }
}

/// Keep the first occurrence of every id, preserving order
fn dedupe<'a>(items: Vec<&'a StixObject>) -> Vec<&'a StixObject> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.id()))
        .collect()
}

/// Splits documents into dependency-safe partitions
#[derive(Debug, Clone, Copy, Default)]
pub struct BundlePartitioner;

impl BundlePartitioner {
    pub fn new() -> Self {
        Self
    }

    /// Partition a parsed document.
    ///
    /// Fails with [`BundleError::EmptyBundle`] when nothing was emitted and
    /// with [`BundleError::DanglingReference`] when a report names a member
    /// missing from the document.
    pub fn partition(&self, document: &Document) -> Result<Vec<Partition>> {
        let mut ctx = PartitionContext::new(document);
        let objects = document.objects();

        for report in objects.iter().filter(|o| *o.kind() == ObjectKind::Report) {
            ctx.emit(report)?;
        }

        for relationship in objects
            .iter()
            .filter(|o| *o.kind() == ObjectKind::Relationship)
        {
            if !ctx.is_shipped(relationship.id()) {
                ctx.emit(relationship)?;
            }
        }

        for entity in objects
            .iter()
            .filter(|o| *o.kind() != ObjectKind::Relationship)
        {
            if !ctx.is_shipped(entity.id()) {
                ctx.emit(entity)?;
            }
        }

        debug!(
            objects = objects.len(),
            partitions = ctx.partitions.len(),
            "bundle partitioned"
        );

        if ctx.partitions.is_empty() {
            return Err(BundleError::EmptyBundle);
        }
        Ok(ctx.partitions)
    }

    /// Parse raw bytes and partition the resulting document
    pub fn partition_slice(&self, data: &[u8]) -> Result<Vec<Partition>> {
        let document = Document::from_slice(data)?;
        self.partition(&document)
    }
}
