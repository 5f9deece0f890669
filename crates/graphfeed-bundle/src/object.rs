//! Typed view over bundle objects and documents
//!
//! Objects are kept as their original JSON mapping so that every field
//! survives re-serialization untouched. The handful of fields the
//! partitioner cares about are exposed through accessors.

use crate::error::{BundleError, Result};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Object type discriminator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Container whose `object_refs` must ship with it
    Report,
    /// Edge between two objects (`source_ref` -> `target_ref`)
    Relationship,
    /// Data marking such as TLP
    MarkingDefinition,
    /// Author / organization referenced by `created_by_ref`
    Identity,
    /// Any other entity type
    Other(String),
}

impl ObjectKind {
    /// Classify a `type` value
    pub fn parse(value: &str) -> Self {
        match value {
            "report" => Self::Report,
            "relationship" => Self::Relationship,
            "marking-definition" => Self::MarkingDefinition,
            "identity" => Self::Identity,
            other => Self::Other(other.to_string()),
        }
    }

    /// The `type` string this kind was parsed from
    pub fn as_str(&self) -> &str {
        match self {
            Self::Report => "report",
            Self::Relationship => "relationship",
            Self::MarkingDefinition => "marking-definition",
            Self::Identity => "identity",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single identified object of a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct StixObject {
    id: String,
    kind: ObjectKind,
    fields: Map<String, Value>,
}

impl StixObject {
    /// Build an object from its JSON form.
    ///
    /// `position` is only used to produce a useful error message.
    pub fn from_value(value: Value, position: usize) -> Result<Self> {
        let fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(BundleError::malformed(format!(
                    "object at index {} is not a mapping: {}",
                    position, other
                )))
            }
        };

        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BundleError::malformed(format!("object at index {} has no string 'id'", position))
            })?
            .to_string();

        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .map(ObjectKind::parse)
            .ok_or_else(|| {
                BundleError::malformed(format!("object '{}' has no string 'type'", id))
            })?;

        Ok(Self { id, kind, fields })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Raw field access
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Relationship source id
    pub fn source_ref(&self) -> Option<&str> {
        self.str_field("source_ref")
    }

    /// Relationship target id
    pub fn target_ref(&self) -> Option<&str> {
        self.str_field("target_ref")
    }

    /// Author id
    pub fn created_by_ref(&self) -> Option<&str> {
        self.str_field("created_by_ref")
    }

    /// Marking ids, in declaration order
    pub fn object_marking_refs(&self) -> impl Iterator<Item = &str> {
        self.str_list("object_marking_refs")
    }

    /// Report member ids, in declaration order
    pub fn object_refs(&self) -> impl Iterator<Item = &str> {
        self.str_list("object_refs")
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    fn str_list(&self, field: &str) -> impl Iterator<Item = &str> {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

impl Serialize for StixObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// A parsed bundle document
#[derive(Debug, Clone, Default)]
pub struct Document {
    objects: Vec<StixObject>,
}

impl Document {
    /// Parse a document from raw bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(data)
            .map_err(|e| BundleError::malformed(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Parse a document from a JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self> {
        Self::from_slice(data.as_bytes())
    }

    /// Build a document from an already decoded JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        let objects = match value {
            Value::Object(mut map) => match map.remove("objects") {
                Some(Value::Array(items)) => items,
                Some(_) => return Err(BundleError::malformed("'objects' is not a sequence")),
                None => return Err(BundleError::malformed("missing 'objects' field")),
            },
            _ => return Err(BundleError::malformed("document is not a mapping")),
        };

        let objects = objects
            .into_iter()
            .enumerate()
            .map(|(position, item)| StixObject::from_value(item, position))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { objects })
    }

    /// Build a document from objects directly
    pub fn from_objects(objects: Vec<StixObject>) -> Self {
        Self { objects }
    }

    /// Objects in document order
    pub fn objects(&self) -> &[StixObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
