//! Identifier lookup over a document

use crate::object::{Document, StixObject};
use std::collections::HashMap;

/// Read-only id -> object lookup borrowed from a [`Document`].
///
/// Duplicate ids are not rejected: the last occurrence in document order
/// wins.
#[derive(Debug, Default)]
pub struct ObjectIndex<'a> {
    objects: HashMap<&'a str, &'a StixObject>,
}

impl<'a> ObjectIndex<'a> {
    /// Index every object of the document
    pub fn build(document: &'a Document) -> Self {
        let mut objects = HashMap::with_capacity(document.len());
        for object in document.objects() {
            objects.insert(object.id(), object);
        }
        Self { objects }
    }

    /// Look up an object by id
    pub fn get(&self, id: &str) -> Option<&'a StixObject> {
        self.objects.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    /// Number of distinct ids
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
