//! Dependency collection for a single root object
//!
//! Each object kind has its own expansion rule:
//!
//! | Kind          | Collected                                                   |
//! |---------------|-------------------------------------------------------------|
//! | entity        | root, author, markings                                      |
//! | relationship  | root, source, target, author, markings                      |
//! | report        | root, members, then one level of member expansion           |
//!
//! Entity and relationship refs that are not part of the document are
//! skipped. Report members must all be present.

use crate::error::{BundleError, Result};
use crate::index::ObjectIndex;
use crate::object::{ObjectKind, StixObject};

/// Collect the objects `root` depends on, root first.
///
/// The returned list may contain the same object several times; callers
/// dedupe it.
pub fn collect<'a>(root: &'a StixObject, index: &ObjectIndex<'a>) -> Result<Vec<&'a StixObject>> {
    match root.kind() {
        ObjectKind::Report => collect_report(root, index),
        ObjectKind::Relationship => Ok(collect_relationship(root, index)),
        _ => Ok(collect_entity(root, index)),
    }
}

/// Author and marking objects of `item`, in that order
fn embedded_objects<'a>(item: &StixObject, index: &ObjectIndex<'a>) -> Vec<&'a StixObject> {
    let created_by = item.created_by_ref().and_then(|id| index.get(id));
    let markings = item.object_marking_refs().filter_map(|id| index.get(id));
    created_by.into_iter().chain(markings).collect()
}

/// Entity expansion: `[entity, author?, markings…]`
pub fn collect_entity<'a>(entity: &'a StixObject, index: &ObjectIndex<'a>) -> Vec<&'a StixObject> {
    let mut items = vec![entity];
    items.extend(embedded_objects(entity, index));
    items
}

/// Relationship expansion: `[relationship, source?, target?, author?, markings…]`
pub fn collect_relationship<'a>(
    relationship: &'a StixObject,
    index: &ObjectIndex<'a>,
) -> Vec<&'a StixObject> {
    let mut items = vec![relationship];
    items.extend(relationship.source_ref().and_then(|id| index.get(id)));
    items.extend(relationship.target_ref().and_then(|id| index.get(id)));
    items.extend(embedded_objects(relationship, index));
    items
}

/// Report expansion.
///
/// The report and its members come first, then each of them (the report
/// included) is expanded once as a relationship or an entity. Members of
/// members are not followed further.
pub fn collect_report<'a>(
    report: &'a StixObject,
    index: &ObjectIndex<'a>,
) -> Result<Vec<&'a StixObject>> {
    let mut members = vec![report];
    for reference in report.object_refs() {
        let member = index
            .get(reference)
            .ok_or_else(|| BundleError::DanglingReference {
                report: report.id().to_string(),
                reference: reference.to_string(),
            })?;
        members.push(member);
    }

    let mut items = members.clone();
    for member in members {
        match member.kind() {
            ObjectKind::Relationship => items.extend(collect_relationship(member, index)),
            _ => items.extend(collect_entity(member, index)),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Document;

    fn ids(items: &[&StixObject]) -> Vec<String> {
        items.iter().map(|o| o.id().to_string()).collect()
    }

    fn document() -> Document {
        Document::from_str(
            r#"{"objects":[
                {"id":"identity--author","type":"identity"},
                {"id":"marking--tlp","type":"marking-definition"},
                {"id":"malware--1","type":"malware","created_by_ref":"identity--author",
                 "object_marking_refs":["marking--tlp","marking--missing"]},
                {"id":"identity--victim","type":"identity"},
                {"id":"rel--1","type":"relationship","source_ref":"malware--1",
                 "target_ref":"identity--victim","object_marking_refs":["marking--tlp"]},
                {"id":"rel--dangling","type":"relationship","source_ref":"malware--1",
                 "target_ref":"identity--nowhere"},
                {"id":"report--1","type":"report","created_by_ref":"identity--author",
                 "object_refs":["rel--1","malware--1"]},
                {"id":"report--bad","type":"report","object_refs":["malware--1","indicator--gone"]}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_entity_expansion() {
        let doc = document();
        let index = ObjectIndex::build(&doc);
        let root = index.get("malware--1").unwrap();

        let items = collect(root, &index).unwrap();
        // missing marking is silently skipped
        assert_eq!(
            ids(&items),
            vec!["malware--1", "identity--author", "marking--tlp"]
        );
    }

    #[test]
    fn test_entity_without_refs() {
        let doc = document();
        let index = ObjectIndex::build(&doc);
        let root = index.get("identity--victim").unwrap();
        assert_eq!(ids(&collect(root, &index).unwrap()), vec!["identity--victim"]);
    }

    #[test]
    fn test_relationship_expansion() {
        let doc = document();
        let index = ObjectIndex::build(&doc);
        let root = index.get("rel--1").unwrap();

        let items = collect(root, &index).unwrap();
        assert_eq!(
            ids(&items),
            vec!["rel--1", "malware--1", "identity--victim", "marking--tlp"]
        );
    }

    #[test]
    fn test_relationship_missing_endpoint_skipped() {
        let doc = document();
        let index = ObjectIndex::build(&doc);
        let root = index.get("rel--dangling").unwrap();
        assert_eq!(
            ids(&collect(root, &index).unwrap()),
            vec!["rel--dangling", "malware--1"]
        );
    }

    #[test]
    fn test_report_expansion_one_level() {
        let doc = document();
        let index = ObjectIndex::build(&doc);
        let root = index.get("report--1").unwrap();

        let items = collect(root, &index).unwrap();
        assert_eq!(
            ids(&items),
            vec![
                // report and members
                "report--1",
                "rel--1",
                "malware--1",
                // report embedded refs
                "report--1",
                "identity--author",
                // rel--1 expansion
                "rel--1",
                "malware--1",
                "identity--victim",
                "marking--tlp",
                // malware--1 expansion
                "malware--1",
                "identity--author",
                "marking--tlp",
            ]
        );
    }

    #[test]
    fn test_report_dangling_reference() {
        let doc = document();
        let index = ObjectIndex::build(&doc);
        let root = index.get("report--bad").unwrap();

        match collect(root, &index) {
            Err(BundleError::DanglingReference { report, reference }) => {
                assert_eq!(report, "report--bad");
                assert_eq!(reference, "indicator--gone");
            }
            other => panic!("expected dangling reference, got {:?}", other),
        }
    }
}
