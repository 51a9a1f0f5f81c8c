//! Hierarchy builder: collections to a virtual snapshot tree
//!
//! Validates a batch of collections (one tenant per backup, no
//! path-less entries), derives the reasons and owner set for manifest
//! tagging, and renders the virtual directory tree whose node names are
//! percent-encoded path segments. The repository walks the planned
//! collections to upload content.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use graphvault_core::domain::backup::Reason;
use graphvault_core::domain::collection::{Collection, CollectionState};
use graphvault_core::domain::path::escape_segment;

use crate::SnapshotError;

// ============================================================================
// Segment encoding
// ============================================================================

/// Percent-encodes an escaped path segment into a safe directory name.
///
/// Every byte outside `[A-Za-z0-9._-]` is emitted as `%XX`, so display
/// names survive any object-store key restrictions.
pub fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Reverses [`encode_segment`].
pub fn decode_segment(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut chars = encoded.bytes();

    while let Some(byte) = chars.next() {
        if byte == b'%' {
            let hi = chars.next()?;
            let lo = chars.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(byte);
        }
    }

    String::from_utf8(bytes).ok()
}

// ============================================================================
// Plan
// ============================================================================

/// One collection, validated and annotated for upload.
pub struct PlannedCollection {
    pub collection: Box<dyn Collection>,
    pub state: CollectionState,
    /// Encoded directory segments of the current path (absent for
    /// tombstones).
    pub encoded_dir: Option<Vec<String>>,
}

/// The validated input to one snapshot upload.
pub struct BackupTree {
    pub tenant: String,
    pub reasons: Vec<Reason>,
    pub owners: BTreeSet<String>,
    pub collections: Vec<PlannedCollection>,
}

/// Directory node of the virtual tree (names are encoded segments).
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DirNode {
    pub children: BTreeMap<String, DirNode>,
}

impl BackupTree {
    /// Renders the directory skeleton implied by the planned paths.
    pub fn virtual_root(&self) -> DirNode {
        let mut root = DirNode::default();
        for planned in &self.collections {
            let Some(segments) = &planned.encoded_dir else {
                continue;
            };
            let mut node = &mut root;
            for segment in segments {
                node = node.children.entry(segment.clone()).or_default();
            }
        }
        root
    }
}

/// Validates collections and assembles the upload plan.
///
/// Fails with [`SnapshotError::MultipleRoots`] when paths name more
/// than one tenant and [`SnapshotError::MissingPath`] when a collection
/// carries no path at all.
pub fn plan_backup(
    collections: Vec<Box<dyn Collection>>,
) -> Result<BackupTree, SnapshotError> {
    let mut tenant: Option<String> = None;
    let mut reasons = Vec::new();
    let mut owners = BTreeSet::new();
    let mut planned = Vec::new();

    for collection in collections {
        let state = CollectionState::derive(
            collection.full_path(),
            collection.previous_path(),
        )
        .map_err(|_| SnapshotError::MissingPath)?;

        for path in [collection.full_path(), collection.previous_path()]
            .into_iter()
            .flatten()
        {
            match &tenant {
                None => tenant = Some(path.tenant().to_string()),
                Some(existing) if existing != path.tenant() => {
                    return Err(SnapshotError::MultipleRoots(
                        existing.clone(),
                        path.tenant().to_string(),
                    ))
                }
                Some(_) => {}
            }
        }

        let encoded_dir = collection.full_path().map(|path| {
            path.elements()
                .iter()
                .map(|segment| encode_segment(&escape_segment(segment)))
                .collect::<Vec<_>>()
        });

        if let Some(path) = collection.full_path() {
            owners.insert(path.resource_owner().to_string());
            let reason = Reason {
                resource_owner: path.resource_owner().to_string(),
                service: path.service(),
                category: path.category(),
            };
            if !reasons.contains(&reason) {
                reasons.push(reason);
            }
        }

        planned.push(PlannedCollection {
            collection,
            state,
            encoded_dir,
        });
    }

    Ok(BackupTree {
        tenant: tenant.ok_or(SnapshotError::MissingPath)?,
        reasons,
        owners,
        collections: planned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphvault_core::domain::collection::StreamCollection;
    use graphvault_core::domain::path::{Category, PathBuilder, RepoPath, Service};

    fn collection_at(
        tenant: &str,
        owner: &str,
        service: Service,
        category: Category,
        folder: &str,
    ) -> Box<dyn Collection> {
        let path = RepoPath::build(
            tenant,
            owner,
            service,
            category,
            &PathBuilder::new().append(folder),
            None,
        )
        .unwrap();
        let (collection, _tx) = StreamCollection::new(path, None);
        Box::new(collection)
    }

    mod encoding {
        use super::*;

        #[test]
        fn test_safe_names_pass_through() {
            assert_eq!(encode_segment("Inbox-2.old_mail"), "Inbox-2.old_mail");
        }

        #[test]
        fn test_specials_are_percent_encoded() {
            assert_eq!(encode_segment("a b"), "a%20b");
            assert_eq!(encode_segment("a/b"), "a%2Fb");
            assert_eq!(encode_segment("100%"), "100%25");
        }

        #[test]
        fn test_round_trip() {
            for name in ["plain", "with space", "sla/sh", "per%cent", "uni – code"] {
                assert_eq!(decode_segment(&encode_segment(name)).unwrap(), name);
            }
        }
    }

    mod planning {
        use super::*;

        #[test]
        fn test_single_tenant_plan() {
            let tree = plan_backup(vec![
                collection_at("t", "u1", Service::Exchange, Category::Email, "Inbox"),
                collection_at("t", "u1", Service::Exchange, Category::Contacts, "Main"),
            ])
            .unwrap();

            assert_eq!(tree.tenant, "t");
            assert_eq!(tree.reasons.len(), 2);
            assert_eq!(tree.owners.len(), 1);
        }

        #[test]
        fn test_multiple_tenants_rejected() {
            let result = plan_backup(vec![
                collection_at("t1", "u", Service::Exchange, Category::Email, "Inbox"),
                collection_at("t2", "u", Service::Exchange, Category::Email, "Inbox"),
            ]);
            assert!(matches!(result, Err(SnapshotError::MultipleRoots(_, _))));
        }

        #[test]
        fn test_empty_input_rejected() {
            assert!(matches!(
                plan_backup(Vec::new()),
                Err(SnapshotError::MissingPath)
            ));
        }

        #[test]
        fn test_two_owners_mixed_categories_tree_shape() {
            let tree = plan_backup(vec![
                collection_at("t", "u1", Service::Exchange, Category::Email, "Inbox"),
                collection_at("t", "u1", Service::Exchange, Category::Contacts, "Main"),
                collection_at("t", "u2", Service::Exchange, Category::Email, "Inbox"),
                collection_at("t", "u2", Service::Exchange, Category::Contacts, "Main"),
            ])
            .unwrap();

            assert_eq!(tree.owners.len(), 2);
            assert_eq!(tree.reasons.len(), 4);

            let root = tree.virtual_root();
            let tenant_node = &root.children["t"];
            let exchange = &tenant_node.children["exchange"];
            assert_eq!(exchange.children.len(), 2);

            for owner in ["u1", "u2"] {
                let owner_node = &exchange.children[owner];
                assert!(owner_node.children.contains_key("email"));
                assert!(owner_node.children.contains_key("contacts"));
            }
        }

        #[test]
        fn test_tombstones_carry_no_dir() {
            let prev = RepoPath::build(
                "t",
                "u",
                Service::Exchange,
                Category::Email,
                &PathBuilder::new().append("Gone"),
                None,
            )
            .unwrap();

            let tree = plan_backup(vec![
                collection_at("t", "u", Service::Exchange, Category::Email, "Inbox"),
                Box::new(StreamCollection::tombstone(prev)),
            ])
            .unwrap();

            let tombstone = tree
                .collections
                .iter()
                .find(|p| p.state == CollectionState::Deleted)
                .unwrap();
            assert!(tombstone.encoded_dir.is_none());
        }
    }
}
