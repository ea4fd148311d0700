//! Conflict detection over access-point ids.
//!
//! Every access point claims a set of conflict ids (see the schema crate);
//! the invariant is that the union over one app list contains no duplicate.
//! Checking a proposed change looks for duplicates in three places, in
//! order: inside the proposal itself, inside the existing list (a broken
//! invariant we surface rather than paper over), and between the two.

use std::collections::BTreeMap;

use zeroinstall_schema::{AccessPoint, AppEntry, AppList};

use crate::errors::{ConflictItem, ConflictKind, DesktopError, DesktopResult};

fn item(id: &str, uri: &str, point: &AccessPoint) -> ConflictItem {
    ConflictItem {
        conflict_id: id.to_owned(),
        interface_uri: uri.to_owned(),
        access_point: point.tag().to_owned(),
    }
}

/// All conflict ids currently claimed in `list`, with their claimants.
///
/// Fails with [`ConflictKind::Existing`] if the list itself already
/// violates the uniqueness invariant.
pub fn existing_conflict_ids(
    list: &AppList,
) -> DesktopResult<BTreeMap<String, (String, AccessPoint)>> {
    let mut claimed: BTreeMap<String, (String, AccessPoint)> = BTreeMap::new();
    let mut collisions: Vec<ConflictItem> = Vec::new();
    for entry in &list.entries {
        let Some(points) = &entry.access_points else {
            continue;
        };
        for point in &points.entries {
            for id in point.conflict_ids(&entry.capability_lists) {
                if let Some((other_uri, other_point)) = claimed.get(&id) {
                    collisions.push(item(&id, other_uri, other_point));
                    collisions.push(item(&id, &entry.interface_uri, point));
                } else {
                    claimed.insert(id, (entry.interface_uri.clone(), point.clone()));
                }
            }
        }
    }
    if !collisions.is_empty() {
        collisions.sort();
        collisions.dedup();
        return Err(DesktopError::Conflict {
            kind: ConflictKind::Existing,
            entries: collisions,
        });
    }
    Ok(claimed)
}

/// Check whether adding `new_points` to `entry` would violate the
/// conflict-freedom invariant of `list`.
///
/// The outcome is independent of the order of `new_points`: every duplicate
/// is collected before deciding, and reported entries are sorted.
pub fn check_for_conflicts(
    list: &AppList,
    new_points: &[AccessPoint],
    entry: &AppEntry,
) -> DesktopResult<()> {
    // duplicates inside the proposal itself
    let mut proposed: BTreeMap<String, &AccessPoint> = BTreeMap::new();
    let mut inner: Vec<ConflictItem> = Vec::new();
    for point in new_points {
        for id in point.conflict_ids(&entry.capability_lists) {
            if let Some(first) = proposed.get(id.as_str()) {
                inner.push(item(&id, &entry.interface_uri, first));
                inner.push(item(&id, &entry.interface_uri, point));
            } else {
                proposed.insert(id, point);
            }
        }
    }
    if !inner.is_empty() {
        inner.sort();
        inner.dedup();
        return Err(DesktopError::Conflict {
            kind: ConflictKind::Inner,
            entries: inner,
        });
    }

    let existing = existing_conflict_ids(list)?;

    let mut collisions: Vec<ConflictItem> = Vec::new();
    for (id, point) in &proposed {
        if let Some((other_uri, other_point)) = existing.get(id.as_str()) {
            // re-integrating identical data over itself is not a conflict
            if *other_uri == entry.interface_uri && other_point == *point {
                continue;
            }
            collisions.push(item(id, other_uri, other_point));
            collisions.push(item(id, &entry.interface_uri, point));
        }
    }
    if !collisions.is_empty() {
        collisions.sort();
        collisions.dedup();
        return Err(DesktopError::Conflict {
            kind: ConflictKind::New,
            entries: collisions,
        });
    }
    Ok(())
}

impl PartialOrd for ConflictItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConflictItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.conflict_id, &self.interface_uri, &self.access_point).cmp(&(
            &other.conflict_id,
            &other.interface_uri,
            &other.access_point,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroinstall_schema::{AccessPointList, Capability, CapabilityList, DefaultKind};

    fn file_type_app(uri: &str, id: &str, ext: &str, integrated: bool) -> AppEntry {
        let mut entry = AppEntry::new(uri, uri);
        entry.capability_lists = vec![CapabilityList {
            os: None,
            entries: vec![Capability::FileType {
                id: id.to_owned(),
                extensions: vec![ext.to_owned()],
            }],
            unknown: Vec::new(),
        }];
        if integrated {
            entry.access_points = Some(AccessPointList {
                entries: vec![
                    AccessPoint::CapabilityRegistration,
                    AccessPoint::Default {
                        kind: DefaultKind::FileType,
                        capability: id.to_owned(),
                    },
                ],
                unknown: Vec::new(),
            });
        }
        entry
    }

    #[test]
    fn disjoint_points_pass() {
        let mut list = AppList::default();
        list.entries
            .push(file_type_app("https://a.example/app.xml", "a.txt", ".txt", true));
        let entry = file_type_app("https://b.example/app.xml", "b.md", ".md", false);
        let points = vec![
            AccessPoint::CapabilityRegistration,
            AccessPoint::Default {
                kind: DefaultKind::FileType,
                capability: "b.md".to_owned(),
            },
        ];
        check_for_conflicts(&list, &points, &entry).unwrap();
    }

    #[test]
    fn second_app_claiming_the_same_extension_is_a_new_conflict() {
        let mut list = AppList::default();
        list.entries.push(file_type_app(
            "https://a.example/app.xml",
            "myapp.txt",
            ".txt",
            true,
        ));

        let entry = file_type_app("https://b.example/app.xml", "myapp.txt", ".txt", false);
        let points = vec![
            AccessPoint::CapabilityRegistration,
            AccessPoint::Default {
                kind: DefaultKind::FileType,
                capability: "myapp.txt".to_owned(),
            },
        ];
        let err = check_for_conflicts(&list, &points, &entry).unwrap_err();
        match err {
            DesktopError::Conflict { kind, entries } => {
                assert_eq!(kind, ConflictKind::New);
                let uris: Vec<&str> =
                    entries.iter().map(|e| e.interface_uri.as_str()).collect();
                assert!(uris.contains(&"https://a.example/app.xml"));
                assert!(uris.contains(&"https://b.example/app.xml"));
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn conflict_detection_is_commutative_in_point_order() {
        let list = AppList::default();
        let entry = file_type_app("https://a.example/app.xml", "x", ".x", false);
        let alias_a = AccessPoint::AppAlias {
            name: "tool".into(),
            command: None,
        };
        let alias_b = AccessPoint::AppAlias {
            name: "tool".into(),
            command: Some("other".into()),
        };
        let menu = AccessPoint::MenuEntry {
            category: None,
            name: "Tool".into(),
        };

        let forward =
            check_for_conflicts(&list, &[alias_a.clone(), menu.clone(), alias_b.clone()], &entry)
                .unwrap_err();
        let backward =
            check_for_conflicts(&list, &[alias_b, menu, alias_a], &entry).unwrap_err();
        match (forward, backward) {
            (
                DesktopError::Conflict {
                    kind: k1,
                    entries: e1,
                },
                DesktopError::Conflict {
                    kind: k2,
                    entries: e2,
                },
            ) => {
                assert_eq!(k1, ConflictKind::Inner);
                assert_eq!(k2, ConflictKind::Inner);
                assert_eq!(e1, e2);
            }
            other => panic!("expected two conflicts, got {other:?}"),
        }
    }

    #[test]
    fn reintegrating_identical_data_is_not_a_conflict() {
        let mut list = AppList::default();
        let entry = file_type_app("https://a.example/app.xml", "a.txt", ".txt", true);
        list.entries.push(entry.clone());
        let points = entry.access_points.as_ref().unwrap().entries.clone();
        check_for_conflicts(&list, &points, &entry).unwrap();
    }

    #[test]
    fn broken_lists_surface_as_existing_conflicts() {
        let mut list = AppList::default();
        list.entries
            .push(file_type_app("https://a.example/app.xml", "same.txt", ".txt", true));
        list.entries
            .push(file_type_app("https://b.example/app.xml", "same.txt", ".txt", true));
        let entry = file_type_app("https://c.example/app.xml", "c.c", ".c", false);
        let err = check_for_conflicts(&list, &[], &entry).unwrap_err();
        assert!(matches!(
            err,
            DesktopError::Conflict {
                kind: ConflictKind::Existing,
                ..
            }
        ));
    }
}
