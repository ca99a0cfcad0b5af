//! Diff between the known object set and a fresh listing.

use std::collections::HashMap;

use stowage_core::StorageObject;

/// Partition of a fresh listing against the previously known objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectSetDiff {
    /// In the listing but not known. Carries the listed modification time.
    pub added: Vec<StorageObject>,
    /// Known but no longer listed. Carries the known modification time.
    pub removed: Vec<StorageObject>,
    /// Listed under a known path with a different modification time.
    pub updated: Vec<StorageObject>,
}

impl ObjectSetDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Total number of changed objects.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.updated.len()
    }
}

/// Compare `known` with `current` by path and modification time.
///
/// Pure and linear in the input sizes. `added` and `updated` follow the order
/// of `current`, `removed` follows the order of `known`. A rewrite that keeps
/// the same modification time is not detected.
pub fn diff_objects(known: &[StorageObject], current: &[StorageObject]) -> ObjectSetDiff {
    let known_by_path: HashMap<&str, &StorageObject> =
        known.iter().map(|o| (o.path.as_str(), o)).collect();
    let current_by_path: HashMap<&str, &StorageObject> =
        current.iter().map(|o| (o.path.as_str(), o)).collect();

    let mut diff = ObjectSetDiff::default();

    for object in current {
        match known_by_path.get(object.path.as_str()) {
            None => diff.added.push(object.clone()),
            Some(previous) if previous.last_modified != object.last_modified => {
                diff.updated.push(object.clone())
            }
            Some(_) => {}
        }
    }

    for object in known {
        if !current_by_path.contains_key(object.path.as_str()) {
            diff.removed.push(object.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashSet};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn obj(path: &str, secs: i64) -> StorageObject {
        StorageObject::new(path, at(secs))
    }

    #[test]
    fn test_empty_known_is_all_added() {
        let current = vec![obj("a.tgz", 1), obj("b.tgz", 2)];
        let diff = diff_objects(&[], &current);
        assert_eq!(diff.added, current);
        assert!(diff.removed.is_empty());
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn test_empty_current_is_all_removed() {
        let known = vec![obj("a.tgz", 1), obj("b.tgz", 2)];
        let diff = diff_objects(&known, &[]);
        assert_eq!(diff.removed, known);
        assert!(diff.added.is_empty());
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn test_mixed_changes() {
        let known = vec![obj("keep.tgz", 1), obj("gone.tgz", 1), obj("changed.tgz", 1)];
        let current = vec![obj("changed.tgz", 2), obj("keep.tgz", 1), obj("new.tgz", 3)];

        let diff = diff_objects(&known, &current);

        assert_eq!(diff.added, vec![obj("new.tgz", 3)]);
        assert_eq!(diff.removed, vec![obj("gone.tgz", 1)]);
        assert_eq!(diff.updated, vec![obj("changed.tgz", 2)]);
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn test_same_mtime_rewrite_is_invisible() {
        let known = vec![obj("a.tgz", 1)];
        let current = vec![obj("a.tgz", 1)];
        assert!(diff_objects(&known, &current).is_empty());
    }

    fn listing_strategy() -> impl Strategy<Value = Vec<StorageObject>> {
        prop::collection::btree_map("[a-f]{1,2}\\.tgz", 0i64..3, 0..12).prop_map(
            |map: BTreeMap<String, i64>| {
                map.into_iter()
                    .map(|(path, secs)| obj(&path, secs))
                    .collect()
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: the diff partitions both listings exactly.
        ///
        /// Every current path is either added, updated or unchanged. Every
        /// known path missing from the listing is removed, and nothing else is.
        #[test]
        fn prop_diff_partitions_listing(
            known in listing_strategy(),
            current in listing_strategy(),
        ) {
            let diff = diff_objects(&known, &current);

            let known_map: BTreeMap<&str, DateTime<Utc>> =
                known.iter().map(|o| (o.path.as_str(), o.last_modified)).collect();
            let current_paths: HashSet<&str> = current.iter().map(|o| o.path.as_str()).collect();

            let added: HashSet<&str> = diff.added.iter().map(|o| o.path.as_str()).collect();
            let updated: HashSet<&str> = diff.updated.iter().map(|o| o.path.as_str()).collect();
            let removed: HashSet<&str> = diff.removed.iter().map(|o| o.path.as_str()).collect();

            prop_assert!(added.is_disjoint(&updated));

            for object in &current {
                let path = object.path.as_str();
                match known_map.get(path) {
                    None => prop_assert!(added.contains(path)),
                    Some(mtime) if *mtime != object.last_modified => {
                        prop_assert!(updated.contains(path))
                    }
                    Some(_) => {
                        prop_assert!(!added.contains(path) && !updated.contains(path))
                    }
                }
            }

            for path in known_map.keys() {
                prop_assert_eq!(removed.contains(path), !current_paths.contains(path));
            }
        }

        /// Property: applying the diff to the known set yields the listing.
        #[test]
        fn prop_diff_applies_to_current(
            known in listing_strategy(),
            current in listing_strategy(),
        ) {
            let diff = diff_objects(&known, &current);

            let mut state: BTreeMap<String, DateTime<Utc>> =
                known.iter().map(|o| (o.path.clone(), o.last_modified)).collect();
            for object in &diff.removed {
                state.remove(&object.path);
            }
            for object in diff.added.iter().chain(diff.updated.iter()) {
                state.insert(object.path.clone(), object.last_modified);
            }

            let expected: BTreeMap<String, DateTime<Utc>> =
                current.iter().map(|o| (o.path.clone(), o.last_modified)).collect();
            prop_assert_eq!(state, expected);
        }

        /// Property: a listing diffed against itself is empty.
        #[test]
        fn prop_self_diff_is_empty(listing in listing_strategy()) {
            prop_assert!(diff_objects(&listing, &listing).is_empty());
        }
    }
}
