use std::collections::BTreeMap;

use thiserror::Error;

/// A single TXT-record change a provider-agnostic publisher must apply to
/// move a hosted zone from its currently observed state to a newly built
/// tree, named for the delta algorithm described for the DNS-tree
/// discovery component's publishing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Create { name: String, value: String },
    Upsert { name: String, value: String },
    Delete { name: String },
}

impl Change {
    fn name(&self) -> &str {
        match self {
            Change::Create { name, .. } => name,
            Change::Upsert { name, .. } => name,
            Change::Delete { name } => name,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Change::Create { .. } => 0,
            Change::Upsert { .. } => 1,
            Change::Delete { .. } => 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("delta of {changed} records exceeds {max_fraction} of the {existing}-record zone")]
    DeltaTooLarge {
        changed: usize,
        existing: usize,
        max_fraction: f64,
    },
}

/// Computes the ordered list of zone changes needed to move `previous`
/// (the zone's currently observed TXT records, name -> value) to `target`
/// (the newly built tree's TXT records), refusing to return a delta larger
/// than `max_fraction` of the previous zone's size so a misconfigured
/// rebuild cannot silently nuke an entire live tree.
///
/// Ordering is fixed: every `Create` precedes every `Upsert`, which
/// precedes every `Delete`; within a group, entries are ordered
/// alphabetically by record name, matching the fixed apply order named
/// for the publishing collaborator.
pub fn compute_delta(
    previous: &BTreeMap<String, String>,
    target: &BTreeMap<String, String>,
    max_fraction: f64,
) -> Result<Vec<Change>, PublishError> {
    let mut changes = Vec::new();

    for (name, value) in target {
        match previous.get(name) {
            None => changes.push(Change::Create {
                name: name.clone(),
                value: value.clone(),
            }),
            Some(old_value) if old_value != value => changes.push(Change::Upsert {
                name: name.clone(),
                value: value.clone(),
            }),
            Some(_) => {}
        }
    }
    for name in previous.keys() {
        if !target.contains_key(name) {
            changes.push(Change::Delete { name: name.clone() });
        }
    }

    if !previous.is_empty() {
        let max_changes = (previous.len() as f64 * max_fraction).ceil() as usize;
        if changes.len() > max_changes {
            return Err(PublishError::DeltaTooLarge {
                changed: changes.len(),
                existing: previous.len(),
                max_fraction,
            });
        }
    }

    changes.sort_by(|a, b| a.rank().cmp(&b.rank()).then_with(|| a.name().cmp(b.name())));
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn delta_is_empty_for_identical_zones() {
        let zone = zone(&[("a.example.org", "v1")]);
        let delta = compute_delta(&zone, &zone, 1.0).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn delta_creates_upserts_and_deletes_in_fixed_order() {
        let previous = zone(&[("b.example.org", "old"), ("c.example.org", "same")]);
        let target = zone(&[
            ("a.example.org", "new"),
            ("b.example.org", "changed"),
            ("c.example.org", "same"),
        ]);

        let delta = compute_delta(&previous, &target, 1.0).unwrap();
        assert_eq!(
            delta,
            vec![
                Change::Create {
                    name: "a.example.org".to_string(),
                    value: "new".to_string()
                },
                Change::Upsert {
                    name: "b.example.org".to_string(),
                    value: "changed".to_string()
                },
            ]
        );
    }

    #[test]
    fn delta_orders_deletes_after_creates_and_upserts() {
        let previous = zone(&[("old.example.org", "v1")]);
        let target = zone(&[("new.example.org", "v1")]);

        let delta = compute_delta(&previous, &target, 1.0).unwrap();
        assert_eq!(
            delta,
            vec![
                Change::Create {
                    name: "new.example.org".to_string(),
                    value: "v1".to_string()
                },
                Change::Delete {
                    name: "old.example.org".to_string()
                },
            ]
        );
    }

    #[test]
    fn delta_rejects_changes_beyond_max_fraction() {
        let previous = zone(&[
            ("a.example.org", "v1"),
            ("b.example.org", "v2"),
            ("c.example.org", "v3"),
            ("d.example.org", "v4"),
        ]);
        let target = zone(&[]);

        let result = compute_delta(&previous, &target, 0.5);
        assert!(matches!(result, Err(PublishError::DeltaTooLarge { .. })));
    }

    #[test]
    fn delta_within_max_fraction_is_accepted() {
        let previous = zone(&[
            ("a.example.org", "v1"),
            ("b.example.org", "v2"),
            ("c.example.org", "v3"),
            ("d.example.org", "v4"),
        ]);
        let mut target = previous.clone();
        target.remove("a.example.org");

        let delta = compute_delta(&previous, &target, 0.5).unwrap();
        assert_eq!(delta, vec![Change::Delete { name: "a.example.org".to_string() }]);
    }
}
