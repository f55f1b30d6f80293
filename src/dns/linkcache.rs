use std::collections::{HashMap, HashSet};

/// Tracks which trees reference which other trees via `Link` entries, so a
/// cycle (tree A links to B links back to A) can be detected and so a
/// change to one tree's root can be attributed back to every tree that
/// transitively links to it — the same bookkeeping go-ethereum's
/// `p2p/dnsdisc` package keeps in its own link cache.
#[derive(Default)]
pub struct LinkCache {
    /// domain -> set of domains it links to
    forward: HashMap<String, HashSet<String>>,
    /// domain -> set of domains that link to it
    reverse: HashMap<String, HashSet<String>>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `from` links to `to`. Returns `false` (and does not
    /// record the edge) if adding it would create a cycle.
    pub fn add_link(&mut self, from: &str, to: &str) -> bool {
        if from == to || self.reaches(to, from) {
            return false;
        }
        self.forward
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.reverse
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
        true
    }

    /// Whether `from` can reach `to` by following zero or more recorded
    /// links.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![from.to_string()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.clone()) {
                continue;
            }
            if let Some(children) = self.forward.get(&node) {
                if children.contains(to) {
                    return true;
                }
                stack.extend(children.iter().cloned());
            }
        }
        false
    }

    pub fn referrers_of(&self, domain: &str) -> Vec<String> {
        self.reverse
            .get(domain)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove_domain(&mut self, domain: &str) {
        if let Some(children) = self.forward.remove(domain) {
            for child in children {
                if let Some(parents) = self.reverse.get_mut(&child) {
                    parents.remove(domain);
                }
            }
        }
        if let Some(parents) = self.reverse.remove(domain) {
            for parent in parents {
                if let Some(children) = self.forward.get_mut(&parent) {
                    children.remove(domain);
                }
            }
        }
    }

    /// Removes every link `parent -> child` for `child` not in `keep`, then
    /// recursively drops any child whose back-reference set becomes empty
    /// as a result, garbage-collecting subtrees no longer reachable from
    /// any live root. Mirrors the `LinkCache.resetLinks` bookkeeping named
    /// for the DNS discovery component.
    pub fn reset_links(&mut self, parent: &str, keep: &HashSet<String>) {
        let Some(children) = self.forward.get_mut(parent) else {
            return;
        };
        let stale: Vec<String> = children.iter().filter(|c| !keep.contains(*c)).cloned().collect();
        for child in &stale {
            children.remove(child);
        }
        for child in stale {
            let orphaned = match self.reverse.get_mut(&child) {
                Some(parents) => {
                    parents.remove(parent);
                    parents.is_empty()
                }
                None => false,
            };
            if orphaned {
                self.reverse.remove(&child);
                let grandchildren: HashSet<String> = HashSet::new();
                self.reset_links(&child, &grandchildren);
                self.forward.remove(&child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_link_records_forward_and_reverse_edges() {
        let mut cache = LinkCache::new();
        assert!(cache.add_link("a.example.org", "b.example.org"));
        assert!(cache.reaches("a.example.org", "b.example.org"));
        assert_eq!(
            cache.referrers_of("b.example.org"),
            vec!["a.example.org".to_string()]
        );
    }

    #[test]
    fn add_link_rejects_cycles() {
        let mut cache = LinkCache::new();
        assert!(cache.add_link("a.example.org", "b.example.org"));
        assert!(cache.add_link("b.example.org", "c.example.org"));
        assert!(!cache.add_link("c.example.org", "a.example.org"));
    }

    #[test]
    fn reset_links_prunes_dropped_children_and_orphaned_grandchildren() {
        let mut cache = LinkCache::new();
        cache.add_link("root", "a");
        cache.add_link("root", "b");
        cache.add_link("a", "c");

        let keep: HashSet<String> = ["a".to_string()].into_iter().collect();
        cache.reset_links("root", &keep);

        assert!(cache.reaches("root", "a"));
        assert!(!cache.reaches("root", "b"));
        // "c" is still referenced by "a", which root kept, so it survives.
        assert!(cache.reaches("a", "c"));
    }

    #[test]
    fn reset_links_recursively_drops_orphaned_subtree() {
        let mut cache = LinkCache::new();
        cache.add_link("root", "a");
        cache.add_link("a", "b");

        let empty: HashSet<String> = HashSet::new();
        cache.reset_links("root", &empty);

        assert!(!cache.reaches("root", "a"));
        assert!(cache.referrers_of("b").is_empty());
    }

    #[test]
    fn remove_domain_drops_its_edges() {
        let mut cache = LinkCache::new();
        cache.add_link("a.example.org", "b.example.org");
        cache.remove_domain("a.example.org");
        assert!(!cache.reaches("a.example.org", "b.example.org"));
        assert!(cache.referrers_of("b.example.org").is_empty());
    }
}
