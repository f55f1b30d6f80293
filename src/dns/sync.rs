use std::collections::HashSet;
use std::sync::Arc;

use secp256k1::PublicKey;
use tracing::{debug, warn};

use crate::types::NodeRecord;

use super::linkcache::LinkCache;
use super::resolver::Resolver;
use super::tree::{subdomain_label_for_text, Entry};
use super::DnsError;

/// Maximum branch fan-out depth walked per tree, guarding against a
/// misconfigured or hostile zone serving an unbounded or cyclic branch
/// graph.
const MAX_DEPTH: usize = 16;

pub struct SyncResult {
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<(String, String)>,
    pub seq: u64,
}

/// Resolves and verifies a full EIP-1459 style tree rooted at
/// `root_domain`, signed by `expected_public_key`, returning every node
/// record discovered in its own `enr_root` subtree plus every `Link` entry
/// discovered in its `link_root` subtree (the caller decides whether to
/// follow those links into further [`sync_tree`] calls).
///
/// `last_known_seq`, when given, rejects a root whose `seq` has not
/// strictly increased since the last successful sync of this domain,
/// guarding against a stale or rolled-back zone being served to the
/// client.
pub async fn sync_tree(
    resolver: &dyn Resolver,
    root_domain: &str,
    expected_public_key: &PublicKey,
    last_known_seq: Option<u64>,
) -> Result<SyncResult, DnsError> {
    let root_text = fetch_entry_text(resolver, root_domain).await?;
    let root = match Entry::parse(&root_text)? {
        Entry::Root(root) => root,
        _ => return Err(DnsError::UnexpectedEntryKind(root_domain.to_string())),
    };
    root.verify(expected_public_key)
        .map_err(|_| DnsError::InvalidRootSignature(root_domain.to_string()))?;

    if let Some(last_seq) = last_known_seq {
        if root.seq < last_seq {
            return Err(DnsError::NonMonotonicSeq(root_domain.to_string()));
        }
    }

    let mut visited = HashSet::new();
    let mut nodes = Vec::new();
    walk_nodes_subtree(resolver, root_domain, &root.enr_root, &mut visited, &mut nodes, 0).await?;

    let mut visited_links = HashSet::new();
    let mut links = Vec::new();
    walk_links_subtree(
        resolver,
        root_domain,
        &root.link_root,
        &mut visited_links,
        &mut links,
        0,
    )
    .await?;

    Ok(SyncResult {
        nodes,
        links,
        seq: root.seq,
    })
}

async fn fetch_entry_text(resolver: &dyn Resolver, domain: &str) -> Result<String, DnsError> {
    let records = resolver.lookup_txt(domain).await?;
    records
        .into_iter()
        .next()
        .ok_or_else(|| DnsError::NotFound(domain.to_string()))
}

fn walk_nodes_subtree<'a>(
    resolver: &'a dyn Resolver,
    base_domain: &'a str,
    label: &'a str,
    visited: &'a mut HashSet<String>,
    nodes: &'a mut Vec<NodeRecord>,
    depth: usize,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DnsError>> + Send + 'a>> {
    Box::pin(async move {
        if depth > MAX_DEPTH || !visited.insert(label.to_string()) {
            return Ok(());
        }
        let domain = format!("{label}.{base_domain}");
        let text = fetch_entry_text(resolver, &domain).await?;
        if subdomain_label_for_text(&text) != label {
            return Err(DnsError::HashMismatch(domain));
        }
        match Entry::parse(&text)? {
            Entry::Branch(children) => {
                for child in children {
                    walk_nodes_subtree(resolver, base_domain, &child, visited, nodes, depth + 1)
                        .await?;
                }
            }
            Entry::Nodes(record) => nodes.push(record),
            Entry::Link { .. } => return Err(DnsError::LinkInNodesTree(domain)),
            Entry::Root(_) => {
                warn!(domain, "unexpected root entry nested inside nodes subtree");
            }
        }
        Ok(())
    })
}

fn walk_links_subtree<'a>(
    resolver: &'a dyn Resolver,
    base_domain: &'a str,
    label: &'a str,
    visited: &'a mut HashSet<String>,
    links: &'a mut Vec<(String, String)>,
    depth: usize,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DnsError>> + Send + 'a>> {
    Box::pin(async move {
        if depth > MAX_DEPTH || !visited.insert(label.to_string()) {
            return Ok(());
        }
        let domain = format!("{label}.{base_domain}");
        let text = fetch_entry_text(resolver, &domain).await?;
        if subdomain_label_for_text(&text) != label {
            return Err(DnsError::HashMismatch(domain));
        }
        match Entry::parse(&text)? {
            Entry::Branch(children) => {
                for child in children {
                    walk_links_subtree(resolver, base_domain, &child, visited, links, depth + 1)
                        .await?;
                }
            }
            Entry::Link { domain: target, .. } => links.push((base_domain.to_string(), target)),
            Entry::Nodes(_) => return Err(DnsError::NodesInLinkTree(domain)),
            Entry::Root(_) => {
                warn!(domain, "unexpected root entry nested inside link subtree");
            }
        }
        Ok(())
    })
}

/// Recursively follows discovered `Link` entries, bounded by the
/// [`LinkCache`]'s cycle rejection, accumulating every node record reached
/// transitively.
pub async fn sync_tree_recursive(
    resolver: &dyn Resolver,
    root_domain: &str,
    expected_public_key: &PublicKey,
    link_cache: &mut LinkCache,
    last_seqs: &mut std::collections::HashMap<String, u64>,
) -> Result<Vec<NodeRecord>, DnsError> {
    let mut all_nodes = Vec::new();
    let mut queue = vec![(root_domain.to_string(), *expected_public_key)];
    let mut seen_domains = HashSet::new();

    while let Some((domain, public_key)) = queue.pop() {
        if !seen_domains.insert(domain.clone()) {
            continue;
        }
        debug!(domain, "syncing dns tree");
        let last_seq = last_seqs.get(&domain).copied();
        let result = sync_tree(resolver, &domain, &public_key, last_seq).await?;
        last_seqs.insert(domain.clone(), result.seq);
        all_nodes.extend(result.nodes);

        for (from, to_domain) in result.links {
            if link_cache.add_link(&from, &to_domain) {
                // Linked trees carry their own root signature keyed by a
                // public key embedded in the `Link` entry itself, which the
                // caller must already know to trust; this loop assumes the
                // same key as the parent tree when none is supplied.
                queue.push((to_domain, public_key));
            }
        }
    }

    Ok(all_nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resolver::MockResolver;
    use crate::dns::tree::RootRecord;
    use secp256k1::SecretKey;

    fn make_tree(resolver: &MockResolver, domain: &str, secret_key: &SecretKey, seq: u64, node_entries: Vec<Entry>) {
        let node_labels: Vec<String> = node_entries
            .iter()
            .map(|entry| {
                let label = entry.subdomain_label();
                resolver.insert(&format!("{label}.{domain}"), vec![entry.to_text()]);
                label
            })
            .collect();
        let branch = Entry::Branch(node_labels);
        let branch_label = branch.subdomain_label();
        resolver.insert(&format!("{branch_label}.{domain}"), vec![branch.to_text()]);

        let link_branch = Entry::Branch(vec![]);
        let link_branch_label = link_branch.subdomain_label();
        resolver.insert(
            &format!("{link_branch_label}.{domain}"),
            vec![link_branch.to_text()],
        );

        let root = RootRecord::sign(&branch_label, &link_branch_label, seq, secret_key);
        resolver.insert(domain, vec![Entry::Root(root).to_text()]);
    }

    #[tokio::test]
    async fn sync_tree_resolves_node_entries() {
        let resolver = MockResolver::new();
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let public_key = PublicKey::from_secret_key(secp256k1::SECP256K1, &secret_key);

        let record: NodeRecord = "node://0202020202020202020202020202020202020202020202020202020202020202@127.0.0.1:8001?discport=8002"
            .parse()
            .unwrap();
        make_tree(&resolver, "nodes.example.org", &secret_key, 1, vec![Entry::Nodes(record.clone())]);

        let result = sync_tree(&resolver, "nodes.example.org", &public_key, None)
            .await
            .unwrap();
        assert_eq!(result.nodes, vec![record]);
        assert_eq!(result.seq, 1);
    }

    #[tokio::test]
    async fn sync_tree_rejects_wrong_signer() {
        let resolver = MockResolver::new();
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let wrong_secret_key = SecretKey::from_slice(&[8u8; 32]).unwrap();
        let wrong_public_key = PublicKey::from_secret_key(secp256k1::SECP256K1, &wrong_secret_key);

        make_tree(&resolver, "nodes.example.org", &secret_key, 1, vec![]);

        let result = sync_tree(&resolver, "nodes.example.org", &wrong_public_key, None).await;
        assert!(matches!(result, Err(DnsError::InvalidRootSignature(_))));
    }

    #[tokio::test]
    async fn sync_tree_rejects_non_monotonic_seq() {
        let resolver = MockResolver::new();
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let public_key = PublicKey::from_secret_key(secp256k1::SECP256K1, &secret_key);

        make_tree(&resolver, "nodes.example.org", &secret_key, 1, vec![]);

        let result = sync_tree(&resolver, "nodes.example.org", &public_key, Some(2)).await;
        assert!(matches!(result, Err(DnsError::NonMonotonicSeq(_))));
    }

    #[tokio::test]
    async fn sync_tree_rejects_corrupted_entry_body() {
        let resolver = MockResolver::new();
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let public_key = PublicKey::from_secret_key(secp256k1::SECP256K1, &secret_key);

        let record: NodeRecord = "node://0202020202020202020202020202020202020202020202020202020202020202@127.0.0.1:8001?discport=8002"
            .parse()
            .unwrap();
        let node_entry = Entry::Nodes(record);
        let node_label = node_entry.subdomain_label();
        make_tree(&resolver, "nodes.example.org", &secret_key, 1, vec![node_entry]);

        // Overwrite the published body at the node leaf's own label with
        // different bytes, so its hash no longer matches that label.
        resolver.insert(
            &format!("{node_label}.nodes.example.org"),
            vec![Entry::Branch(vec![]).to_text()],
        );

        let result = sync_tree(&resolver, "nodes.example.org", &public_key, None).await;
        assert!(matches!(result, Err(DnsError::HashMismatch(_))));
    }
}
