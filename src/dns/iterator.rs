use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use secp256k1::PublicKey;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::types::NodeRecord;

use super::linkcache::LinkCache;
use super::resolver::Resolver;
use super::sync::sync_tree_recursive;

/// Holds the most recent snapshot of node records discovered from a tree
/// and a background task that periodically refreshes it, handing out
/// random entries to callers the way the discovery iterator named for DNS
/// discovery is described to behave.
pub struct RandomIterator {
    snapshot: RwLock<Vec<NodeRecord>>,
}

impl RandomIterator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(Vec::new()),
        })
    }

    pub async fn next(&self) -> Option<NodeRecord> {
        let snapshot = self.snapshot.read().await;
        snapshot.choose(&mut rand::thread_rng()).cloned()
    }

    pub async fn snapshot(&self) -> Vec<NodeRecord> {
        self.snapshot.read().await.clone()
    }

    async fn replace(&self, nodes: Vec<NodeRecord>) {
        *self.snapshot.write().await = nodes;
    }
}

/// Drives [`RandomIterator`] by periodically re-syncing `root_domain`
/// against `resolver` and swapping in the freshly resolved node set.
pub async fn run_refresh_loop(
    iterator: Arc<RandomIterator>,
    resolver: Arc<dyn Resolver>,
    root_domain: String,
    public_key: PublicKey,
    refresh_interval: Duration,
) {
    let mut ticker = tokio::time::interval(refresh_interval);
    let mut link_cache = LinkCache::new();
    let mut last_seqs = std::collections::HashMap::new();
    loop {
        ticker.tick().await;
        match sync_tree_recursive(
            resolver.as_ref(),
            &root_domain,
            &public_key,
            &mut link_cache,
            &mut last_seqs,
        )
        .await
        {
            Ok(nodes) => {
                debug!(count = nodes.len(), root_domain, "dns tree refreshed");
                iterator.replace(nodes).await;
            }
            Err(err) => {
                warn!(error = %err, root_domain, "dns tree refresh failed");
            }
        }
    }
}

