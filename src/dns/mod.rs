pub mod iterator;
pub mod linkcache;
pub mod publish;
pub mod resolver;
pub mod sync;
pub mod tree;

use thiserror::Error;

use tree::TreeError;

pub use iterator::RandomIterator;
pub use linkcache::LinkCache;
pub use resolver::{HickoryDnsResolver, MockResolver, Resolver};
pub use sync::{sync_tree, sync_tree_recursive, SyncResult};
pub use tree::Entry;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("dns lookup failed: {0}")]
    Lookup(String),
    #[error("no txt record found for {0}")]
    NotFound(String),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("entry at {0} was not the expected kind")]
    UnexpectedEntryKind(String),
    #[error("root signature at {0} did not verify")]
    InvalidRootSignature(String),
    #[error("root seq at {0} is not greater than the last observed seq")]
    NonMonotonicSeq(String),
    #[error("entry at {0} does not hash to the label it was resolved under")]
    HashMismatch(String),
    #[error("a nodes leaf appeared under the link subtree at {0}")]
    NodesInLinkTree(String),
    #[error("a link leaf appeared under the nodes subtree at {0}")]
    LinkInNodesTree(String),
}
