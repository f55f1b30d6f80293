use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use super::DnsError;

/// DNS TXT record lookup, abstracted so tree traversal can be tested
/// against a fixed in-memory zone instead of the network, replacing the
/// reflection-based mock switch named as a redesign target with a trait
/// object chosen once at startup.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>, DnsError>;
}

/// Production resolver backed by `hickory-resolver`.
pub struct HickoryDnsResolver {
    inner: TokioAsyncResolver,
}

impl HickoryDnsResolver {
    pub fn from_system_config() -> Result<Self, DnsError> {
        let inner = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Ok(Self { inner })
    }
}

#[async_trait]
impl Resolver for HickoryDnsResolver {
    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let lookup = self
            .inner
            .txt_lookup(domain)
            .await
            .map_err(|e| DnsError::Lookup(e.to_string()))?;
        Ok(lookup
            .iter()
            .map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect())
    }
}

/// Fixed in-memory zone for tests and local development, keyed by full
/// domain name (including the tree's root domain suffix).
#[derive(Default)]
pub struct MockResolver {
    zone: Mutex<HashMap<String, Vec<String>>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, domain: &str, txt_records: Vec<String>) {
        self.zone
            .lock()
            .expect("mock resolver mutex poisoned")
            .insert(domain.to_string(), txt_records);
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        self.zone
            .lock()
            .expect("mock resolver mutex poisoned")
            .get(domain)
            .cloned()
            .ok_or_else(|| DnsError::NotFound(domain.to_string()))
    }
}
