use std::collections::HashMap;

use async_trait::async_trait;

use crate::message::ReasonCode;
use crate::types::NodeId;

/// Application-facing event sink, implemented once by the embedder and
/// handed to the orchestrator, replacing the sum-type-plus-handler-map
/// pairing noted as a redesign target with a single trait object.
#[async_trait]
pub trait Events: Send + Sync {
    async fn on_connect(&self, peer: NodeId) {
        let _ = peer;
    }

    async fn on_disconnect(&self, peer: NodeId, reason: ReasonCode) {
        let _ = (peer, reason);
    }

    async fn on_message(&self, peer: NodeId, type_id: u8, payload: Vec<u8>) {
        let _ = (peer, type_id, payload);
    }
}

/// Default, inert event sink used when an embedder has not wired a handler
/// yet; every callback is a no-op.
pub struct NullEvents;

#[async_trait]
impl Events for NullEvents {}

/// Per-message-type handler trait, for embedders that prefer to register
/// individual handlers instead of matching on `type_id` inside a single
/// [`Events::on_message`] implementation.
#[async_trait]
pub trait AppMessageHandler: Send + Sync {
    async fn handle(&self, peer: NodeId, payload: Vec<u8>);
}

/// Dispatch table from application message type id to handler, used by
/// embedders that opt into [`AppMessageHandler`] instead of a monolithic
/// [`Events`] impl.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<u8, Box<dyn AppMessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, type_id: u8, handler: Box<dyn AppMessageHandler>) {
        self.handlers.insert(type_id, handler);
    }

    pub async fn dispatch(&self, type_id: u8, peer: NodeId, payload: Vec<u8>) -> bool {
        if let Some(handler) = self.handlers.get(&type_id) {
            handler.handle(peer, payload).await;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Events for HandlerRegistry {
    async fn on_message(&self, peer: NodeId, type_id: u8, payload: Vec<u8>) {
        self.dispatch(type_id, peer, payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl AppMessageHandler for CountingHandler {
        async fn handle(&self, _peer: NodeId, _payload: Vec<u8>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn registry_dispatches_registered_type_and_ignores_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(0x10, Box::new(CountingHandler(counter.clone())));

        let dispatched = registry.dispatch(0x10, NodeId([0u8; 32]), vec![]).await;
        assert!(dispatched);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let dispatched_unknown = registry.dispatch(0x11, NodeId([0u8; 32]), vec![]).await;
        assert!(!dispatched_unknown);
    }
}
