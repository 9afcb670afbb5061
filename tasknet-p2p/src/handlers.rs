//! Per-role handlers run when a peer completes its handshake.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::peer::{Peer, PeerType};

/// Application logic for newly established peers of one role.
///
/// Returning an error aborts the peer's connection.
#[async_trait]
pub trait PeerHandler: Send + Sync {
    /// Called once per established session.
    async fn on_peer(&self, peer: Peer) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`PeerHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Peer) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> PeerHandler for FnHandler<F>
where
    F: Fn(Peer) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_peer(&self, peer: Peer) -> anyhow::Result<()> {
        (self.0)(peer).await
    }
}

/// Handlers keyed by peer role. The first registration for a role wins.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<(PeerType, Arc<dyn PeerHandler>)>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `peer_type`.
    pub fn register(&mut self, peer_type: PeerType, handler: Arc<dyn PeerHandler>) {
        if self.handlers.iter().any(|(t, _)| t == &peer_type) {
            tracing::warn!(peer_type = %peer_type, "Handler already registered, ignoring");
            return;
        }
        self.handlers.push((peer_type, handler));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, peer_type: PeerType, handler: impl PeerHandler + 'static) -> Self {
        self.register(peer_type, Arc::new(handler));
        self
    }

    /// The handler for `peer_type`, if any.
    pub fn find(&self, peer_type: &PeerType) -> Option<Arc<dyn PeerHandler>> {
        self.handlers
            .iter()
            .find(|(t, _)| t == peer_type)
            .map(|(_, handler)| handler.clone())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
