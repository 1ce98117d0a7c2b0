//! WebSocket connection tracking.
//!
//! - `WsConnectionManager`: tracks live relay connections and their topic count
//! - `ConnectionGuard`: RAII guard that unregisters a connection on drop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-connection bookkeeping.
#[derive(Default)]
struct ConnectionState {
    subscriptions: usize,
}

/// Manages all active relay connections.
///
/// Force-closing goes through a global cancellation token whose children are
/// handed to each connection.
pub struct WsConnectionManager {
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Replaced after `close_all()` so new connections are still accepted.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new connection and returns its guard.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.connections
            .insert(conn_id.clone(), ConnectionState::default());
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            conn_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if self.connections.remove(id).is_some() {
            log::info!(
                "[WS] Connection unregistered: {} (remaining: {})",
                id,
                self.connections.len()
            );
        }
    }

    fn set_subscriptions(&self, id: &str, count: usize) {
        if let Some(mut state) = self.connections.get_mut(id) {
            state.subscriptions = count;
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Total topic subscriptions across all connections.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().subscriptions)
            .sum()
    }

    /// Force-closes all connections.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters a connection when dropped, even if the handler exits early.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when the manager force-closes connections.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Records how many topics this connection listens to.
    pub fn set_subscriptions(&self, count: usize) {
        self.manager.set_subscriptions(&self.id, count);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_unregisters() {
        let manager = Arc::new(WsConnectionManager::new());
        let first = manager.register();
        let second = manager.register();
        first.set_subscriptions(2);
        second.set_subscriptions(1);
        assert_eq!(manager.connection_count(), 2);
        assert_eq!(manager.subscription_count(), 3);

        drop(first);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.subscription_count(), 1);
    }

    #[test]
    fn close_all_cancels_existing_connections_only() {
        let manager = Arc::new(WsConnectionManager::new());
        let old = manager.register();
        assert_eq!(manager.close_all(), 1);
        assert!(old.cancel_token().is_cancelled());

        let fresh = manager.register();
        assert!(!fresh.cancel_token().is_cancelled());
    }
}
