//! Server session registry.
//!
//! The only structure shared between connection tasks. Each accepted
//! connection registers on arrival and unregisters during teardown; the
//! registry also carries a control channel per session so the server can
//! close sessions it does not own.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Identifier of a registered session
pub type SessionId = u64;

/// Control messages delivered to a session task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Close the connection and tear the session down
    Close,
}

/// Registry entry for one live session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Remote address
    pub peer: String,
    /// Accept time
    pub connected_at: Instant,
    control: mpsc::UnboundedSender<SessionCommand>,
}

/// Concurrent map of live sessions
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionInfo>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new session, returning its id and control receiver
    pub fn register(
        &self,
        peer: impl Into<String>,
    ) -> (SessionId, mpsc::UnboundedReceiver<SessionCommand>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (control, commands) = mpsc::unbounded_channel();
        let info = SessionInfo {
            peer: peer.into(),
            connected_at: Instant::now(),
            control,
        };

        info!(component = "registry", "Registered session {} for {}", id, info.peer);
        self.sessions.insert(id, info);
        (id, commands)
    }

    /// Remove a session. Returns `true` only for the call that removed it.
    pub fn unregister(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, info)) => {
                info!(
                    component = "registry",
                    "Unregistered session {} for {} after {:?}",
                    id,
                    info.peer,
                    info.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Ask a session to close. Returns `false` if it is not registered.
    pub fn close(&self, id: SessionId) -> bool {
        match self.sessions.get(&id) {
            Some(info) => info.control.send(SessionCommand::Close).is_ok(),
            None => false,
        }
    }

    /// Ask every session to close, returning how many were signalled
    pub fn close_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.sessions.iter() {
            if entry.control.send(SessionCommand::Close).is_ok() {
                signalled += 1;
            } else {
                debug!(component = "registry", "Session {} already gone", entry.key());
            }
        }
        signalled
    }

    /// Whether a session is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Snapshot of one session
    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of `(id, peer)` for every live session
    pub fn peers(&self) -> Vec<(SessionId, String)> {
        let mut peers: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.peer.clone()))
            .collect();
        peers.sort_unstable_by_key(|(id, _)| *id);
        peers
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_unregister_once() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = registry.register("10.0.0.1:4000");
        let (b, _rx_b) = registry.register("10.0.0.2:4000");
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(a).unwrap().peer, "10.0.0.1:4000");

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert!(!registry.contains(a));
        assert_eq!(registry.peers(), vec![(b, "10.0.0.2:4000".to_string())]);
    }

    #[tokio::test]
    async fn test_close_signals_session() {
        let registry = SessionRegistry::new();
        let (id, mut commands) = registry.register("peer");
        let (_other, mut other_commands) = registry.register("other");

        assert!(registry.close(id));
        assert_eq!(commands.recv().await, Some(SessionCommand::Close));

        assert_eq!(registry.close_all(), 2);
        assert_eq!(commands.recv().await, Some(SessionCommand::Close));
        assert_eq!(other_commands.recv().await, Some(SessionCommand::Close));

        registry.unregister(id);
        assert!(!registry.close(id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_and_remove() {
        let registry = Arc::new(SessionRegistry::new());

        let mut handles = Vec::new();
        for task in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for n in 0..50 {
                    let (id, _rx) = registry.register(format!("peer-{}-{}", task, n));
                    ids.push(id);
                }
                ids.into_iter().filter(|id| registry.unregister(*id)).count()
            }));
        }

        let mut removed = 0;
        for handle in handles {
            removed += handle.await.unwrap();
        }
        assert_eq!(removed, 32 * 50);
        assert!(registry.is_empty());
    }
}
