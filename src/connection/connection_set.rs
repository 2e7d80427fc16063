use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::connection::handle::{ConnectionHandle, ConnectionId};
use crate::frame::protocol_version::ResumeToken;

struct ConnectionEntry {
    handle: ConnectionHandle,
    token: Option<ResumeToken>,
}

#[derive(Default)]
struct Connections {
    by_id: FxHashMap<ConnectionId, ConnectionEntry>,
    by_token: FxHashMap<ResumeToken, ConnectionId>,
}

/// The live connections of a server, indexed by resume token so that a RESUME on a new transport
///  can be routed to its session. Connections remove themselves when they terminate.
#[derive(Default)]
pub struct ConnectionSet {
    connections: RwLock<Connections>,
}

impl ConnectionSet {
    pub fn new() -> ConnectionSet {
        Default::default()
    }

    /// Returns `false` without inserting anything if the resume token already belongs to another
    ///  live connection.
    pub async fn insert(&self, handle: ConnectionHandle, token: Option<ResumeToken>) -> bool {
        let mut connections = self.connections.write().await;
        let id = handle.id();
        if let Some(token) = &token {
            if let Some(owner) = connections.by_token.get(token) {
                debug!("resume token {} already belongs to {}", token, owner);
                return false;
            }
            connections.by_token.insert(token.clone(), id);
        }
        connections.by_id.insert(id, ConnectionEntry { handle, token });
        true
    }

    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.by_id.remove(&id) {
            Some(entry) => {
                if let Some(token) = entry.token {
                    if connections.by_token.get(&token) == Some(&id) {
                        connections.by_token.remove(&token);
                    }
                }
                true
            }
            None => false,
        }
    }

    pub async fn find_by_token(&self, token: &ResumeToken) -> Option<ConnectionHandle> {
        let connections = self.connections.read().await;
        connections.by_token.get(token)
            .and_then(|id| connections.by_id.get(id))
            .map(|e| e.handle.clone())
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Asks every connection to close. Connections remove themselves once they are closed.
    pub async fn close_all(&self, reason: &str) {
        let handles = self.connections.read().await.by_id.values()
            .map(|e| e.handle.clone())
            .collect::<Vec<_>>();

        info!("closing {} connections: {}", handles.len(), reason);
        for handle in handles {
            if let Err(e) = handle.close(reason) {
                debug!("{}", e);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::ConnectionCommand;
    use bytes::Bytes;

    fn token(s: &'static str) -> ResumeToken {
        ResumeToken(Bytes::from_static(s.as_bytes()))
    }

    #[tokio::test]
    async fn test_find_by_token() {
        let set = ConnectionSet::new();
        let (a, _ra) = ConnectionHandle::new();
        let (b, _rb) = ConnectionHandle::new();
        set.insert(a.clone(), Some(token("a"))).await;
        set.insert(b.clone(), None).await;

        assert_eq!(set.len().await, 2);
        assert_eq!(set.find_by_token(&token("a")).await.map(|h| h.id()), Some(a.id()));
        assert!(set.find_by_token(&token("b")).await.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let set = ConnectionSet::new();
        let (a, _ra) = ConnectionHandle::new();
        set.insert(a.clone(), Some(token("a"))).await;

        assert!(set.remove(a.id()).await);
        assert!(!set.remove(a.id()).await);
        assert!(set.is_empty().await);
        assert!(set.find_by_token(&token("a")).await.is_none());
    }

    #[tokio::test]
    async fn test_token_of_live_connection_is_not_taken_over() {
        let set = ConnectionSet::new();
        let (a, _ra) = ConnectionHandle::new();
        let (b, _rb) = ConnectionHandle::new();
        assert!(set.insert(a.clone(), Some(token("t"))).await);
        assert!(!set.insert(b.clone(), Some(token("t"))).await);

        assert_eq!(set.len().await, 1);
        assert_eq!(set.find_by_token(&token("t")).await.map(|h| h.id()), Some(a.id()));
        assert!(!set.remove(b.id()).await);

        assert!(set.remove(a.id()).await);
        assert!(set.insert(b.clone(), Some(token("t"))).await);
        assert_eq!(set.find_by_token(&token("t")).await.map(|h| h.id()), Some(b.id()));
    }

    #[tokio::test]
    async fn test_close_all() {
        let set = ConnectionSet::new();
        let (a, mut ra) = ConnectionHandle::new();
        let (b, mut rb) = ConnectionHandle::new();
        set.insert(a, None).await;
        set.insert(b, None).await;

        set.close_all("shutdown").await;

        assert!(matches!(ra.recv().await, Some(ConnectionCommand::Close(r)) if r == "shutdown"));
        assert!(matches!(rb.recv().await, Some(ConnectionCommand::Close(r)) if r == "shutdown"));
    }
}
