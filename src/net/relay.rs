//! Relay broker: registered endpoints and two-party links

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::protocol::RelayFrame;

/// Relay failures reported back to the requesting endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("id {0} is already taken")]
    IdTaken(String),

    #[error("peer {0} is unavailable")]
    PeerUnavailable(String),

    #[error("peer {0} is busy")]
    PeerBusy(String),

    #[error("already linked")]
    AlreadyLinked,
}

struct RelayEndpoint {
    tx: mpsc::UnboundedSender<RelayFrame>,
    peer: Option<String>,
}

/// Registry of connected endpoints
pub struct RelayRegistry {
    endpoints: DashMap<String, RelayEndpoint>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        id: &str,
        tx: mpsc::UnboundedSender<RelayFrame>,
    ) -> Result<(), RelayError> {
        match self.endpoints.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RelayError::IdTaken(id.to_string())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(RelayEndpoint { tx, peer: None });
                info!(id, "Relay endpoint registered");
                Ok(())
            }
        }
    }

    /// Link `from` with `to` and notify both ends
    pub fn link(&self, from: &str, to: &str) -> Result<(), RelayError> {
        if from == to {
            return Err(RelayError::PeerUnavailable(to.to_string()));
        }
        if self.peer_of(from).is_some() {
            return Err(RelayError::AlreadyLinked);
        }

        {
            let mut target = self
                .endpoints
                .get_mut(to)
                .ok_or_else(|| RelayError::PeerUnavailable(to.to_string()))?;
            if target.peer.is_some() {
                return Err(RelayError::PeerBusy(to.to_string()));
            }
            target.peer = Some(from.to_string());
            let _ = target.tx.send(RelayFrame::Connected {
                peer: from.to_string(),
            });
        }

        match self.endpoints.get_mut(from) {
            Some(mut source) => {
                source.peer = Some(to.to_string());
                let _ = source.tx.send(RelayFrame::Connected {
                    peer: to.to_string(),
                });
            }
            None => {
                // Source vanished mid-link; undo the target side
                if let Some(mut target) = self.endpoints.get_mut(to) {
                    target.peer = None;
                }
                return Err(RelayError::PeerUnavailable(from.to_string()));
            }
        }

        info!(from, to, "Relay link established");
        Ok(())
    }

    pub fn peer_of(&self, id: &str) -> Option<String> {
        self.endpoints.get(id).and_then(|e| e.peer.clone())
    }

    /// Forward a payload to the peer linked with `from`
    pub fn forward(&self, from: &str, payload: serde_json::Value) -> bool {
        let Some(peer) = self.peer_of(from) else {
            return false;
        };
        match self.endpoints.get(&peer) {
            Some(endpoint) => endpoint.tx.send(RelayFrame::Data { payload }).is_ok(),
            None => false,
        }
    }

    /// Remove an endpoint and tell its peer
    pub fn unregister(&self, id: &str) {
        let Some((_, endpoint)) = self.endpoints.remove(id) else {
            return;
        };
        if let Some(peer) = endpoint.peer {
            if let Some(mut other) = self.endpoints.get_mut(&peer) {
                other.peer = None;
                let _ = other.tx.send(RelayFrame::Closed);
            }
            debug!(id, peer = %peer, "Relay link closed");
        }
        info!(id, "Relay endpoint unregistered");
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Number of live two-party links
    pub fn active_links(&self) -> usize {
        self.endpoints.iter().filter(|e| e.peer.is_some()).count() / 2
    }
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint(
        registry: &RelayRegistry,
        id: &str,
    ) -> mpsc::UnboundedReceiver<RelayFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(id, tx).unwrap();
        rx
    }

    #[test]
    fn link_forward_unregister() {
        let registry = RelayRegistry::new();
        let mut host = endpoint(&registry, "HOST");
        let mut client = endpoint(&registry, "CLNT");

        registry.link("CLNT", "HOST").unwrap();
        assert_eq!(
            host.try_recv().unwrap(),
            RelayFrame::Connected {
                peer: "CLNT".into()
            }
        );
        assert_eq!(
            client.try_recv().unwrap(),
            RelayFrame::Connected {
                peer: "HOST".into()
            }
        );
        assert_eq!(registry.active_links(), 1);

        assert!(registry.forward("HOST", json!({"type": "START"})));
        assert_eq!(
            client.try_recv().unwrap(),
            RelayFrame::Data {
                payload: json!({"type": "START"})
            }
        );

        registry.unregister("HOST");
        assert_eq!(client.try_recv().unwrap(), RelayFrame::Closed);
        assert_eq!(registry.peer_of("CLNT"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_and_busy_are_rejected() {
        let registry = RelayRegistry::new();
        let _host = endpoint(&registry, "HOST");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            registry.register("HOST", tx),
            Err(RelayError::IdTaken("HOST".into()))
        );

        let _a = endpoint(&registry, "AAAA");
        let _b = endpoint(&registry, "BBBB");
        registry.link("AAAA", "HOST").unwrap();
        assert_eq!(
            registry.link("BBBB", "HOST"),
            Err(RelayError::PeerBusy("HOST".into()))
        );
        assert_eq!(
            registry.link("BBBB", "NOPE"),
            Err(RelayError::PeerUnavailable("NOPE".into()))
        );
    }

    #[test]
    fn unlinked_forward_is_dropped() {
        let registry = RelayRegistry::new();
        let _a = endpoint(&registry, "AAAA");
        assert!(!registry.forward("AAAA", json!({"type": "START"})));
    }
}
