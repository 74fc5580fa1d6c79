//! Transport abstraction between the two game instances
//!
//! A transport is polled from the game loop; it never blocks and never calls
//! back into game code, so message handling is always interleaved with
//! simulation steps rather than concurrent to them.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::protocol::{decode_peer, PeerMsg};
use super::room::RoomCode;

/// Events surfaced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Our identity is registered and usable
    Open { local_id: String },
    /// A peer link is established
    Connected { peer_id: String },
    /// Decoded message from the peer
    Data(PeerMsg),
    /// The peer link is gone
    Closed,
    Error(TransportError),
}

/// Transport failures. None of these are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection is not open")]
    NotOpen,

    #[error("Peer service unavailable: {0}")]
    Unavailable(String),

    #[error("Could not connect to peer {0}")]
    PeerUnavailable(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Abstract two-party message channel
pub trait Transport: Send {
    /// Link with a published identifier. Completion arrives as `Connected`.
    fn connect(&mut self, remote_id: &RoomCode) -> Result<(), TransportError>;

    /// Enqueue a message; fails unless a peer link is open
    fn send(&mut self, msg: &PeerMsg) -> Result<(), TransportError>;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<TransportEvent>;

    fn is_connected(&self) -> bool;

    fn close(&mut self);
}

/// Creates transports registered under a chosen local id
pub trait Connector: Send {
    fn open(&mut self, local_id: RoomCode) -> Result<Box<dyn Transport>, TransportError>;
}

struct Endpoint {
    events: mpsc::UnboundedSender<TransportEvent>,
    peer: Arc<Mutex<Option<String>>>,
}

/// In-process network of transports keyed by id
#[derive(Clone, Default)]
pub struct LocalNetwork {
    endpoints: Arc<DashMap<String, Endpoint>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, local_id: RoomCode) -> Result<LocalTransport, TransportError> {
        let id = local_id.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Mutex::new(None));

        match self.endpoints.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::Relay(format!("id {} is taken", id)));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Endpoint {
                    events: tx.clone(),
                    peer: peer.clone(),
                });
            }
        }

        let _ = tx.send(TransportEvent::Open {
            local_id: id.clone(),
        });

        Ok(LocalTransport {
            network: self.clone(),
            id,
            events: rx,
            peer,
            connected: false,
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn deliver(&self, to: &str, event: TransportEvent) -> bool {
        match self.endpoints.get(to) {
            Some(endpoint) => endpoint.events.send(event).is_ok(),
            None => false,
        }
    }

    fn link(&self, from: &str, to: &str) -> Result<(), TransportError> {
        if from == to {
            return Err(TransportError::PeerUnavailable(to.to_string()));
        }
        let target_peer = match self.endpoints.get(to) {
            Some(endpoint) => endpoint.peer.clone(),
            None => return Err(TransportError::PeerUnavailable(to.to_string())),
        };
        {
            let mut target = target_peer.lock();
            if target.is_some() {
                return Err(TransportError::PeerUnavailable(to.to_string()));
            }
            *target = Some(from.to_string());
        }
        if let Some(endpoint) = self.endpoints.get(from) {
            *endpoint.peer.lock() = Some(to.to_string());
        }

        self.deliver(
            to,
            TransportEvent::Connected {
                peer_id: from.to_string(),
            },
        );
        self.deliver(
            from,
            TransportEvent::Connected {
                peer_id: to.to_string(),
            },
        );
        Ok(())
    }

    fn unregister(&self, id: &str) {
        if let Some((_, endpoint)) = self.endpoints.remove(id) {
            let peer = endpoint.peer.lock().take();
            if let Some(peer) = peer {
                if let Some(other) = self.endpoints.get(&peer) {
                    *other.peer.lock() = None;
                    let _ = other.events.send(TransportEvent::Closed);
                }
            }
        }
    }
}

impl Connector for LocalNetwork {
    fn open(&mut self, local_id: RoomCode) -> Result<Box<dyn Transport>, TransportError> {
        self.register(local_id).map(|t| Box::new(t) as Box<dyn Transport>)
    }
}

/// Transport over a [`LocalNetwork`]. Messages are JSON-encoded on the way
/// through so both sides see exactly what a remote peer would send.
pub struct LocalTransport {
    network: LocalNetwork,
    id: String,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    peer: Arc<Mutex<Option<String>>>,
    connected: bool,
    closed: bool,
}

impl Transport for LocalTransport {
    fn connect(&mut self, remote_id: &RoomCode) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotOpen);
        }
        self.network.link(&self.id, remote_id.as_str())
    }

    fn send(&mut self, msg: &PeerMsg) -> Result<(), TransportError> {
        if !self.connected || self.closed {
            return Err(TransportError::NotOpen);
        }
        let peer = self.peer.lock().clone().ok_or(TransportError::NotOpen)?;
        let text = serde_json::to_string(msg).map_err(|e| TransportError::Encode(e.to_string()))?;

        match decode_peer(&text) {
            Ok(decoded) => {
                if !self.network.deliver(&peer, TransportEvent::Data(decoded)) {
                    return Err(TransportError::NotOpen);
                }
            }
            Err(e) => warn!(error = %e, "Dropping message that failed to round-trip"),
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.try_recv().ok()?;
        match &event {
            TransportEvent::Connected { .. } => self.connected = true,
            TransportEvent::Closed => self.connected = false,
            _ => {}
        }
        Some(event)
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.closed
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.connected = false;
        self.network.unregister(&self.id);
        debug!(id = %self.id, "Local transport closed");
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> RoomCode {
        RoomCode::parse(s).unwrap()
    }

    fn drain(t: &mut LocalTransport) -> Vec<TransportEvent> {
        std::iter::from_fn(|| t.poll_event()).collect()
    }

    #[test]
    fn open_connect_send_close() {
        let net = LocalNetwork::new();
        let mut host = net.register(code("HOST")).unwrap();
        let mut client = net.register(code("CLNT")).unwrap();

        assert_eq!(
            drain(&mut host),
            vec![TransportEvent::Open {
                local_id: "HOST".into()
            }]
        );
        drain(&mut client);

        // Not yet linked
        assert_eq!(client.send(&PeerMsg::Start), Err(TransportError::NotOpen));

        client.connect(&code("host")).unwrap();
        assert_eq!(
            drain(&mut host),
            vec![TransportEvent::Connected {
                peer_id: "CLNT".into()
            }]
        );
        drain(&mut client);
        assert!(host.is_connected() && client.is_connected());

        host.send(&PeerMsg::Pipe { gap_top: 300.0, id: 7 }).unwrap();
        assert_eq!(
            drain(&mut client),
            vec![TransportEvent::Data(PeerMsg::Pipe { gap_top: 300.0, id: 7 })]
        );

        host.close();
        assert_eq!(drain(&mut client), vec![TransportEvent::Closed]);
        assert!(!client.is_connected());
        assert_eq!(net.len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let net = LocalNetwork::new();
        let _first = net.register(code("ABCD")).unwrap();
        assert!(net.register(code("ABCD")).is_err());
    }

    #[test]
    fn third_party_cannot_join_busy_peer() {
        let net = LocalNetwork::new();
        let _host = net.register(code("HOST")).unwrap();
        let mut a = net.register(code("AAAA")).unwrap();
        let mut b = net.register(code("BBBB")).unwrap();
        a.connect(&code("HOST")).unwrap();
        assert_eq!(
            b.connect(&code("HOST")),
            Err(TransportError::PeerUnavailable("HOST".into()))
        );
    }

    #[test]
    fn unknown_peer_is_unavailable() {
        let net = LocalNetwork::new();
        let mut a = net.register(code("AAAA")).unwrap();
        assert!(matches!(
            a.connect(&code("ZZZZ")),
            Err(TransportError::PeerUnavailable(_))
        ));
    }
}
