//! Transport over the WebSocket relay broker

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::protocol::{decode_peer_value, encode_peer, PeerMsg, RelayFrame};
use super::room::RoomCode;
use super::transport::{Connector, Transport, TransportError, TransportEvent};

/// Bounded retry for reaching the relay
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

/// Relay-backed transport. A background task owns the socket; the game loop
/// only touches the two channels.
pub struct WsTransport {
    outbound: Option<mpsc::UnboundedSender<RelayFrame>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    connected: bool,
    task: JoinHandle<()>,
}

impl WsTransport {
    /// Start connecting to `relay_url` as `local_id`. Must be called inside a tokio runtime.
    pub fn spawn(relay_url: &str, local_id: &RoomCode, retry: RetryPolicy) -> Self {
        let url = format!("{}/ws?id={}", relay_url.trim_end_matches('/'), local_id);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(url, retry, out_rx, ev_tx));

        Self {
            outbound: Some(out_tx),
            events: ev_rx,
            connected: false,
            task,
        }
    }

    fn push(&self, frame: RelayFrame) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::NotOpen)?
            .send(frame)
            .map_err(|_| TransportError::NotOpen)
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, remote_id: &RoomCode) -> Result<(), TransportError> {
        self.push(RelayFrame::Connect {
            to: remote_id.to_string(),
        })
    }

    fn send(&mut self, msg: &PeerMsg) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotOpen);
        }
        let payload = encode_peer(msg).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.push(RelayFrame::Data { payload })
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
        self.connected && self.outbound.is_some()
    }

    fn close(&mut self) {
        // Dropping the sender makes the link task close the socket
        self.outbound = None;
        self.connected = false;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if self.outbound.is_some() {
            self.task.abort();
        }
    }
}

async fn run_link(
    url: String,
    retry: RetryPolicy,
    mut out_rx: mpsc::UnboundedReceiver<RelayFrame>,
    ev_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut attempt = 0;
    let socket = loop {
        attempt += 1;
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => break socket,
            Err(e) if attempt < retry.attempts => {
                warn!(attempt, error = %e, "Relay not reachable, retrying");
                tokio::time::sleep(retry.delay).await;
            }
            Err(e) => {
                let _ = ev_tx.send(TransportEvent::Error(TransportError::Unavailable(
                    e.to_string(),
                )));
                return;
            }
        }
    };
    info!(url = %url, "Connected to relay");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode relay frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = ev_tx.send(TransportEvent::Error(TransportError::Relay(e.to_string())));
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    debug!("Relay link closed locally");
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = translate(&text) {
                        if ev_tx.send(event).is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = ev_tx.send(TransportEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = ev_tx.send(TransportEvent::Error(TransportError::Relay(e.to_string())));
                    break;
                }
            }
        }
    }
}

/// Map a relay frame to a transport event. Undecodable peer payloads are dropped.
fn translate(text: &str) -> Option<TransportEvent> {
    match serde_json::from_str::<RelayFrame>(text) {
        Ok(RelayFrame::Open { id }) => Some(TransportEvent::Open { local_id: id }),
        Ok(RelayFrame::Connected { peer }) => Some(TransportEvent::Connected { peer_id: peer }),
        Ok(RelayFrame::Data { payload }) => match decode_peer_value(payload) {
            Ok(msg) => Some(TransportEvent::Data(msg)),
            Err(e) => {
                debug!(error = %e, "Dropping malformed peer message");
                None
            }
        },
        Ok(RelayFrame::Closed) => Some(TransportEvent::Closed),
        Ok(RelayFrame::Error { message }) => {
            Some(TransportEvent::Error(TransportError::Relay(message)))
        }
        Ok(RelayFrame::Connect { .. }) => None,
        Err(e) => {
            warn!(error = %e, "Failed to parse relay frame");
            None
        }
    }
}

/// Opens [`WsTransport`]s against one relay
#[derive(Debug, Clone)]
pub struct RelayConnector {
    relay_url: String,
    retry: RetryPolicy,
}

impl RelayConnector {
    pub fn new(relay_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            relay_url: relay_url.into(),
            retry,
        }
    }
}

impl Connector for RelayConnector {
    fn open(&mut self, local_id: RoomCode) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(WsTransport::spawn(
            &self.relay_url,
            &local_id,
            self.retry,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppState;
    use crate::config::{Config, RunMode};
    use crate::http::build_router;
    use tokio::net::TcpListener;

    fn test_config() -> Config {
        Config {
            mode: RunMode::Relay,
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".into(),
            client_origin: None,
            relay_url: String::new(),
            room_code: None,
            rounds: 1,
            max_frames: 1,
            seed: None,
        }
    }

    async fn start_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(AppState::new(test_config()));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("ws://{}", addr)
    }

    async fn next_event(transport: &mut WsTransport) -> TransportEvent {
        for _ in 0..500 {
            if let Some(event) = transport.poll_event() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no transport event within 5s");
    }

    fn code(s: &str) -> RoomCode {
        RoomCode::parse(s).unwrap()
    }

    #[test]
    fn translate_maps_frames() {
        assert_eq!(
            translate(r#"{"op":"open","id":"AB12"}"#),
            Some(TransportEvent::Open {
                local_id: "AB12".into()
            })
        );
        assert_eq!(
            translate(r#"{"op":"data","payload":{"type":"PIPE","gapTop":300,"id":7}}"#),
            Some(TransportEvent::Data(PeerMsg::Pipe {
                gap_top: 300.0,
                id: 7
            }))
        );
        assert_eq!(
            translate(r#"{"op":"data","payload":{"type":"PIPE"}}"#),
            None
        );
        assert_eq!(translate("garbage"), None);
    }

    #[tokio::test]
    async fn relay_round_trip() {
        let url = start_relay().await;
        let retry = RetryPolicy::default();

        let mut host = WsTransport::spawn(&url, &code("HOST"), retry);
        assert_eq!(
            next_event(&mut host).await,
            TransportEvent::Open {
                local_id: "HOST".into()
            }
        );

        let mut client = WsTransport::spawn(&url, &code("CLNT"), retry);
        assert!(matches!(next_event(&mut client).await, TransportEvent::Open { .. }));
        assert_eq!(client.send(&PeerMsg::Start), Err(TransportError::NotOpen));

        client.connect(&code("HOST")).unwrap();
        assert_eq!(
            next_event(&mut host).await,
            TransportEvent::Connected {
                peer_id: "CLNT".into()
            }
        );
        assert!(matches!(
            next_event(&mut client).await,
            TransportEvent::Connected { .. }
        ));

        host.send(&PeerMsg::GameoverSync { score: 5 }).unwrap();
        assert_eq!(
            next_event(&mut client).await,
            TransportEvent::Data(PeerMsg::GameoverSync { score: 5 })
        );

        host.close();
        assert_eq!(next_event(&mut client).await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn duplicate_id_surfaces_relay_error() {
        let url = start_relay().await;
        let retry = RetryPolicy::default();
        let mut first = WsTransport::spawn(&url, &code("SAME"), retry);
        assert!(matches!(next_event(&mut first).await, TransportEvent::Open { .. }));

        let mut second = WsTransport::spawn(&url, &code("SAME"), retry);
        assert!(matches!(
            next_event(&mut second).await,
            TransportEvent::Error(TransportError::Relay(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_relay_gives_up() {
        let retry = RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(10),
        };
        let mut transport = WsTransport::spawn("ws://127.0.0.1:1", &code("LONE"), retry);
        assert!(matches!(
            next_event(&mut transport).await,
            TransportEvent::Error(TransportError::Unavailable(_))
        ));
    }
}
