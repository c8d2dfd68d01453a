//! WebSocket transport for the live conversational service

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::LiveConfig;
use crate::error::NetworkError;
use crate::network::channel::{ChannelEndpoint, Connector, DuplexChannel, InboundEvent};
use crate::network::protocol::{ClientMessage, ServerMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frames buffered between the uplink task and the socket
const OUTBOUND_CAPACITY: usize = 64;

/// Connects to the service over a WebSocket
#[derive(Debug, Clone, Default)]
pub struct LiveConnector;

impl LiveConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn open(&self, config: &LiveConfig, api_key: &str) -> Result<DuplexChannel, NetworkError> {
        let url = format!("{}?key={}", config.endpoint, api_key);
        let socket = tokio::time::timeout(config.connect_timeout(), handshake(&url, config))
            .await
            .map_err(|_| NetworkError::Timeout)??;

        tracing::info!("Live session open ({})", config.model);

        let (channel, endpoint) = DuplexChannel::pair(OUTBOUND_CAPACITY);
        tokio::spawn(run_socket(socket, endpoint));
        Ok(channel)
    }
}

/// Connect, send setup, and wait for `setupComplete`
async fn handshake(url: &str, config: &LiveConfig) -> Result<Socket, NetworkError> {
    let (mut socket, _) = connect_async(url)
        .await
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

    let setup = ClientMessage::setup(config).to_json()?;
    socket
        .send(Message::Text(setup))
        .await
        .map_err(|e| NetworkError::Transport(e.to_string()))?;

    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                if setup_completed(text.as_bytes()) {
                    return Ok(socket);
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                if setup_completed(&bytes) {
                    return Ok(socket);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed during setup".to_string());
                return Err(NetworkError::Transport(reason));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(NetworkError::Transport(e.to_string())),
            None => return Err(NetworkError::Transport("closed during setup".into())),
        }
    }
}

fn setup_completed(bytes: &[u8]) -> bool {
    match ServerMessage::parse(bytes) {
        Ok(msg) => msg.is_setup_complete(),
        Err(e) => {
            tracing::warn!("Ignoring message during setup: {}", e);
            false
        }
    }
}

/// Pump frames out and events in until either side ends
async fn run_socket(socket: Socket, mut endpoint: ChannelEndpoint) {
    let (mut sink, mut stream) = socket.split();
    let cancel = endpoint.cancelled();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(pcm) = endpoint.outbound.recv() => {
                let sent = match ClientMessage::audio(&pcm).to_json() {
                    Ok(json) => sink.send(Message::Text(json)).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(reason) = sent {
                    let _ = endpoint.deliver(InboundEvent::TransportError(reason)).await;
                    break;
                }
            }
            incoming = stream.next() => {
                let keep_going = match incoming {
                    Some(Ok(Message::Text(text))) => dispatch(&endpoint, text.as_bytes()).await,
                    Some(Ok(Message::Binary(bytes))) => dispatch(&endpoint, &bytes).await,
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            tracing::info!("Remote closed session: {} {}", frame.code, frame.reason);
                        }
                        let _ = endpoint.deliver(InboundEvent::Closed).await;
                        false
                    }
                    Some(Ok(_)) => true,
                    Some(Err(e)) => {
                        let _ = endpoint.deliver(InboundEvent::TransportError(e.to_string())).await;
                        false
                    }
                    None => {
                        let _ = endpoint.deliver(InboundEvent::Closed).await;
                        false
                    }
                };
                if !keep_going {
                    break;
                }
            }
        }
    }

    endpoint.mark_closed();
    tracing::debug!("Socket task finished");
}

/// Forward the events of one server message. Returns false when the local
/// side has gone away.
async fn dispatch(endpoint: &ChannelEndpoint, bytes: &[u8]) -> bool {
    let message = match ServerMessage::parse(bytes) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Dropping inbound message: {}", e);
            return true;
        }
    };

    if message.go_away.is_some() {
        tracing::debug!("Service announced it will close the session soon");
    }

    for event in message.into_events() {
        match event {
            Ok(event) => {
                if endpoint.deliver(event).await.is_err() {
                    return false;
                }
            }
            Err(e) => tracing::warn!("Dropping inbound part: {}", e),
        }
    }
    true
}
