//! Duplex signaling channel, one per client.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::{Error, Result};

/// Message channel to a single client.
///
/// `recv` is driven by exactly one task (the connection's read loop);
/// `send` may be called concurrently from any task. After `close`,
/// pending and future `recv` calls return `Ok(None)`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Next text message, `Ok(None)` once the client is gone.
    async fn recv(&self) -> Result<Option<String>>;

    async fn send(&self, text: String) -> Result<()>;

    async fn close(&self);
}

/// Server side of an accepted WebSocket.
pub struct WsTransport {
    addr: SocketAddr,
    outgoing: mpsc::Sender<Message>,
    incoming: Mutex<SplitStream<WebSocketStream<TcpStream>>>,
    closed: watch::Sender<bool>,
}

impl WsTransport {
    pub fn new(ws: WebSocketStream<TcpStream>, addr: SocketAddr, queue_depth: usize) -> Self {
        let (mut write, read) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel::<Message>(queue_depth.max(1));
        let (closed, mut shutdown) = watch::channel(false);

        // Writes are funneled through one task so senders never contend on the sink.
        // Shutdown arrives out of band so a full queue cannot hold the socket open.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = outgoing_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = write.send(msg).await {
                            debug!(%addr, error = %e, "websocket write failed");
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            if let Err(e) = write.close().await {
                debug!(%addr, error = %e, "websocket close failed");
            }
        });

        Self {
            addr,
            outgoing,
            incoming: Mutex::new(read),
            closed,
        }
    }

    async fn next_text(&self) -> Result<Option<String>> {
        let mut incoming = self.incoming.lock().await;
        loop {
            match incoming.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Binary(_))) => {
                    return Err(Error::Protocol("binary frame on signaling channel".into()))
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&self) -> Result<Option<String>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }
        tokio::select! {
            next = self.next_text() => next,
            _ = closed.changed() => Ok(None),
        }
    }

    async fn send(&self, text: String) -> Result<()> {
        if *self.closed.borrow() {
            return Err(Error::TransportClosed);
        }
        self.outgoing
            .send(Message::Text(text))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(addr = %self.addr, "closing websocket");
    }
}
