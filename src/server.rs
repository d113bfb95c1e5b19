//! WebSocket listener: upgrades requests on the signaling path and hands
//! each connection to its own session task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::session::{serve_connection, ServerContext};
use crate::transport::WsTransport;

pub struct SignalingServer {
    config: ServerConfig,
    ctx: Arc<ServerContext>,
}

impl SignalingServer {
    pub fn new(config: ServerConfig, ctx: Arc<ServerContext>) -> Self {
        Self { config, ctx }
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            addr = %listener.local_addr()?,
            path = %self.config.ws_path,
            "signaling server listening"
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let ctx = Arc::clone(&self.ctx);
                    let path = self.config.ws_path.clone();
                    let queue = self.config.outbound_queue;
                    tokio::spawn(async move {
                        handle_socket(stream, addr, ctx, path, queue).await;
                    });
                }
            }
        }
    }
}

async fn handle_socket(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    ws_path: String,
    queue_depth: usize,
) {
    let check_path = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() == ws_path {
            return Ok(resp);
        }
        debug!(%addr, path = %req.uri().path(), "upgrade on unknown path");
        let mut reject = ErrorResponse::new(Some("not found".to_owned()));
        *reject.status_mut() = StatusCode::NOT_FOUND;
        Err(reject)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%addr, error = %e, "websocket handshake failed");
            return;
        }
    };
    info!(%addr, "client connected");
    let transport = Arc::new(WsTransport::new(ws, addr, queue_depth));
    serve_connection(ctx, transport).await;
    info!(%addr, "client disconnected");
}
