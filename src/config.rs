use std::path::PathBuf;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_JWT_SECRET: &str = "dev-secret-do-not-use-in-prod";
pub const DEFAULT_OUTBOUND_QUEUE: usize = 128;

/// Runtime settings for the signaling server and its media engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: String,
    /// Request path accepted for the WebSocket upgrade.
    pub ws_path: String,
    /// ICE servers handed to every media binding.
    pub stun_servers: Vec<String>,
    /// HMAC secret used to verify bearer tokens.
    pub jwt_secret: String,
    /// Optional JSON file seeding the profile directory.
    pub users_file: Option<PathBuf>,
    /// Depth of each connection's outbound signaling queue.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            ws_path: DEFAULT_WS_PATH.to_owned(),
            stun_servers: vec![DEFAULT_STUN_SERVER.to_owned()],
            jwt_secret: DEFAULT_JWT_SECRET.to_owned(),
            users_file: None,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}
