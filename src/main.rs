use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voicechat_sfu::auth::{InMemoryDirectory, JwtValidator};
use voicechat_sfu::config::{
    DEFAULT_JWT_SECRET, DEFAULT_LISTEN_ADDR, DEFAULT_OUTBOUND_QUEUE, DEFAULT_STUN_SERVER,
    DEFAULT_WS_PATH,
};
use voicechat_sfu::room::RoomRegistry;
use voicechat_sfu::webrtc::RtcEngine;
use voicechat_sfu::{ServerConfig, ServerContext, SignalingServer};

/// Voice chat selective forwarding server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the signaling listener binds to
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR, env = "VOICECHAT_LISTEN")]
    listen: String,

    /// Request path accepted for WebSocket upgrades
    #[arg(long, default_value = DEFAULT_WS_PATH, env = "VOICECHAT_WS_PATH")]
    ws_path: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = DEFAULT_STUN_SERVER,
        env = "VOICECHAT_STUN"
    )]
    stun: Vec<String>,

    /// HS256 secret for bearer tokens
    #[arg(long, default_value = DEFAULT_JWT_SECRET, env = "VOICECHAT_JWT_SECRET")]
    jwt_secret: String,

    /// JSON file of user profiles
    #[arg(long, env = "VOICECHAT_USERS")]
    users: Option<PathBuf>,

    /// Outbound signaling queue depth per connection
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    outbound_queue: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen_addr: args.listen,
            ws_path: args.ws_path,
            stun_servers: args.stun,
            jwt_secret: args.jwt_secret,
            users_file: args.users,
            outbound_queue: args.outbound_queue,
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voicechat_sfu=info,info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ServerConfig::from(Args::parse());

    let directory = match &config.users_file {
        Some(path) => InMemoryDirectory::from_json_file(path)
            .with_context(|| format!("loading users from {}", path.display()))?,
        None => InMemoryDirectory::new(),
    };
    info!(profiles = directory.len(), "profile directory ready");
    if config.jwt_secret == DEFAULT_JWT_SECRET {
        warn!("using the built-in development JWT secret");
    }
    let directory = Arc::new(directory);
    let credentials = JwtValidator::new(&config.jwt_secret).with_directory(Arc::clone(&directory));

    let engine = RtcEngine::new(&config.stun_servers).context("initializing media engine")?;
    let ctx = Arc::new(ServerContext {
        registry: RoomRegistry::new(),
        credentials: Arc::new(credentials),
        profiles: directory,
        engine: Arc::new(engine),
    });

    SignalingServer::new(config, ctx)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    info!("server stopped");
    Ok(())
}
