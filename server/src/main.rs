use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod access;
mod handlers;
mod logic;
mod rooms;
mod state;
mod storage;

use crate::handlers::{liveness_handler, ws_handler};
use crate::state::AppState;
use crate::storage::{FileStorage, S3Storage, S3StorageConfig, Storage};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Directory holding one board file per room.
    #[arg(long)]
    board_dir: Option<PathBuf>,
    /// Store board records in this S3 bucket instead of local files.
    #[arg(long)]
    s3_bucket: Option<String>,
    #[arg(long)]
    s3_prefix: Option<String>,
    #[arg(long)]
    s3_region: Option<String>,
    #[arg(long)]
    s3_endpoint_url: Option<String>,
    #[arg(long, default_value_t = false)]
    s3_force_path_style: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("inkroom_server=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let storage: Arc<dyn Storage> = if let Some(bucket) = args.s3_bucket {
        let mut config = S3StorageConfig::new(bucket);
        config.prefix = args.s3_prefix;
        config.region = args.s3_region;
        config.endpoint_url = args.s3_endpoint_url;
        config.force_path_style = args.s3_force_path_style;
        config.access_key_id = std::env::var("S3_ACCESS_KEY_ID").ok();
        config.secret_access_key = std::env::var("S3_SECRET_ACCESS_KEY").ok();
        Arc::new(S3Storage::new(config).await)
    } else {
        let board_dir = args
            .board_dir
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../boards"));
        if let Err(error) = tokio::fs::create_dir_all(&board_dir).await {
            warn!(%error, "failed to create board dir");
        }
        Arc::new(FileStorage::new(board_dir))
    };

    let state = AppState::new(storage);
    let flush_state = state.clone();

    let app = Router::new()
        .route("/", get(liveness_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            rooms::flush_dirty_rooms(&flush_state).await;
            access::sweep_expired_invites(&flush_state).await;
        }
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(5000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "whiteboard sync server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server");
    axum::serve(listener, app).await.expect("Server crashed");
}
