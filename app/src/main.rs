use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arena_core::api::{router, ApiState};
use arena_core::arena::{Arena, HttpDispatchClient, StoredWinnerLog};
use arena_core::db::init_db;
use arena_core::providers::{ProviderRegistry, StoredKeyResolver};
use directories::ProjectDirs;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

fn workspace_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "Arena", "Arena") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("Arena")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db = init_db(workspace_dir()).context("failed to init db")?;
    let resolver = StoredKeyResolver::new(db.clone());
    let dispatcher = Arc::new(HttpDispatchClient::new()?);
    let winner_log = StoredWinnerLog::new(db.clone());
    let arena = Arena::new(db.clone(), dispatcher, resolver.clone(), winner_log);
    let registry = ProviderRegistry::new(db.clone(), resolver);

    // bring the persisted instance registry back into the grid
    arena.load_instances(registry.list().await?);

    let app = router(ApiState {
        db,
        arena,
        registry,
    })
    .layer(CorsLayer::permissive());

    let port: u16 = std::env::var("ARENA_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8787);
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "arena API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
