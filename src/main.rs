use std::sync::Arc;

use circlechat::channels::Channels;
use circlechat::media::{DynMediaStore, FsMediaStore};
use circlechat::presence::Presence;
use circlechat::{app, db, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url =
        dotenv::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:circlechat.db?mode=rwc".to_owned());
    let db_pool = db::connect(&database_url).await?;

    let media: DynMediaStore = Arc::new(FsMediaStore::new(
        dotenv::var("MEDIA_DIR").unwrap_or_else(|_| "media".to_owned()),
        dotenv::var("MEDIA_BASE_URL").unwrap_or_else(|_| "http://localhost:8080/media".to_owned()),
    ));

    let state = AppState {
        db_pool,
        presence: Presence::new(),
        channels: Channels::new(),
        media,
    };

    let bind_addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "circlechat listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
