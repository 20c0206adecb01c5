use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = search_nexus::config::Config::load()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.basic.database_url,
        proxy = %cfg.basic.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.basic.loglevel,
        local_root = %cfg.search.local_root().display(),
        api_key_set = !cfg.basic.api_key.is_empty(),
    );
    if cfg.google.client_id.is_empty() {
        warn!("google.client_id is not configured; sign-in will fail");
    }

    let nexus = Arc::new(search_nexus::Nexus::build(&cfg).await?);
    match nexus.resume_sync().await {
        Ok(status) => info!(%status, "Index state restored"),
        Err(e) => warn!("Could not resume Drive sync: {}", e),
    }

    // Build axum router and serve
    let api_key: Arc<str> = Arc::from(cfg.basic.api_key.as_str());
    let state = search_nexus::router::NexusState::new(nexus.clone(), api_key);
    let app = search_nexus::router::nexus_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;

    nexus.shutdown().await;
    Ok(())
}
