use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use sectorchat_server::config::{generate_config_template, Config};
use sectorchat_server::store::retention::spawn_retention_cleanup;
use sectorchat_server::{routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sectorchat_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!(
        "Sector chat server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // The data directory must exist before either store is loaded
    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| format!("cannot create data directory {}: {}", config.data_dir, e))?;

    let app_state = state::AppState::initialize(&config).await?;
    tracing::info!(
        data_dir = %config.data_dir,
        durability = ?app_state.durability,
        "Stores loaded"
    );

    // Periodic TTL eviction, independent of send traffic
    let retention = config.retention();
    spawn_retention_cleanup(
        app_state.store.clone(),
        Duration::from_secs(retention.cleanup_interval_secs.max(1)),
    );
    tracing::info!(
        "Message retention: {}h TTL, cleanup every {}s",
        retention.ttl_hours,
        retention.cleanup_interval_secs
    );

    let store = app_state.store.clone();

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Whatever the background writer has not flushed yet
    if let Err(e) = store.flush().await {
        tracing::error!(error = %e, "Final message store flush failed");
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
