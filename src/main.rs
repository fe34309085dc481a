use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sd_material::{
    api::routes::{router, AppState, LatestMaterial},
    config, orchestrator_options, resolver_from_config, Orchestrator,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    config::Config::dotenv_load();
    let config = match config::Config::new() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    config.log_env_vars();

    let resolver = match resolver_from_config(&config) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to create inference client: {}", e);
            std::process::exit(2);
        }
    };
    let latest = Arc::new(LatestMaterial::default());
    let orchestrator = Arc::new(Orchestrator::new(
        resolver.clone(),
        latest.clone(),
        orchestrator_options(&config),
    ));
    tracing::info!(material_id = %orchestrator.material_id(), "orchestrator ready");

    let state = Arc::new(AppState { resolver, orchestrator, latest });
    let app = router(state);

    // Run our application with safe parsing
    let ip: std::net::IpAddr = config.api_host.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid API_HOST '{}', falling back to 127.0.0.1", config.api_host);
        std::net::IpAddr::from([127, 0, 0, 1])
    });
    let port: u16 = config.api_port.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid API_PORT '{}', falling back to 8190", config.api_port);
        8190
    });
    let socket_address = SocketAddr::new(ip, port);
    tracing::info!("listening on {}", socket_address);
    if let Err(e) = axum::Server::bind(&socket_address)
        .serve(app.into_make_service())
        .await
    {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}
