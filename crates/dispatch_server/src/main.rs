use std::sync::Arc;

use clap::Parser;
use dispatch_core::routing::build_route_provider;
use dispatch_core::service::DispatchService;
use dispatch_server::auth::JwtAuth;
use dispatch_server::config::Args;
use dispatch_server::router::create_router;
use dispatch_server::state::AppState;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let places = args.load_places()?;
    if places.is_empty() {
        tracing::warn!("no places loaded; every address lookup will fail");
    }
    let routes = build_route_provider(&args.route_provider_kind(), places)?;
    let service = DispatchService::builder(args.service_config()?, Arc::from(routes)).start()?;
    let service = Arc::new(service);

    let state = AppState::new(Arc::clone(&service), JwtAuth::new(args.jwt_secret.as_bytes()));
    let app = create_router(state);

    let listener = TcpListener::bind(args.bind).await?;
    tracing::info!("Listening on {}", args.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
}
