use tracing_subscriber::EnvFilter;

use beamcast_server::config::Config;
use beamcast_server::error::ServerError;
use beamcast_server::state::AppState;
use beamcast_server::{certs, listener};

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls before any TLS operations.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install ring crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("beamcast_server=info,tower_http=info")),
        )
        .init();

    tracing::info!("Beamcast starting...");

    // Load .env file if present (non-fatal if missing).
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("no .env file loaded: {e}");
    }

    let config = Config::from_env();
    tracing::info!(
        https_port = config.https_port,
        http_port = config.http_port,
        pairing = config.enable_pairing,
        "configuration loaded"
    );

    let identity = match certs::load_or_generate(&config.cert_file, &config.key_file) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!(error = %e, "failed to load server credentials");
            std::process::exit(1);
        }
    };

    let state = AppState::new(config, identity);
    tracing::info!(
        clients = state.clients.read().await.entries().len(),
        "client store loaded"
    );

    let https_state = state.clone();
    let https_handle = tokio::spawn(async move { listener::run_https(https_state).await });
    let http_state = state.clone();
    let http_handle = tokio::spawn(async move { listener::run_http(http_state).await });

    // Run both listeners until one fails or a shutdown signal arrives.
    // In-flight handshakes and any suspended pairing responses are
    // dropped with the tasks.
    tokio::select! {
        res = https_handle => exit_on_listener_failure("HTTPS", res),
        res = http_handle => exit_on_listener_failure("HTTP", res),
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping listeners");
        }
    }
}

fn exit_on_listener_failure(
    name: &str,
    result: Result<Result<(), ServerError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Err(e)) => {
            tracing::error!(error = %e, "{name} listener failed");
            std::process::exit(1);
        }
        Ok(Ok(())) => tracing::warn!("{name} listener exited"),
        Err(e) => {
            tracing::error!(error = %e, "{name} listener task panicked");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
