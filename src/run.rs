//! Startup and shutdown of the resource server.

use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors;
use x402_axum::Paygate;
use x402_facilitator_local::util::{SigDown, Telemetry};
use x402_oracle::OracleBridge;
use x402_oracle::eip155::Eip155Coordinator;

use crate::config::Config;
use crate::facilitator::FacilitatorBackend;
use crate::routes;

/// Capacity of the fulfillment channel between the poller and the bridge.
const FULFILLMENT_CHANNEL_CAPACITY: usize = 256;

/// Initializes and runs the resource server until SIGTERM or SIGINT.
///
/// - Loads `.env` variables and the JSON configuration.
/// - Installs the tracing subscriber.
/// - Connects the facilitator backend and the randomness consumer.
/// - Spawns the fulfillment poller and the bridge loop.
/// - Serves `/mint`, `/requests/{requestId}` and `/health`.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .map_err(|_| "Failed to initialize rustls crypto provider")?;

    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let terms = config.payment_terms()?;
    tracing::info!(
        network = %terms.network,
        price = %terms.max_amount_required,
        pay_to = %terms.pay_to,
        resource = %terms.resource,
        "Payment terms loaded"
    );

    let facilitator =
        FacilitatorBackend::from_config(config.network(), config.facilitator(), config.settle_timeout())?;
    let coordinator = Eip155Coordinator::connect(config.network(), config.oracle())?;
    let poller = coordinator.poller();
    let bridge = Arc::new(OracleBridge::new(coordinator, config.oracle().outcomes.clone())?);

    let gate = Paygate::new(Arc::new(facilitator), bridge.clone(), terms)
        .with_verify_timeout(config.verify_timeout())
        .with_settle_timeout(config.settle_timeout())
        .with_min_remaining_window(config.min_remaining_window());

    let sig_down = SigDown::try_new()?;
    let (events_tx, events_rx) = mpsc::channel(FULFILLMENT_CHANNEL_CAPACITY);
    let poller_task = tokio::spawn(poller.run(events_tx, sig_down.cancellation_token()));
    let bridge_task = {
        let bridge = bridge.clone();
        let cancellation_token = sig_down.cancellation_token();
        tokio::spawn(async move { bridge.run(events_rx, cancellation_token).await })
    };

    let http_endpoints = routes::routes(gate)
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    let served = axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await;

    sig_down.cancel();
    sig_down.recv().await;
    if let Err(e) = poller_task.await {
        tracing::warn!(error = %e, "Fulfillment poller did not stop cleanly");
    }
    if let Err(e) = bridge_task.await {
        tracing::warn!(error = %e, "Bridge loop did not stop cleanly");
    }
    tracing::info!(
        pending = bridge.pending_count(),
        minted = bridge.minted_count(),
        "Server stopped"
    );

    served?;
    Ok(())
}
