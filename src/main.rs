// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use tokio::{net::TcpListener, signal, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use custodial_wallet_server::{
    api::router,
    auth::TokenService,
    blockchain::AdapterRegistry,
    clock::{Clock, SystemClock},
    config::{AppConfig, LOG_FORMAT_ENV},
    crypto::KeyEncryptor,
    monitor::{QuoteSweeper, TransactionMonitor},
    price_feed::{provider::CoinGeckoProvider, PriceFeedWorker},
    state::AppState,
    storage::Databases,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    // Outbound HTTPS (chain RPCs, price provider) uses rustls with ring
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dbs = Arc::new(Databases::open(&config.databases)?);
    let adapters = Arc::new(AdapterRegistry::from_config(&config.chains)?);
    info!(chains = ?adapters.chains(), "Chain adapters ready");

    let wallet_key = match &config.wallet_key {
        Some(encoded) => KeyEncryptor::from_base64(encoded)?,
        None => {
            warn!("WALLET_ENCRYPTION_KEY not set, using an ephemeral key; wallets created now cannot sign after a restart");
            KeyEncryptor::ephemeral()?
        }
    };
    let kyc_key = KeyEncryptor::from_base64(&config.kyc_key)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();
    let state = AppState::new(
        dbs.clone(),
        adapters.clone(),
        Arc::new(wallet_key),
        Arc::new(kyc_key),
        TokenService::new(&config.jwt),
        clock.clone(),
        config.rate_limit.clone(),
    )
    .with_cors_origins(config.cors_origins.clone())
    .with_shutdown(shutdown.clone());

    // Background workers share one cancellation token
    let mut workers = JoinSet::new();
    let provider = Arc::new(CoinGeckoProvider::new(&config.price_feed.api_url)?);
    workers.spawn(
        PriceFeedWorker::new(provider, dbs.clone(), state.prices.clone(), clock.clone(), &config.price_feed)
            .run(shutdown.clone()),
    );
    workers.spawn(
        TransactionMonitor::new(
            dbs.clone(),
            adapters.clone(),
            state.wallets.tx_cache(),
            clock.clone(),
            config.monitor_interval,
        )
        .run(shutdown.clone()),
    );
    workers.spawn(QuoteSweeper::new(state.exchange.clone(), config.quote_sweep_interval).run(shutdown.clone()));

    let app = router(state);
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Custodial wallet server listening (docs at /docs)");

    let serve_shutdown = shutdown.clone();
    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = serve_shutdown.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Background worker panicked");
        }
    }
    info!("Workers stopped");

    served?;
    drop(dbs);
    Ok(())
}
