use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use sol_forecast::api;
use sol_forecast::config::Config;
use sol_forecast::service::ForecastService;
use sol_forecast::source::BinanceKlineSource;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set SOL_FORECAST_CONFIG or create config/default.toml");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(&config.logging.level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        symbol = %config.market.symbol,
        rest_url = %config.market.rest_base_url,
        period = %config.market.default_period,
        interval = %config.market.interval,
        "Starting sol-forecast"
    );

    let source = Arc::new(BinanceKlineSource::new(&config.market.rest_base_url));
    let service = ForecastService::from_config(&config, source)
        .context("failed to load model artifacts")?;
    tracing::info!(
        window = config.model.window,
        features = ?config.model.features,
        workers = config.workers.inference,
        "Model loaded"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on http://{addr}");

    axum::serve(listener, api::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl+C received");
}
