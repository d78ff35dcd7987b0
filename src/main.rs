use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slotkeeper::calendar::{BusySource, CalendarBridge, HttpBusySource, HttpCalendarBridge, NoopBridge};
use slotkeeper::config::Config;
use slotkeeper::http::{build_routes, AppState};
use slotkeeper::ledger::Ledger;
use slotkeeper::reservation::ReservationCoordinator;
use slotkeeper::session::HeaderSession;
use slotkeeper::slots::SlotGenerator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    slotkeeper::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let ledger = Arc::new(Ledger::open(&config.wal_path())?);

    let busy = match &config.busy_source_url {
        Some(url) => BusySource::present(HttpBusySource::new(url.clone(), config.deadlines.external)?),
        None => BusySource::Absent,
    };
    let bridge: Arc<dyn CalendarBridge> = match &config.calendar_bridge_url {
        Some(url) => Arc::new(HttpCalendarBridge::new(url.clone(), config.deadlines.external)?),
        None => Arc::new(NoopBridge),
    };

    let state = Arc::new(AppState {
        ledger: ledger.clone(),
        slots: SlotGenerator::new(ledger.clone(), ledger.clone(), busy, config.deadlines),
        coordinator: Arc::new(ReservationCoordinator::new(
            ledger.clone(),
            ledger.clone(),
            bridge,
            config.deadlines,
        )),
        session: Arc::new(HeaderSession),
    });

    tokio::spawn(slotkeeper::compactor::run_compactor(
        ledger.clone(),
        config.compact_threshold,
    ));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("slotkeeper listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  busy source: {}", config.busy_source_url.as_deref().unwrap_or("absent"));
    info!("  calendar bridge: {}", config.calendar_bridge_url.as_deref().unwrap_or("disabled"));
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let app = build_routes(state, config.request_timeout);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("slotkeeper stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. In-flight requests drain before `serve` returns.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining requests");
}
