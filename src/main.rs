use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod arrivals;
mod catalog;
mod client;
mod clock;
mod error;
mod geo;
mod models;
mod persistence;
mod pins;
mod routes;
mod selection;
mod settings;
mod state;
#[cfg(test)]
mod testing;

use client::{DataMallClient, TransitApi};
use settings::Settings;
use state::{AppState, StoreEvent};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // 1. Configuration
    let settings = Settings::load().expect("invalid configuration");
    if settings.api_key.is_empty() {
        warn!("STOPWATCH_API_KEY is not set; upstream requests will be rejected");
    }
    let port = settings.port;

    // 2. Initialize State
    info!("Initializing application state");
    let api: Arc<dyn TransitApi> = Arc::new(DataMallClient::new(
        settings.base_url.clone(),
        settings.api_key.clone(),
    ));
    let state = Arc::new(AppState::new(settings, api));

    // 3. Recompute the visible set whenever the catalog is replaced
    let mut events = state.events.subscribe();
    let state_events = state.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StoreEvent::CatalogReplaced { count }) => {
                    info!(count, "Stop catalog replaced");
                    state_events.recompute().await;
                }
                Ok(StoreEvent::ArrivalsUpdated { code }) => debug!(code = %code, "Arrivals updated"),
                Ok(StoreEvent::VisibleStopsChanged { visible, nearby }) => {
                    debug!(visible, nearby, "Visible stops recomputed")
                }
                Ok(StoreEvent::PinsChanged) => debug!("Pins changed"),
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event listener lagged");
                    state_events.recompute().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 4. Initial catalog load (disk copy when fresh, otherwise upstream)
    let state_load = state.clone();
    tokio::spawn(async move {
        match state_load.catalog.get_catalog(false).await {
            Ok(catalog) => info!(count = catalog.len(), "Stop catalog ready"),
            Err(e) => warn!(error = %e, "Initial catalog load failed; retry via POST /catalog/refresh"),
        }
    });

    // 5. Focused stop follows the shared refresh clock
    let mut ticks = state.clock.subscribe();
    let state_clock = state.clone();
    tokio::spawn(async move {
        loop {
            match ticks.recv().await {
                Ok(tick) => {
                    let focused = state_clock.session.read().await.focused.clone();
                    if let Some(code) = focused {
                        debug!(seq = tick.seq, at = %tick.at, code = %code, "Refreshing focused stop");
                        state_clock.arrivals.refresh_stop(&code);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 6. HTTP Server
    info!(port, "Starting server");
    warp::serve(routes::routes(state))
        .run(([0, 0, 0, 0], port))
        .await;

    Ok(())
}
