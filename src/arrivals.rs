use crate::client::TransitApi;
use crate::models::{ArrivalRecord, Stop, compare_service_numbers};
use crate::state::StoreEvent;

use compact_str::CompactString;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Stops kept fresh by the auto-refresh loop.
pub const MAX_WORKING_SET: usize = 8;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(20);

struct EngineInner {
    api: Arc<dyn TransitApi>,
    // Stop code -> latest successful arrivals (or empty after a failed first fetch)
    cache: DashMap<CompactString, Vec<ArrivalRecord>>,
    in_flight: DashSet<CompactString>,
    events: broadcast::Sender<StoreEvent>,
}

struct RefreshLoop {
    codes: Vec<CompactString>,
    cancel: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

impl RefreshLoop {
    fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Per-stop real-time arrivals with a periodic refresh of a bounded working set.
pub struct ArrivalsRefreshEngine {
    inner: Arc<EngineInner>,
    interval: Duration,
    refresh_loop: Mutex<Option<RefreshLoop>>,
}

impl ArrivalsRefreshEngine {
    pub fn new(
        api: Arc<dyn TransitApi>,
        interval: Duration,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                api,
                cache: DashMap::new(),
                in_flight: DashSet::new(),
                events,
            }),
            interval,
            refresh_loop: Mutex::new(None),
        }
    }

    /// Replaces the auto-refresh target with the first `MAX_WORKING_SET` stops.
    /// Stops without a fetch already running are fetched immediately.
    pub async fn submit_working_set(&self, stops: &[Stop]) {
        let codes: Vec<CompactString> = stops
            .iter()
            .take(MAX_WORKING_SET)
            .map(|s| s.code.clone())
            .collect();

        let mut current = self.refresh_loop.lock().await;
        if let Some(previous) = current.take() {
            previous.cancel();
        }

        for code in &codes {
            if !self.inner.in_flight.contains(code) {
                spawn_fetch(self.inner.clone(), code.clone());
            }
        }

        debug!(count = codes.len(), "Starting arrivals auto-refresh");
        *current = Some(start_loop(self.inner.clone(), codes, self.interval));
    }

    /// Cancels the auto-refresh loop. Fetches already running finish normally.
    pub async fn stop_refreshing(&self) {
        if let Some(previous) = self.refresh_loop.lock().await.take() {
            previous.cancel();
        }
    }

    pub async fn working_set(&self) -> Vec<CompactString> {
        self.refresh_loop
            .lock()
            .await
            .as_ref()
            .map(|l| l.codes.clone())
            .unwrap_or_default()
    }

    /// Forced single fetch, for consumers driven by the shared refresh clock.
    pub fn refresh_stop(&self, code: &str) {
        spawn_fetch(self.inner.clone(), CompactString::from(code));
    }

    /// Cached arrivals, or empty when nothing is cached. Never waits.
    pub fn get_arrivals(&self, code: &str) -> Vec<ArrivalRecord> {
        self.inner
            .cache
            .get(code)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn is_fetching(&self, code: &str) -> bool {
        self.inner.in_flight.contains(code)
    }

    /// True once any fetch for the stop has completed, so an empty result
    /// means "no buses" rather than "not loaded yet".
    pub fn has_attempted(&self, code: &str) -> bool {
        self.inner.cache.contains_key(code)
    }
}

fn start_loop(inner: Arc<EngineInner>, codes: Vec<CompactString>, interval: Duration) -> RefreshLoop {
    let (cancel, mut cancelled) = watch::channel(false);
    let loop_codes = codes.clone();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                // Sender dropped or cancel sent.
                _ = cancelled.changed() => {}
            }
            if *cancelled.borrow() || cancelled.has_changed().is_err() {
                break;
            }
            // Forced refresh: overlapping a still-running fetch is accepted.
            for code in &loop_codes {
                spawn_fetch(inner.clone(), code.clone());
            }
        }
        debug!("Arrivals auto-refresh loop stopped");
    });

    RefreshLoop {
        codes,
        cancel,
        _handle: handle,
    }
}

fn spawn_fetch(inner: Arc<EngineInner>, code: CompactString) {
    inner.in_flight.insert(code.clone());
    tokio::spawn(async move {
        fetch_stop(&inner, &code).await;
        inner.in_flight.remove(&code);
        let _ = inner.events.send(StoreEvent::ArrivalsUpdated { code });
    });
}

async fn fetch_stop(inner: &EngineInner, code: &CompactString) {
    match inner.api.fetch_arrivals(code).await {
        Ok(services) => {
            let mut records: Vec<ArrivalRecord> =
                services.into_iter().map(ArrivalRecord::from).collect();
            records.sort_by(|a, b| compare_service_numbers(&a.service_no, &b.service_no));
            inner.cache.insert(code.clone(), records);
        }
        Err(e) => {
            warn!(code = %code, error = %e, "Arrivals fetch failed");
            // Stale data beats no data; only a never-fetched stop becomes empty.
            inner.cache.entry(code.clone()).or_default();
        }
    }
}
