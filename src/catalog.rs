use crate::client::{PAGE_SIZE, TransitApi};
use crate::error::TransitError;
use crate::models::Stop;
use crate::persistence;
use crate::state::StoreEvent;

use chrono::{DateTime, Duration, Utc};
use compact_str::CompactString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{info, warn};

pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Full set of known stops. Replaced wholesale, never mutated in place.
#[derive(Debug)]
pub struct StopCatalog {
    stops: Vec<Stop>,
    index: HashMap<CompactString, usize>,
    fetched_at: DateTime<Utc>,
}

impl StopCatalog {
    /// Duplicate codes are dropped, first occurrence wins.
    pub fn from_stops(stops: Vec<Stop>, fetched_at: DateTime<Utc>) -> Self {
        let mut index = HashMap::with_capacity(stops.len());
        let mut unique = Vec::with_capacity(stops.len());
        for stop in stops {
            if index.contains_key(&stop.code) {
                continue;
            }
            index.insert(stop.code.clone(), unique.len());
            unique.push(stop);
        }
        Self {
            stops: unique,
            index,
            fetched_at,
        }
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn get(&self, code: &str) -> Option<&Stop> {
        self.index.get(code).map(|&i| &self.stops[i])
    }

    pub fn contains(&self, code: &str) -> bool {
        self.index.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }
}

pub struct StopCatalogStore {
    api: Arc<dyn TransitApi>,
    data_dir: PathBuf,
    ttl: Duration,
    current: RwLock<Option<Arc<StopCatalog>>>,
    // Serialises refreshes so concurrent callers share one network pass.
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
}

impl StopCatalogStore {
    pub fn new(
        api: Arc<dyn TransitApi>,
        data_dir: impl Into<PathBuf>,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self {
            api,
            data_dir: data_dir.into(),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            events,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// In-memory catalog, no I/O.
    pub async fn current(&self) -> Option<Arc<StopCatalog>> {
        self.current.read().await.clone()
    }

    /// Memory (within TTL) → disk copy → paginated network fetch.
    /// A forced refresh skips straight to the network.
    pub async fn get_catalog(&self, force_refresh: bool) -> Result<Arc<StopCatalog>, TransitError> {
        if !force_refresh {
            if let Some(catalog) = self.fresh().await {
                return Ok(catalog);
            }
        }

        let _guard = self.refresh_lock.lock().await;

        if !force_refresh {
            // Another caller may have refreshed while we waited.
            if let Some(catalog) = self.fresh().await {
                return Ok(catalog);
            }
            if let Some(stops) = self.load_from_disk().await {
                info!(count = stops.len(), "Loaded stop catalog from disk");
                return Ok(self.adopt(stops).await);
            }
        }

        let stops = self.fetch_all().await?;
        info!(count = stops.len(), "Fetched stop catalog from network");
        let catalog = self.adopt(stops).await;
        self.persist(catalog.clone()).await;
        Ok(catalog)
    }

    async fn fresh(&self) -> Option<Arc<StopCatalog>> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|c| !c.is_empty() && c.age(Utc::now()) < self.ttl)
            .cloned()
    }

    async fn fetch_all(&self) -> Result<Vec<Stop>, TransitError> {
        let mut all = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.api.fetch_stops_page(skip).await?;
            let count = page.len();
            all.extend(page);
            if count < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }
        Ok(all)
    }

    async fn adopt(&self, stops: Vec<Stop>) -> Arc<StopCatalog> {
        let catalog = Arc::new(StopCatalog::from_stops(stops, Utc::now()));
        *self.current.write().await = Some(catalog.clone());
        let _ = self.events.send(StoreEvent::CatalogReplaced {
            count: catalog.len(),
        });
        catalog
    }

    async fn load_from_disk(&self) -> Option<Vec<Stop>> {
        let dir = self.data_dir.clone();
        match tokio::task::spawn_blocking(move || persistence::load_catalog(&dir)).await {
            Ok(Ok(stops)) => stops.filter(|s| !s.is_empty()),
            Ok(Err(e)) => {
                warn!(error = %e, "Ignoring unreadable catalog cache");
                None
            }
            Err(e) => {
                warn!(error = %e, "Catalog cache load task failed");
                None
            }
        }
    }

    async fn persist(&self, catalog: Arc<StopCatalog>) {
        let dir = self.data_dir.clone();
        let result =
            tokio::task::spawn_blocking(move || persistence::save_catalog(catalog.stops(), &dir))
                .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to save stop catalog to disk"),
            Err(e) => warn!(error = %e, "Catalog save task failed"),
        }
    }
}
