use crate::arrivals::ArrivalsRefreshEngine;
use crate::catalog::StopCatalogStore;
use crate::client::TransitApi;
use crate::clock::SharedRefreshClock;
use crate::error::TransitError;
use crate::geo::{Coordinate, ViewportRegion};
use crate::pins::PinStore;
use crate::selection::{VisibleSet, VisibleStopSelector};
use crate::settings::Settings;

use compact_str::CompactString;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::debug;

/// Change notifications for anything observing the stores.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    CatalogReplaced { count: usize },
    ArrivalsUpdated { code: CompactString },
    PinsChanged,
    VisibleStopsChanged { visible: usize, nearby: usize },
}

/// What the map client last told us.
#[derive(Debug, Default)]
pub struct MapSession {
    pub user_position: Option<Coordinate>,
    pub viewport: Option<ViewportRegion>,
    pub radius_m: f64,
    pub location_error: Option<String>,
    pub visible: VisibleSet,
    pub nearby_codes: Vec<CompactString>,
    /// Stop whose detail view is open; refreshed on every clock tick.
    pub focused: Option<CompactString>,
}

pub struct AppState {
    pub settings: Settings,
    pub catalog: StopCatalogStore,
    pub arrivals: ArrivalsRefreshEngine,
    pub clock: SharedRefreshClock,
    pub pins: PinStore,
    pub selector: VisibleStopSelector,
    pub session: RwLock<MapSession>,
    pub events: broadcast::Sender<StoreEvent>,
    // Held across the working-set submit so the engine ends on the session's set.
    recompute_lock: Mutex<()>,
}

impl AppState {
    /// Must run inside a tokio runtime: the refresh clock starts ticking here.
    pub fn new(settings: Settings, api: Arc<dyn TransitApi>) -> Self {
        let (events, _) = broadcast::channel(256);

        let catalog = StopCatalogStore::new(api.clone(), &settings.data_dir, events.clone())
            .with_ttl(settings.catalog_ttl());
        let arrivals =
            ArrivalsRefreshEngine::new(api, settings.refresh_interval(), events.clone());
        let clock = SharedRefreshClock::start(settings.refresh_interval());
        let pins = PinStore::open(&settings.data_dir, events.clone());
        let selector = VisibleStopSelector::new(settings.zoom_policy());

        let session = MapSession {
            viewport: Some(settings.initial_viewport()),
            radius_m: settings.default_search_radius,
            ..MapSession::default()
        };

        Self {
            settings,
            catalog,
            arrivals,
            clock,
            pins,
            selector,
            session: RwLock::new(session),
            events,
            recompute_lock: Mutex::new(()),
        }
    }

    pub async fn set_user_position(&self, position: Coordinate) {
        {
            let mut session = self.session.write().await;
            session.user_position = Some(position);
            session.location_error = None;
        }
        self.recompute().await;
    }

    /// Location collaborator reported that access is unavailable.
    pub async fn set_location_denied(&self) {
        let mut session = self.session.write().await;
        session.location_error = Some(TransitError::PermissionDenied.to_string());
    }

    /// Call on "camera settled", not on every frame of a gesture.
    pub async fn set_viewport(&self, viewport: ViewportRegion) {
        self.session.write().await.viewport = Some(viewport);
        self.recompute().await;
    }

    pub async fn set_search_radius(&self, radius_m: f64) {
        self.session.write().await.radius_m = radius_m.max(0.0);
        self.recompute().await;
    }

    pub async fn focus(&self, code: Option<CompactString>) {
        self.session.write().await.focused = code;
    }

    /// Reruns the selector and, when the nearby list changed, hands it to the
    /// arrivals engine as the new working set.
    pub async fn recompute(&self) {
        let _recompute = self.recompute_lock.lock().await;
        let Some(catalog) = self.catalog.current().await else {
            return;
        };

        let mut session = self.session.write().await;
        let visible = self.selector.select(
            &catalog,
            session.user_position,
            session.radius_m,
            session.viewport.as_ref(),
        );
        let nearby = visible.nearby();
        let nearby_codes: Vec<CompactString> = nearby.iter().map(|s| s.code.clone()).collect();

        if visible.is_empty() {
            debug!("No stops in view");
        }
        let _ = self.events.send(StoreEvent::VisibleStopsChanged {
            visible: visible.len(),
            nearby: nearby.len(),
        });
        session.visible = visible;

        if nearby_codes == session.nearby_codes {
            return;
        }
        debug!(count = nearby_codes.len(), "Nearby stops changed");
        session.nearby_codes = nearby_codes;
        drop(session);

        if nearby.is_empty() {
            self.arrivals.stop_refreshing().await;
        } else {
            self.arrivals.submit_working_set(&nearby).await;
        }
    }
}
