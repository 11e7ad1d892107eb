use crate::geo::{Coordinate, ViewportRegion, distance_m};
use crate::models::{ArrivalRecord, Stop};
use crate::selection::{SEARCH_LIMIT, format_distance, search_stops};
use crate::settings::Settings;
use crate::state::AppState;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, warn};
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus, json, with_status};

// --- Views ---

#[derive(Serialize)]
struct StopView {
    code: CompactString,
    road_name: String,
    description: String,
    latitude: f64,
    longitude: f64,
    pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<String>,
}

impl StopView {
    fn new(stop: &Stop, pinned: bool, user: Option<Coordinate>) -> Self {
        Self {
            code: stop.code.clone(),
            road_name: stop.road_name.clone(),
            description: stop.description.clone(),
            latitude: stop.latitude,
            longitude: stop.longitude,
            pinned,
            distance: user.map(|p| format_distance(distance_m(stop.coordinate(), p))),
        }
    }
}

#[derive(Serialize)]
struct ArrivalView {
    estimated_arrival: DateTime<Utc>,
    minutes: i64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    load: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vehicle_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wheelchair_accessible: Option<bool>,
}

#[derive(Serialize)]
struct ServiceView {
    service_no: CompactString,
    operator: String,
    arrivals: Vec<ArrivalView>,
}

impl ServiceView {
    /// Applies the display toggles from settings.
    fn new(record: &ArrivalRecord, settings: &Settings, now: DateTime<Utc>) -> Self {
        let arrivals = record
            .arrivals
            .iter()
            .map(|a| ArrivalView {
                estimated_arrival: a.estimated_arrival,
                minutes: a.minutes_away(now),
                text: a.arrival_text(now),
                load: a
                    .load
                    .filter(|_| settings.show_load_indicator)
                    .map(|l| l.description()),
                vehicle_type: a
                    .vehicle_type
                    .filter(|_| settings.show_bus_type)
                    .map(|t| t.description()),
                wheelchair_accessible: a
                    .wheelchair_accessible
                    .filter(|_| settings.show_wheelchair_accessible),
            })
            .collect();

        Self {
            service_no: record.service_no.clone(),
            operator: record.operator.clone(),
            arrivals,
        }
    }
}

#[derive(Serialize)]
struct StopArrivalsView {
    code: CompactString,
    loading: bool,
    attempted: bool,
    services: Vec<ServiceView>,
}

fn stop_arrivals(state: &AppState, code: &str) -> StopArrivalsView {
    let now = Utc::now();
    StopArrivalsView {
        code: CompactString::from(code),
        loading: state.arrivals.is_fetching(code),
        attempted: state.arrivals.has_attempted(code),
        services: state
            .arrivals
            .get_arrivals(code)
            .iter()
            .map(|r| ServiceView::new(r, &state.settings, now))
            .collect(),
    }
}

#[derive(Serialize)]
struct NearbyView {
    #[serde(flatten)]
    stop: StopView,
    arrivals: StopArrivalsView,
}

#[derive(Serialize)]
struct ErrorView {
    error: String,
    network: bool,
    retry: bool,
}

#[derive(Serialize)]
struct SessionView {
    user_position: Option<Coordinate>,
    viewport: Option<ViewportRegion>,
    radius_m: f64,
    location_error: Option<String>,
    focused: Option<CompactString>,
    visible: Vec<CompactString>,
    nearby: Vec<CompactString>,
    budget: Option<usize>,
}

#[derive(Serialize)]
struct CatalogView {
    count: usize,
    fetched_at: DateTime<Utc>,
    age_secs: i64,
}

// --- Requests ---

#[derive(Deserialize)]
struct PositionUpdate {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    denied: bool,
}

#[derive(Deserialize)]
struct ViewportUpdate {
    latitude: f64,
    longitude: f64,
    lat_half_span: f64,
    lon_half_span: f64,
}

#[derive(Deserialize)]
struct RadiusUpdate {
    meters: f64,
}

#[derive(Deserialize)]
struct PeriodUpdate {
    period_secs: u64,
}

// --- Handlers ---

async fn visible_stops(state: Arc<AppState>) -> Result<Json, Infallible> {
    let session = state.session.read().await;
    let user = session.user_position;
    let mut views = Vec::with_capacity(session.visible.len());
    for stop in session.visible.stops() {
        let pinned = state.pins.is_pinned(&stop.code).await;
        views.push(StopView::new(stop, pinned, user));
    }
    Ok(json(&views))
}

async fn nearby_stops(state: Arc<AppState>) -> Result<Json, Infallible> {
    let session = state.session.read().await;
    let user = session.user_position;
    let mut views = Vec::new();
    for stop in session.visible.nearby() {
        let pinned = state.pins.is_pinned(&stop.code).await;
        views.push(NearbyView {
            arrivals: stop_arrivals(&state, &stop.code),
            stop: StopView::new(&stop, pinned, user),
        });
    }
    Ok(json(&views))
}

async fn search(
    query: HashMap<String, String>,
    state: Arc<AppState>,
) -> Result<Json, Infallible> {
    let Some(catalog) = state.catalog.current().await else {
        return Ok(json(&Vec::<StopView>::new()));
    };
    let text = query.get("q").map(String::as_str).unwrap_or_default();
    let user = state.session.read().await.user_position;

    let mut views = Vec::new();
    for stop in search_stops(catalog.stops(), text, user, SEARCH_LIMIT) {
        let pinned = state.pins.is_pinned(&stop.code).await;
        views.push(StopView::new(&stop, pinned, user));
    }
    Ok(json(&views))
}

async fn pinned_stops(state: Arc<AppState>) -> Result<Json, Infallible> {
    let Some(catalog) = state.catalog.current().await else {
        return Ok(json(&Vec::<StopView>::new()));
    };
    let user = state.session.read().await.user_position;
    let views: Vec<StopView> = state
        .pins
        .pinned_stops(&catalog)
        .await
        .iter()
        .map(|s| StopView::new(s, true, user))
        .collect();
    Ok(json(&views))
}

async fn session_state(state: Arc<AppState>) -> Result<Json, Infallible> {
    let session = state.session.read().await;
    let view = SessionView {
        user_position: session.user_position,
        viewport: session.viewport,
        radius_m: session.radius_m,
        location_error: session.location_error.clone(),
        focused: session.focused.clone(),
        visible: session.visible.codes(),
        nearby: session.nearby_codes.clone(),
        budget: session
            .viewport
            .map(|vp| state.selector.policy().budget_for_span(vp.min_span())),
    };
    Ok(json(&view))
}

async fn update_position(
    update: PositionUpdate,
    state: Arc<AppState>,
) -> Result<WithStatus<Json>, Infallible> {
    if update.denied {
        state.set_location_denied().await;
        return Ok(with_status(json(&"denied"), StatusCode::OK));
    }
    match (update.latitude, update.longitude) {
        (Some(lat), Some(lon)) => {
            state.set_user_position(Coordinate::new(lat, lon)).await;
            Ok(with_status(json(&"ok"), StatusCode::OK))
        }
        _ => Ok(with_status(
            json(&"latitude and longitude required"),
            StatusCode::BAD_REQUEST,
        )),
    }
}

async fn update_viewport(update: ViewportUpdate, state: Arc<AppState>) -> Result<Json, Infallible> {
    let viewport = ViewportRegion::new(
        Coordinate::new(update.latitude, update.longitude),
        update.lat_half_span,
        update.lon_half_span,
    );
    state.set_viewport(viewport).await;
    Ok(json(&state.session.read().await.visible.len()))
}

async fn update_radius(update: RadiusUpdate, state: Arc<AppState>) -> Result<Json, Infallible> {
    state.set_search_radius(update.meters).await;
    Ok(json(&state.session.read().await.nearby_codes))
}

async fn arrivals_for(code: String, state: Arc<AppState>) -> Result<WithStatus<Json>, Infallible> {
    if let Some(catalog) = state.catalog.current().await {
        if !catalog.contains(&code) {
            return Ok(with_status(json(&"unknown stop"), StatusCode::NOT_FOUND));
        }
    }
    let code = CompactString::from(code);
    let focus_changed = state.session.read().await.focused.as_ref() != Some(&code);
    if focus_changed {
        state.focus(Some(code.clone())).await;
        if !state.arrivals.is_fetching(&code) && !state.arrivals.has_attempted(&code) {
            state.arrivals.refresh_stop(&code);
        }
    }
    Ok(with_status(json(&stop_arrivals(&state, &code)), StatusCode::OK))
}

async fn working_set(state: Arc<AppState>) -> Result<Json, Infallible> {
    Ok(json(&state.arrivals.working_set().await))
}

async fn clear_focus(state: Arc<AppState>) -> Result<Json, Infallible> {
    state.focus(None).await;
    Ok(json(&"ok"))
}

#[derive(Clone, Copy)]
enum PinAction {
    Pin,
    Unpin,
    Toggle,
}

async fn change_pin(
    code: String,
    action: PinAction,
    state: Arc<AppState>,
) -> Result<WithStatus<Json>, Infallible> {
    let stop = match state.catalog.current().await {
        Some(catalog) => catalog.get(&code).cloned(),
        None => None,
    };
    let Some(stop) = stop else {
        return Ok(with_status(json(&"unknown stop"), StatusCode::NOT_FOUND));
    };

    let pinned = match action {
        PinAction::Pin => {
            state.pins.pin(&stop).await;
            true
        }
        PinAction::Unpin => {
            state.pins.unpin(&stop).await;
            false
        }
        PinAction::Toggle => state.pins.toggle(&stop).await,
    };
    Ok(with_status(json(&pinned), StatusCode::OK))
}

async fn clock_state(state: Arc<AppState>) -> Result<Json, Infallible> {
    Ok(json(&serde_json::json!({
        "countdown": state.clock.countdown(),
        "just_refreshed": state.clock.just_refreshed(),
    })))
}

async fn update_period(update: PeriodUpdate, state: Arc<AppState>) -> Result<Json, Infallible> {
    state
        .clock
        .set_period(std::time::Duration::from_secs(update.period_secs));
    state.clock.reset_countdown();
    Ok(json(&state.clock.countdown()))
}

async fn catalog_status(state: Arc<AppState>) -> Result<WithStatus<Json>, Infallible> {
    let Some(catalog) = state.catalog.current().await else {
        return Ok(with_status(json(&"catalog not loaded"), StatusCode::SERVICE_UNAVAILABLE));
    };
    let view = CatalogView {
        count: catalog.len(),
        fetched_at: catalog.fetched_at(),
        age_secs: catalog.age(Utc::now()).num_seconds(),
    };
    Ok(with_status(json(&view), StatusCode::OK))
}

async fn refresh_catalog(state: Arc<AppState>) -> Result<WithStatus<Json>, Infallible> {
    match state.catalog.get_catalog(true).await {
        Ok(catalog) => {
            info!(count = catalog.len(), "Catalog refreshed on request");
            Ok(with_status(json(&catalog.len()), StatusCode::OK))
        }
        Err(e) => {
            warn!(error = %e, "Catalog refresh failed");
            let view = ErrorView {
                error: e.to_string(),
                network: e.is_network(),
                retry: true,
            };
            Ok(with_status(json(&view), StatusCode::BAD_GATEWAY))
        }
    }
}

// --- Filters ---

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    let visible = warp::path!("stops" / "visible")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(visible_stops);

    let nearby = warp::path!("stops" / "nearby")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(nearby_stops);

    let search_route = warp::path!("stops" / "search")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(state_filter.clone())
        .and_then(search);

    let pinned = warp::path!("stops" / "pinned")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(pinned_stops);

    let session = warp::path!("session")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(session_state);

    let position = warp::path!("session" / "position")
        .and(warp::put())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(update_position);

    let viewport = warp::path!("session" / "viewport")
        .and(warp::put())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(update_viewport);

    let radius = warp::path!("session" / "radius")
        .and(warp::put())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(update_radius);

    let arrivals = warp::path!("arrivals" / String)
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(arrivals_for);

    let refreshing = warp::path!("arrivals")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(working_set);

    let unfocus = warp::path!("arrivals")
        .and(warp::delete())
        .and(state_filter.clone())
        .and_then(clear_focus);

    let pins = warp::path!("pins")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(|state: Arc<AppState>| async move {
            Ok::<_, Infallible>(json(&state.pins.codes().await))
        });

    let pin = warp::path!("pins" / String)
        .and(warp::put())
        .map(|code| (code, PinAction::Pin))
        .untuple_one()
        .and(state_filter.clone())
        .and_then(change_pin);

    let unpin = warp::path!("pins" / String)
        .and(warp::delete())
        .map(|code| (code, PinAction::Unpin))
        .untuple_one()
        .and(state_filter.clone())
        .and_then(change_pin);

    let toggle = warp::path!("pins" / String / "toggle")
        .and(warp::post())
        .map(|code| (code, PinAction::Toggle))
        .untuple_one()
        .and(state_filter.clone())
        .and_then(change_pin);

    let clock = warp::path!("clock")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(clock_state);

    let period = warp::path!("clock")
        .and(warp::put())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(update_period);

    let catalog = warp::path!("catalog")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(catalog_status);

    let refresh = warp::path!("catalog" / "refresh")
        .and(warp::post())
        .and(state_filter)
        .and_then(refresh_catalog);

    visible
        .or(nearby)
        .or(search_route)
        .or(pinned)
        .or(session)
        .or(position)
        .or(viewport)
        .or(radius)
        .or(arrivals)
        .or(refreshing)
        .or(unfocus)
        .or(pins)
        .or(pin)
        .or(unpin)
        .or(toggle)
        .or(clock)
        .or(period)
        .or(catalog)
        .or(refresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, service, stop};

    async fn app() -> (Arc<AppState>, Arc<FakeApi>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::with_stops(vec![
            stop("1", 0.0, 0.0),
            stop("2", 0.001, 0.001),
            stop("3", 10.0, 10.0),
        ]));
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let state = Arc::new(AppState::new(settings, api.clone()));
        state.catalog.get_catalog(false).await.unwrap();
        (state, api, dir)
    }

    #[tokio::test]
    async fn test_position_then_visible() {
        let (state, _api, _dir) = app().await;
        let filter = routes(state.clone());

        let resp = warp::test::request()
            .method("PUT")
            .path("/session/position")
            .json(&serde_json::json!({"latitude": 0.0, "longitude": 0.0}))
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), 200);

        let resp = warp::test::request()
            .path("/stops/visible")
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        let codes: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["1", "2"]);
        assert_eq!(body[0]["distance"], "0m");
    }

    #[tokio::test]
    async fn test_position_requires_coordinates() {
        let (state, _api, _dir) = app().await;
        let resp = warp::test::request()
            .method("PUT")
            .path("/session/position")
            .json(&serde_json::json!({"latitude": 1.0}))
            .reply(&routes(state))
            .await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_pin_unknown_stop_is_404() {
        let (state, _api, _dir) = app().await;
        let resp = warp::test::request()
            .method("PUT")
            .path("/pins/999")
            .reply(&routes(state))
            .await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_toggle_pin() {
        let (state, _api, _dir) = app().await;
        let filter = routes(state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/pins/2/toggle")
            .reply(&filter)
            .await;
        assert_eq!(&resp.body()[..], b"true");
        assert!(state.pins.is_pinned("2").await);

        let resp = warp::test::request().path("/stops/pinned").reply(&filter).await;
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body[0]["code"], "2");
        assert_eq!(body[0]["pinned"], true);
    }

    #[tokio::test]
    async fn test_arrivals_respects_display_toggles() {
        let (state, api, _dir) = app().await;
        api.set_arrivals("1", vec![service("12")]);
        state.arrivals.refresh_stop("1");
        for _ in 0..20 {
            if state.arrivals.has_attempted("1") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let record = &state.arrivals.get_arrivals("1")[0];
        let hidden = Settings {
            show_load_indicator: false,
            show_bus_type: false,
            ..Settings::default()
        };
        let view = ServiceView::new(record, &hidden, Utc::now());
        assert!(view.arrivals[0].load.is_none());
        assert!(view.arrivals[0].vehicle_type.is_none());
        assert_eq!(view.arrivals[0].wheelchair_accessible, Some(true));

        let shown = ServiceView::new(record, &Settings::default(), Utc::now());
        assert_eq!(shown.arrivals[0].load, Some("Seats Available"));
        assert_eq!(shown.arrivals[0].vehicle_type, Some("Double Deck"));
    }

    #[tokio::test]
    async fn test_catalog_refresh_failure_offers_retry() {
        let (state, api, _dir) = app().await;
        api.fail_stops_at(0);

        let resp = warp::test::request()
            .method("POST")
            .path("/catalog/refresh")
            .reply(&routes(state.clone()))
            .await;

        assert_eq!(resp.status(), 502);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["retry"], true);
        assert_eq!(body["network"], true);
        assert_eq!(state.catalog.current().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_clock_period_update_resets_countdown() {
        let (state, _api, _dir) = app().await;
        let resp = warp::test::request()
            .method("PUT")
            .path("/clock")
            .json(&serde_json::json!({"period_secs": 45}))
            .reply(&routes(state.clone()))
            .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(state.clock.countdown(), 45);
    }

    #[tokio::test]
    async fn test_arrivals_route_focuses_stop() {
        let (state, _api, _dir) = app().await;
        let resp = warp::test::request()
            .path("/arrivals/3")
            .reply(&routes(state.clone()))
            .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            state.session.read().await.focused.as_deref(),
            Some("3")
        );

        let resp = warp::test::request()
            .path("/arrivals/999")
            .reply(&routes(state))
            .await;
        assert_eq!(resp.status(), 404);
    }
}
