use crate::arrivals::DEFAULT_REFRESH_INTERVAL;
use crate::catalog::DEFAULT_TTL_HOURS;
use crate::geo::{Coordinate, ViewportRegion};
use crate::selection::ZoomBudgetPolicy;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://datamall2.mytransport.sg/ltaodataservice";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub port: u16,

    pub max_stops_zoomed_in: usize,
    pub max_stops_medium_zoom: usize,
    pub max_stops_zoomed_out: usize,
    pub zoomed_in_span: f64,
    pub medium_zoom_span: f64,

    /// Metres.
    pub default_search_radius: f64,
    /// Seconds.
    pub arrival_refresh_interval: u64,
    pub catalog_ttl_hours: i64,

    pub show_wheelchair_accessible: bool,
    pub show_bus_type: bool,
    pub show_load_indicator: bool,

    pub initial_center_lat: f64,
    pub initial_center_lon: f64,
    pub initial_span: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from("./data"),
            port: 3000,
            max_stops_zoomed_in: 50,
            max_stops_medium_zoom: 30,
            max_stops_zoomed_out: 15,
            zoomed_in_span: 0.01,
            medium_zoom_span: 0.05,
            default_search_radius: 500.0,
            arrival_refresh_interval: DEFAULT_REFRESH_INTERVAL.as_secs(),
            catalog_ttl_hours: DEFAULT_TTL_HOURS,
            show_wheelchair_accessible: true,
            show_bus_type: true,
            show_load_indicator: true,
            initial_center_lat: 1.3521,
            initial_center_lon: 103.8198,
            initial_span: 0.05,
        }
    }
}

impl Settings {
    /// Defaults, then `Settings.toml` (or `$STOPWATCH_CONFIG`) if present, then
    /// `STOPWATCH_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("STOPWATCH_CONFIG").unwrap_or_else(|_| "Settings".to_string());
        Self::from_sources(File::with_name(&file).required(false))
    }

    fn from_sources<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("STOPWATCH").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn zoom_policy(&self) -> ZoomBudgetPolicy {
        ZoomBudgetPolicy {
            zoomed_in_span: self.zoomed_in_span,
            medium_span: self.medium_zoom_span,
            zoomed_in: self.max_stops_zoomed_in,
            medium: self.max_stops_medium_zoom,
            zoomed_out: self.max_stops_zoomed_out,
        }
    }

    pub fn catalog_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.catalog_ttl_hours.max(0))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.arrival_refresh_interval.max(1))
    }

    /// Map region shown before the client reports its camera.
    pub fn initial_viewport(&self) -> ViewportRegion {
        ViewportRegion::new(
            Coordinate::new(self.initial_center_lat, self.initial_center_lon),
            self.initial_span / 2.0,
            self.initial_span / 2.0,
        )
    }
}
