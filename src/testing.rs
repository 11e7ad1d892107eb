//! In-process stand-in for the upstream API, shared by the unit tests.

use crate::client::{PAGE_SIZE, TransitApi};
use crate::error::TransitError;
use crate::models::{NextBusWire, ServiceWire, Stop};

use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn stop(code: &str, lat: f64, lon: f64) -> Stop {
    Stop {
        code: code.into(),
        road_name: format!("{} Road", code),
        description: format!("Stop {}", code),
        latitude: lat,
        longitude: lon,
    }
}

pub fn service(no: &str) -> ServiceWire {
    ServiceWire {
        service_no: no.into(),
        operator: "SBST".to_string(),
        next_bus: NextBusWire {
            estimated_arrival: (Utc::now() + chrono::Duration::minutes(4)).to_rfc3339(),
            load: Some("SEA".to_string()),
            vehicle_type: Some("DD".to_string()),
            feature: Some("WAB".to_string()),
        },
        next_bus_2: None,
        next_bus_3: None,
    }
}

#[derive(Default)]
pub struct FakeApi {
    stops: Mutex<Vec<Stop>>,
    fail_stops_at: Mutex<Option<usize>>,
    // Codes without an entry answer with a 503.
    arrivals: Mutex<HashMap<String, Vec<ServiceWire>>>,
    arrival_delay: Mutex<Option<Duration>>,
    page_calls: AtomicUsize,
    arrival_calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn with_stops(stops: Vec<Stop>) -> Self {
        let api = Self::default();
        api.set_stops(stops);
        api
    }

    pub fn set_stops(&self, stops: Vec<Stop>) {
        *self.stops.lock().unwrap() = stops;
    }

    pub fn fail_stops_at(&self, skip: usize) {
        *self.fail_stops_at.lock().unwrap() = Some(skip);
    }

    pub fn set_arrivals(&self, code: &str, services: Vec<ServiceWire>) {
        self.arrivals
            .lock()
            .unwrap()
            .insert(code.to_string(), services);
    }

    pub fn clear_arrivals(&self, code: &str) {
        self.arrivals.lock().unwrap().remove(code);
    }

    pub fn set_arrival_delay(&self, delay: Duration) {
        *self.arrival_delay.lock().unwrap() = Some(delay);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn arrival_calls(&self) -> Vec<String> {
        self.arrival_calls.lock().unwrap().clone()
    }

    pub fn arrival_calls_for(&self, code: &str) -> usize {
        self.arrival_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == code)
            .count()
    }
}

impl TransitApi for FakeApi {
    fn fetch_stops_page(&self, skip: usize) -> BoxFuture<'_, Result<Vec<Stop>, TransitError>> {
        Box::pin(async move {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_stops_at.lock().unwrap() == Some(skip) {
                return Err(TransitError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let stops = self.stops.lock().unwrap();
            Ok(stops.iter().skip(skip).take(PAGE_SIZE).cloned().collect())
        })
    }

    fn fetch_arrivals<'a>(
        &'a self,
        stop_code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ServiceWire>, TransitError>> {
        Box::pin(async move {
            self.arrival_calls
                .lock()
                .unwrap()
                .push(stop_code.to_string());
            let delay = *self.arrival_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let arrivals = self.arrivals.lock().unwrap();
            arrivals
                .get(stop_code)
                .cloned()
                .ok_or_else(|| TransitError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                })
        })
    }
}
