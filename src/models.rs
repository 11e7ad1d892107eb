use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

// --- Stops ---

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stop {
    #[serde(rename = "BusStopCode")]
    pub code: CompactString,
    #[serde(rename = "RoadName")]
    pub road_name: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
}

impl Stop {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

// Identity is the stop code alone.
impl PartialEq for Stop {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Stop {}

impl Hash for Stop {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

/// One page of `/BusStops`, also the on-disk catalog layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct BusStopsResponse {
    pub value: Vec<Stop>,
}

// --- Arrivals (wire) ---

#[derive(Debug, Deserialize)]
pub struct BusArrivalResponse {
    #[serde(rename = "BusStopCode")]
    pub stop_code: CompactString,
    #[serde(rename = "Services", default)]
    pub services: Vec<ServiceWire>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceWire {
    #[serde(rename = "ServiceNo")]
    pub service_no: CompactString,
    #[serde(rename = "Operator")]
    pub operator: String,
    #[serde(rename = "NextBus")]
    pub next_bus: NextBusWire,
    #[serde(rename = "NextBus2")]
    pub next_bus_2: Option<NextBusWire>,
    #[serde(rename = "NextBus3")]
    pub next_bus_3: Option<NextBusWire>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NextBusWire {
    #[serde(rename = "EstimatedArrival", default)]
    pub estimated_arrival: String,
    #[serde(rename = "Load")]
    pub load: Option<String>,
    #[serde(rename = "Type")]
    pub vehicle_type: Option<String>,
    #[serde(rename = "Feature")]
    pub feature: Option<String>,
}

// --- Arrivals (domain) ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Load {
    #[serde(rename = "SEA")]
    SeatsAvailable,
    #[serde(rename = "SDA")]
    StandingAvailable,
    #[serde(rename = "LSD")]
    LimitedStanding,
}

impl Load {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "SEA" => Some(Self::SeatsAvailable),
            "SDA" => Some(Self::StandingAvailable),
            "LSD" => Some(Self::LimitedStanding),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SeatsAvailable => "Seats Available",
            Self::StandingAvailable => "Standing Available",
            Self::LimitedStanding => "Limited Standing",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VehicleType {
    #[serde(rename = "SD")]
    SingleDeck,
    #[serde(rename = "DD")]
    DoubleDeck,
    #[serde(rename = "BD")]
    Bendy,
}

impl VehicleType {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "SD" => Some(Self::SingleDeck),
            "DD" => Some(Self::DoubleDeck),
            "BD" => Some(Self::Bendy),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SingleDeck => "Single Deck",
            Self::DoubleDeck => "Double Deck",
            Self::Bendy => "Bendy",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictedArrival {
    pub estimated_arrival: DateTime<Utc>,
    pub load: Option<Load>,
    pub vehicle_type: Option<VehicleType>,
    pub wheelchair_accessible: Option<bool>,
}

impl PredictedArrival {
    /// Whole minutes until arrival, never negative.
    pub fn minutes_away(&self, now: DateTime<Utc>) -> i64 {
        (self.estimated_arrival - now).num_minutes().max(0)
    }

    pub fn arrival_text(&self, now: DateTime<Utc>) -> String {
        match self.minutes_away(now) {
            0 => "Arr".to_string(),
            m => m.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArrivalRecord {
    pub service_no: CompactString,
    pub operator: String,
    /// Up to three successive predictions, soonest first.
    pub arrivals: Vec<PredictedArrival>,
}

impl From<ServiceWire> for ArrivalRecord {
    fn from(service: ServiceWire) -> Self {
        let arrivals = std::iter::once(Some(service.next_bus))
            .chain([service.next_bus_2, service.next_bus_3])
            .flatten()
            .filter_map(|nb| predicted_arrival(&nb))
            .collect();

        Self {
            service_no: service.service_no,
            operator: service.operator,
            arrivals,
        }
    }
}

/// The upstream sends empty strings for follow-on buses that are not running;
/// those slots are dropped.
fn predicted_arrival(nb: &NextBusWire) -> Option<PredictedArrival> {
    let estimated_arrival = parse_timestamp(&nb.estimated_arrival)?;
    let feature = nb.feature.as_deref().filter(|f| !f.is_empty());

    Some(PredictedArrival {
        estimated_arrival,
        load: nb.load.as_deref().and_then(Load::from_code),
        vehicle_type: nb.vehicle_type.as_deref().and_then(VehicleType::from_code),
        wheelchair_accessible: feature.map(|f| f == "WAB"),
    })
}

/// ISO-8601 with an offset, fractional seconds optional.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Ordering used for service numbers: case-insensitive, with digit runs
/// compared by value so "2" sorts before "10".
pub fn compare_service_numbers(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ln = take_digits(&mut left);
                let rn = take_digits(&mut right);
                let lt = ln.trim_start_matches('0');
                let rt = rn.trim_start_matches('0');
                let ord = lt.len().cmp(&rt.len()).then_with(|| lt.cmp(rt));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
        digits.push(c);
    }
    digits
}
