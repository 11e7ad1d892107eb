//! Derives which stops matter right now from the user's position and the map
//! viewport.
//!
//! Two independent signals feed the result:
//! - proximity: every stop within the search radius, nearest first
//! - viewport: stops inside the visible box, nearest to its centre first,
//!   capped by a zoom-dependent budget
//!
//! The combined [`VisibleSet`] lists the nearby stops first and never repeats a
//! stop code.

use crate::catalog::StopCatalog;
use crate::geo::{Coordinate, ViewportRegion, distance_m};
use crate::models::Stop;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const SEARCH_LIMIT: usize = 50;

/// Stops within `radius_m` of `position`, ascending by distance.
pub fn nearby_stops(stops: &[Stop], position: Coordinate, radius_m: f64) -> Vec<Stop> {
    let mut nearby: Vec<(f64, &Stop)> = stops
        .iter()
        .map(|s| (distance_m(s.coordinate(), position), s))
        .filter(|(d, _)| *d <= radius_m)
        .collect();

    // Stable: equal distances keep catalog order.
    nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
    nearby.into_iter().map(|(_, s)| s.clone()).collect()
}

/// Every stop inside the viewport box, ascending by distance to its centre.
pub fn viewport_candidates<'a>(stops: &'a [Stop], viewport: &ViewportRegion) -> Vec<&'a Stop> {
    let mut in_region: Vec<(f64, &Stop)> = stops
        .iter()
        .filter(|s| viewport.contains(s.coordinate()))
        .map(|s| (distance_m(s.coordinate(), viewport.center), s))
        .collect();

    in_region.sort_by(|a, b| a.0.total_cmp(&b.0));
    in_region.into_iter().map(|(_, s)| s).collect()
}

/// At most `budget` viewport stops, closest to the centre first.
pub fn viewport_subset(stops: &[Stop], viewport: &ViewportRegion, budget: usize) -> Vec<Stop> {
    viewport_candidates(stops, viewport)
        .into_iter()
        .take(budget)
        .cloned()
        .collect()
}

/// Step function from viewport span (degrees) to the number of stops shown.
/// Tighter zoom shows more.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoomBudgetPolicy {
    pub zoomed_in_span: f64,
    pub medium_span: f64,
    pub zoomed_in: usize,
    pub medium: usize,
    pub zoomed_out: usize,
}

impl Default for ZoomBudgetPolicy {
    fn default() -> Self {
        Self {
            zoomed_in_span: 0.01,
            medium_span: 0.05,
            zoomed_in: 50,
            medium: 30,
            zoomed_out: 15,
        }
    }
}

impl ZoomBudgetPolicy {
    pub fn budget_for_span(&self, span: f64) -> usize {
        if span < self.zoomed_in_span {
            self.zoomed_in
        } else if span < self.medium_span {
            self.medium
        } else {
            self.zoomed_out
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VisibleSet {
    stops: Vec<Stop>,
    user_position: Option<Coordinate>,
    radius_m: f64,
}

impl VisibleSet {
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Visible stops within the search radius. Recomputed on each call.
    pub fn nearby(&self) -> Vec<Stop> {
        let Some(position) = self.user_position else {
            return Vec::new();
        };
        self.stops
            .iter()
            .filter(|s| distance_m(s.coordinate(), position) <= self.radius_m)
            .cloned()
            .collect()
    }

    pub fn codes(&self) -> Vec<CompactString> {
        self.stops.iter().map(|s| s.code.clone()).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct VisibleStopSelector {
    policy: ZoomBudgetPolicy,
}

impl VisibleStopSelector {
    pub fn new(policy: ZoomBudgetPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ZoomBudgetPolicy {
        &self.policy
    }

    pub fn select(
        &self,
        catalog: &StopCatalog,
        user_position: Option<Coordinate>,
        radius_m: f64,
        viewport: Option<&ViewportRegion>,
    ) -> VisibleSet {
        let mut result: Vec<Stop> = Vec::new();
        let mut seen: HashSet<CompactString> = HashSet::new();

        if let Some(position) = user_position {
            for stop in nearby_stops(catalog.stops(), position, radius_m) {
                if seen.insert(stop.code.clone()) {
                    result.push(stop);
                }
            }
        }

        if let Some(viewport) = viewport {
            // The budget counts the whole result, nearby stops included.
            // Duplicates within the first `budget` candidates are all nearby
            // stops, so the subset always has enough to fill the remainder.
            let budget = self.policy.budget_for_span(viewport.min_span());
            for stop in viewport_subset(catalog.stops(), viewport, budget) {
                if result.len() >= budget {
                    break;
                }
                if seen.insert(stop.code.clone()) {
                    result.push(stop);
                }
            }
        }

        VisibleSet {
            stops: result,
            user_position,
            radius_m,
        }
    }
}

/// Case-insensitive substring search over description, road name and code.
/// Takes the first `limit` matches, then orders them by distance when the user
/// position is known.
pub fn search_stops(
    stops: &[Stop],
    query: &str,
    user_position: Option<Coordinate>,
    limit: usize,
) -> Vec<Stop> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<Stop> = stops
        .iter()
        .filter(|s| {
            s.description.to_lowercase().contains(&query)
                || s.road_name.to_lowercase().contains(&query)
                || s.code.to_lowercase().contains(&query)
        })
        .take(limit)
        .cloned()
        .collect();

    if let Some(position) = user_position {
        matches.sort_by(|a, b| {
            distance_m(a.coordinate(), position).total_cmp(&distance_m(b.coordinate(), position))
        });
    }
    matches
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m", meters as i64)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}
