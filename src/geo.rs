use geo::{HaversineDistance, Point, Rect, coord};
use serde::{Deserialize, Serialize};

/// WGS-84 position in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn to_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

impl From<Coordinate> for Point<f64> {
    fn from(c: Coordinate) -> Self {
        c.to_point()
    }
}

/// Great-circle distance in metres.
pub fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    a.to_point().haversine_distance(&b.to_point())
}

/// Rectangular map area. Containment is a plain box test in degree space,
/// not a geodesic one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewportRegion {
    pub center: Coordinate,
    pub lat_half_span: f64,
    pub lon_half_span: f64,
}

impl ViewportRegion {
    pub fn new(center: Coordinate, lat_half_span: f64, lon_half_span: f64) -> Self {
        Self {
            center,
            lat_half_span: lat_half_span.abs(),
            lon_half_span: lon_half_span.abs(),
        }
    }

    pub fn bounds(&self) -> Rect<f64> {
        Rect::new(
            coord! {
                x: self.center.longitude - self.lon_half_span,
                y: self.center.latitude - self.lat_half_span,
            },
            coord! {
                x: self.center.longitude + self.lon_half_span,
                y: self.center.latitude + self.lat_half_span,
            },
        )
    }

    /// Inclusive: stops on the edge of the map count as inside.
    pub fn contains(&self, coord: Coordinate) -> bool {
        let bounds = self.bounds();
        let (min, max) = (bounds.min(), bounds.max());
        let p = coord.to_point();

        (min.x..=max.x).contains(&p.x()) && (min.y..=max.y).contains(&p.y())
    }

    /// Smaller of the two full extents, in degrees. Drives the zoom budget.
    pub fn min_span(&self) -> f64 {
        (self.lat_half_span * 2.0).min(self.lon_half_span * 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = Coordinate::new(1.3521, 103.8198);
        assert_eq!(distance_m(p, p), 0.0);
    }

    #[test]
    fn test_distance_small_offset() {
        // 0.001 degrees on both axes at the equator is roughly 157 metres
        let d = distance_m(Coordinate::new(0.0, 0.0), Coordinate::new(0.001, 0.001));
        assert!((d - 157.2).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_viewport_contains_edges() {
        let vp = ViewportRegion::new(Coordinate::new(0.0, 0.0), 0.01, 0.02);
        assert!(vp.contains(Coordinate::new(0.01, 0.02)));
        assert!(vp.contains(Coordinate::new(-0.01, -0.02)));
        assert!(!vp.contains(Coordinate::new(0.0101, 0.0)));
        assert!(!vp.contains(Coordinate::new(0.0, -0.0201)));
    }

    #[test]
    fn test_point_axes() {
        let p = Coordinate::new(1.3521, 103.8198).to_point();
        assert_eq!(p.x(), 103.8198);
        assert_eq!(p.y(), 1.3521);
    }

    #[test]
    fn test_bounds_rect() {
        let vp = ViewportRegion::new(Coordinate::new(1.0, 100.0), 0.5, 0.25);
        let rect = vp.bounds();
        assert_eq!(rect.min(), coord! { x: 99.75, y: 0.5 });
        assert_eq!(rect.max(), coord! { x: 100.25, y: 1.5 });
    }

    #[test]
    fn test_min_span_uses_full_extent() {
        let vp = ViewportRegion::new(Coordinate::new(0.0, 0.0), 0.01, 0.004);
        assert!((vp.min_span() - 0.008).abs() < 1e-12);
    }
}
