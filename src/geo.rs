//! Great-circle distance between coordinate pairs.
//!
//! Haversine on the mean Earth radius. Accuracy is the standard haversine
//! bound (~0.5% against the true geodesic), which is more than enough for
//! zone containment at the radii this system works with.

use crate::model::Coordinates;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
///
/// Pure and deterministic: same inputs, same output, no side effects.
/// `distance_meters(p, p) == 0` and the function is symmetric in its
/// arguments.
pub fn distance_meters(a: &Coordinates, b: &Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates {
            latitude,
            longitude,
        }
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        for p in [
            point(0.0, 0.0),
            point(48.8566, 2.3522),
            point(-90.0, 0.0),
            point(13.7563, 100.5018),
        ] {
            assert_eq!(distance_meters(&p, &p), 0.0);
        }
    }

    #[test]
    fn test_symmetry() {
        let a = point(40.7128, -74.0060); // NYC
        let b = point(51.5074, -0.1278); // London
        assert_eq!(distance_meters(&a, &b), distance_meters(&b, &a));
    }

    #[test]
    fn test_known_distances() {
        // NYC to London: ~5,570 km.
        let nyc = point(40.7128, -74.0060);
        let london = point(51.5074, -0.1278);
        let d = distance_meters(&nyc, &london);
        assert!((d - 5_570_000.0).abs() < 30_000.0, "got {d}");

        // One degree of latitude at the equator: ~111.2 km.
        let d = distance_meters(&point(0.0, 0.0), &point(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn test_short_distance() {
        // ~100 m apart along a meridian.
        let a = point(13.7563, 100.5018);
        let b = point(13.7563 + 0.0009, 100.5018);
        let d = distance_meters(&a, &b);
        assert!((d - 100.0).abs() < 1.0, "got {d}");
    }
}
