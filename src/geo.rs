//! Great-circle distance helpers

use crate::types::Coordinates;

/// Mean Earth radius used for distance calculations
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points in kilometres
pub fn distance_km(from: &Coordinates, to: &Coordinates) -> f64 {
    let dlat = (to.latitude - from.latitude).to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + from.latitude.to_radians().cos()
            * to.latitude.to_radians().cos()
            * (dlon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

/// Distance between two optional locations, `None` if either is missing
pub fn distance_between(a: Option<Coordinates>, b: Option<Coordinates>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(distance_km(&a, &b)),
        _ => None,
    }
}

/// Human readable distance for notifications
pub fn format_distance(distance_km: f64) -> String {
    if distance_km < 1.0 {
        "< 1 km".to_string()
    } else {
        format!("{:.1} km", distance_km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn point(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates {
            latitude,
            longitude,
        }
    }

    #[test]
    fn test_known_distances() {
        let a = point(1.0, 1.0);
        let b = point(1.05, 1.0);
        let d = distance_km(&a, &b);
        assert!((d - 5.56).abs() < 0.01, "got {}", d);

        // Jakarta to Bandung
        let jakarta = point(-6.2088, 106.8456);
        let bandung = point(-6.9175, 107.6191);
        let d = distance_km(&jakarta, &bandung);
        assert!(d > 110.0 && d < 125.0, "got {}", d);
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_km(&point(10.0, 20.0), &point(-10.0, -160.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1.0);
    }

    #[test]
    fn test_distance_between_missing() {
        assert_eq!(distance_between(None, Some(point(1.0, 1.0))), None);
        assert!(distance_between(Some(point(1.0, 1.0)), Some(point(1.0, 1.0))).is_some());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.4), "< 1 km");
        assert_eq!(format_distance(1.0), "1.0 km");
        assert_eq!(format_distance(5.5597), "5.6 km");
        assert_eq!(format_distance(49.96), "50.0 km");
    }

    proptest! {
        #[test]
        fn distance_is_symmetric_and_non_negative(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let a = point(lat1, lon1);
            let b = point(lat2, lon2);
            let ab = distance_km(&a, &b);
            let ba = distance_km(&b, &a);
            prop_assert!(ab >= 0.0);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_KM + 1e-6);
        }

        #[test]
        fn distance_to_self_is_zero(lat in -90.0f64..90.0, lon in -180.0f64..180.0) {
            let a = point(lat, lon);
            prop_assert!(distance_km(&a, &a).abs() < 1e-9);
        }
    }
}
