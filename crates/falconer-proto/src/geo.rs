const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Point `north_m` meters north of (lat, lon) along the meridian.
pub fn offset_north(lat: f64, lon: f64, north_m: f64) -> (f64, f64) {
    (lat + (north_m / EARTH_RADIUS_M).to_degrees(), lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_m(47.4, 8.5, 47.4, 8.5), 0.0);
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_offset_north_round_trips_distance() {
        let (lat, lon) = offset_north(47.3977, 8.5456, 12.5);
        let d = haversine_m(47.3977, 8.5456, lat, lon);
        assert!((d - 12.5).abs() < 1e-6, "got {}", d);
    }
}
