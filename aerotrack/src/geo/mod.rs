//! Great-circle geometry helpers.
//!
//! All distances are in nautical miles and all angles in degrees. Two
//! distance functions are provided with different accuracy/cost tradeoffs:
//!
//! - [`haversine_nm`] - full great-circle distance, used for the derived
//!   `distance_nm` field and flight ground-track accumulation
//! - [`quick_distance_nm`] - cheap equirectangular approximation, used on
//!   hot paths (motion-plausibility filter, CPR sanity checks) where a few
//!   percent of error is irrelevant

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance between two coordinates in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_NM * c
}

/// Fast equirectangular distance approximation in nautical miles.
///
/// One arc-minute of latitude is one nautical mile; longitude minutes are
/// scaled by the cosine of the mean latitude. Good to a few percent at the
/// ranges a receiver can see, which is all the plausibility checks need.
pub fn quick_distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1) * 60.0;
    let avg_lat = (lat1 + lat2) / 2.0;
    let d_lon = (lon2 - lon1) * 60.0 * avg_lat.to_radians().cos();
    (d_lat * d_lat + d_lon * d_lon).sqrt()
}

/// Initial great-circle bearing from point 1 to point 2, in [0, 360).
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let x = d_lon.sin() * lat2_rad.cos();
    let y = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * d_lon.cos();

    (x.atan2(y).to_degrees() + 360.0) % 360.0
}

/// 16-point compass rose labels, clockwise from north.
const CARDINALS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Map a bearing in degrees to its 16-point compass label.
pub fn cardinal(bearing: f64) -> &'static str {
    let idx = ((bearing / 22.5).round() as usize) % 16;
    CARDINALS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        assert!(haversine_nm(33.0, -97.0, 33.0, -97.0).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        // One degree of latitude is 60 nautical miles by definition.
        let d = haversine_nm(33.0, -97.0, 34.0, -97.0);
        assert!((d - 60.0).abs() < 0.1, "expected ~60 nm, got {}", d);
    }

    #[test]
    fn test_haversine_receiver_to_aircraft() {
        // Receiver northwest of DFW to an aircraft southeast of it.
        let d = haversine_nm(33.2878, -96.9826, 33.1234, -96.7890);
        assert!((d - 13.9).abs() < 0.1, "expected ~13.9 nm, got {}", d);
    }

    #[test]
    fn test_quick_distance_tracks_haversine() {
        let exact = haversine_nm(33.2878, -96.9826, 33.1234, -96.7890);
        let quick = quick_distance_nm(33.2878, -96.9826, 33.1234, -96.7890);
        assert!(
            (exact - quick).abs() < exact * 0.02,
            "quick {} vs exact {}",
            quick,
            exact
        );
    }

    #[test]
    fn test_quick_distance_large_jump() {
        // Two degrees of latitude is 120 nm; the motion filter depends on
        // jumps like this being measured correctly.
        let d = quick_distance_nm(33.0, -97.0, 35.0, -97.0);
        assert!((d - 120.0).abs() < 1.0, "expected ~120 nm, got {}", d);
    }

    #[test]
    fn test_bearing_cardinal_points() {
        assert!((initial_bearing(33.0, -97.0, 34.0, -97.0) - 0.0).abs() < 0.1);
        assert!((initial_bearing(33.0, -97.0, 32.0, -97.0) - 180.0).abs() < 0.1);
        let east = initial_bearing(0.0, 0.0, 0.0, 1.0);
        assert!((east - 90.0).abs() < 0.1);
        let west = initial_bearing(0.0, 0.0, 0.0, -1.0);
        assert!((west - 270.0).abs() < 0.1);
    }

    #[test]
    fn test_bearing_southeast_aircraft() {
        let b = initial_bearing(33.2878, -96.9826, 33.1234, -96.7890);
        assert!((b - 134.5).abs() < 1.0, "expected ~134.5 deg, got {}", b);
        assert_eq!(cardinal(b), "SE");
    }

    #[test]
    fn test_cardinal_boundaries() {
        assert_eq!(cardinal(0.0), "N");
        assert_eq!(cardinal(11.0), "N");
        assert_eq!(cardinal(11.3), "NNE");
        assert_eq!(cardinal(90.0), "E");
        assert_eq!(cardinal(225.0), "SW");
        assert_eq!(cardinal(348.8), "N");
        assert_eq!(cardinal(359.9), "N");
    }
}
