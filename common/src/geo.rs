//! Geographic primitives shared across the dispatch core.
//!
//! One haversine, one point type, one polyline decoder. Coordinates are
//! stored GeoJSON-style (`[lng, lat]`) on the wire but carried as explicit
//! `lat`/`lng` fields in process.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 point. Serializes as a GeoJSON `Point`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "GeoJsonPoint", into = "GeoJsonPoint")]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to another point, in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Wire shape: `{"type": "Point", "coordinates": [lng, lat]}`.
#[derive(Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: [f64; 2],
}

impl From<GeoJsonPoint> for GeoPoint {
    fn from(p: GeoJsonPoint) -> Self {
        Self {
            lat: p.coordinates[1],
            lng: p.coordinates[0],
        }
    }
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(p: GeoPoint) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [p.lng, p.lat],
        }
    }
}

/// GeoJSON-ordered point constructor.
pub fn to_point(lat: f64, lng: f64) -> GeoPoint {
    GeoPoint::new(lat, lng)
}

/// Great-circle distance between two lat/lng pairs, in kilometres.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Decodes a standard 1e5-scaled delta-encoded polyline.
///
/// Truncated input yields the points decoded so far; the decoder never
/// panics on malformed data.
pub fn decode_polyline(encoded: &str) -> Vec<GeoPoint> {
    let bytes = encoded.as_bytes();
    let mut index = 0usize;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;
    let mut out = Vec::new();

    while index < bytes.len() {
        let Some(delta_lat) = decode_varint(bytes, &mut index) else {
            break;
        };
        let Some(delta_lng) = decode_varint(bytes, &mut index) else {
            break;
        };
        lat += delta_lat;
        lng += delta_lng;

        out.push(GeoPoint::new(lat as f64 / 1e5, lng as f64 / 1e5));
    }

    out
}

fn decode_varint(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut result: i64 = 0;
    let mut shift = 0u32;

    loop {
        let b = (*bytes.get(*index)? as i64) - 63;
        *index += 1;
        if b < 0 {
            return None;
        }
        result |= (b & 0x1f) << shift;
        shift += 5;
        if b < 0x20 {
            break;
        }
    }

    // Zig-zag: LSB is the sign bit.
    if result & 1 != 0 {
        Some(!(result >> 1))
    } else {
        Some(result >> 1)
    }
}

/// Degree bounding box enclosing a radius around a point, as
/// `(lat_min, lat_max, lng_min, lng_max)`. A coarse prefilter for SQL
/// range scans; callers re-check with [`haversine_km`].
pub fn bounding_box(center: &GeoPoint, radius_m: u32) -> (f64, f64, f64, f64) {
    let radius_km = radius_m as f64 / 1000.0;
    let dlat = radius_km / 111.0;
    // Longitude degrees shrink with latitude; clamp the cosine away from
    // zero so polar inputs stay finite.
    let dlng = radius_km / (111.0 * center.lat.to_radians().cos().abs().max(0.01));
    (
        center.lat - dlat,
        center.lat + dlat,
        center.lng - dlng,
        center.lng + dlng,
    )
}

/// Minimum distance from `point` to any vertex of a decoded polyline.
/// Returns a sentinel 9999 km for an empty polyline.
pub fn distance_point_to_polyline_km(point: &GeoPoint, polyline: &[GeoPoint]) -> f64 {
    polyline
        .iter()
        .map(|p| point.distance_km(p))
        .fold(9999.0_f64, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_same_point() {
        assert!(haversine_km(12.97, 77.59, 12.97, 77.59).abs() < 1e-9);
    }

    #[test]
    fn haversine_known_city_pair() {
        // Bangalore -> Chennai is roughly 290 km.
        let d = haversine_km(12.9716, 77.5946, 13.0827, 80.2707);
        assert!((d - 290.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = haversine_km(12.97, 77.59, 13.08, 80.27);
        let b = haversine_km(13.08, 80.27, 12.97, 77.59);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn point_serializes_as_geojson() {
        let p = to_point(12.97, 77.59);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"type":"Point","coordinates":[77.59,12.97]}"#);

        let back: GeoPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn decodes_reference_polyline() {
        // Reference vector from the polyline format documentation.
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        assert_eq!(points.len(), 3);
        assert!((points[0].lat - 38.5).abs() < 1e-5);
        assert!((points[0].lng - -120.2).abs() < 1e-5);
        assert!((points[1].lat - 40.7).abs() < 1e-5);
        assert!((points[2].lng - -126.453).abs() < 1e-5);
    }

    #[test]
    fn truncated_polyline_keeps_decoded_prefix() {
        let full = decode_polyline("_p~iF~ps|U_ulLnnqC");
        assert_eq!(full.len(), 2);

        let truncated = decode_polyline("_p~iF~ps|U_ulL");
        assert_eq!(truncated.len(), 1);
    }

    #[test]
    fn empty_polyline_decodes_to_nothing() {
        assert!(decode_polyline("").is_empty());
    }

    #[test]
    fn bounding_box_contains_radius() {
        let center = GeoPoint::new(12.97, 77.59);
        let (lat_min, lat_max, lng_min, lng_max) = bounding_box(&center, 5_000);

        // A point 4.9 km due north stays inside the box.
        let north = GeoPoint::new(12.97 + 4.9 / 111.0, 77.59);
        assert!(north.lat > lat_min && north.lat < lat_max);
        assert!(north.lng > lng_min && north.lng < lng_max);

        // A point 7 km east falls outside.
        let east = GeoPoint::new(12.97, 77.59 + 7.0 / (111.0 * 12.97_f64.to_radians().cos()));
        assert!(east.lng > lng_max);
    }

    #[test]
    fn polyline_distance_uses_nearest_vertex() {
        let line = vec![GeoPoint::new(12.97, 77.59), GeoPoint::new(13.00, 77.60)];
        let near_first = GeoPoint::new(12.9701, 77.5901);
        let d = distance_point_to_polyline_km(&near_first, &line);
        assert!(d < 0.05, "got {d}");

        assert_eq!(distance_point_to_polyline_km(&near_first, &[]), 9999.0);
    }
}
