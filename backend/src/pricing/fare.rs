//! Ride fare quoting: haversine distance times the vehicle's per-km rate,
//! with the surge multiplier applied on top of the base fare.

use serde::Serialize;

use common::geo::GeoPoint;

use crate::error::{AppError, AppResult};
use crate::jobs::model::VehicleType;
use crate::pricing::surge::apply_surge;

#[derive(Debug, Clone, Serialize)]
pub struct FareQuote {
    pub vehicle_type: VehicleType,
    pub distance_km: f64,
    /// Base fare in paise, before surge.
    pub fare_base: i64,
    pub surge_multiplier: f64,
    pub surge_amount: i64,
    pub fare_total: i64,
}

/// Base fare in paise for a pickup/dropoff pair.
pub fn base_fare(pickup: &GeoPoint, dropoff: &GeoPoint, vehicle_type: VehicleType) -> i64 {
    let distance_km = pickup.distance_km(dropoff);
    (distance_km * vehicle_type.rate_per_km() as f64).round().max(0.0) as i64
}

/// Full quote with the surge multiplier applied.
pub fn quote(
    pickup: &GeoPoint,
    dropoff: &GeoPoint,
    vehicle_type: Option<VehicleType>,
    surge_multiplier: f64,
) -> AppResult<FareQuote> {
    let vehicle_type =
        vehicle_type.ok_or_else(|| AppError::Validation("invalid vehicle type".into()))?;

    let distance_km = pickup.distance_km(dropoff);
    let fare_base = base_fare(pickup, dropoff, vehicle_type);
    let fare_total = apply_surge(fare_base, surge_multiplier);

    Ok(FareQuote {
        vehicle_type,
        distance_km,
        fare_base,
        surge_multiplier,
        surge_amount: fare_total - fare_base,
        fare_total,
    })
}
