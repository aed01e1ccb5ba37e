//! Demand/supply surge estimation.
//!
//! Demand is the count of undispatched jobs of the given type near the
//! pickup; supply is the count of free captains in the same radius. The
//! multiplier combines the demand ratio with time-of-day and weather
//! inputs and is clamped to [1.0, 3.0].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Timelike;
use serde::Serialize;
use sqlx::AnyPool;
use tracing::instrument;
use uuid::Uuid;

use common::geo::GeoPoint;
use common::time::{now_ms, utcnow};

use crate::captains::repository::CaptainRepository;
use crate::error::AppResult;
use crate::jobs::model::JobType;
use crate::jobs::repository::JobRepository;

const MIN_MULTIPLIER: f64 = 1.0;
const MAX_MULTIPLIER: f64 = 3.0;
const DEMAND_FACTOR_CAP: f64 = 1.2;
const DEMAND_FACTOR_SLOPE: f64 = 0.35;

#[derive(Debug, Clone, Serialize)]
pub struct SurgeSnapshot {
    pub job_type: JobType,
    pub lat: f64,
    pub lng: f64,
    pub demand: i64,
    pub supply: i64,
    pub ratio: f64,
    pub time_factor: f64,
    pub weather_factor: f64,
    pub surge_multiplier: f64,
    pub created_at_ms: i64,
}

/// Rolling history sink; checkout previews skip it.
#[async_trait]
pub trait SurgeHistoryStore: Send + Sync {
    async fn insert(&self, snapshot: &SurgeSnapshot) -> Result<()>;
}

pub struct SurgeEstimator {
    jobs: Arc<dyn JobRepository>,
    captains: Arc<dyn CaptainRepository>,
    history: Arc<dyn SurgeHistoryStore>,
    radius_m: u32,
    weather_factor: f64,
}

impl SurgeEstimator {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        captains: Arc<dyn CaptainRepository>,
        history: Arc<dyn SurgeHistoryStore>,
        radius_m: u32,
        weather_factor: f64,
    ) -> Self {
        Self {
            jobs,
            captains,
            history,
            radius_m,
            weather_factor,
        }
    }

    #[instrument(skip(self), target = "surge", fields(job_type = %job_type))]
    pub async fn estimate(
        &self,
        job_type: JobType,
        lat: f64,
        lng: f64,
        store_history: bool,
    ) -> AppResult<SurgeSnapshot> {
        let center = GeoPoint::new(lat, lng);

        let demand = self
            .jobs
            .count_active_near(job_type, &center, self.radius_m)
            .await?;
        let supply = self
            .captains
            .count_available_near(&center, self.radius_m)
            .await?;

        let time_factor = time_factor(utcnow().hour());
        let weather_factor = self.weather_factor.max(0.8);
        let (ratio, surge_multiplier) =
            compute_multiplier(demand, supply, time_factor, weather_factor);

        let snapshot = SurgeSnapshot {
            job_type,
            lat,
            lng,
            demand,
            supply,
            ratio,
            time_factor,
            weather_factor,
            surge_multiplier,
            created_at_ms: now_ms() as i64,
        };

        if store_history {
            self.history.insert(&snapshot).await?;
        }

        Ok(snapshot)
    }
}

/// Multiplier math, pure for testability. Returns `(ratio, multiplier)`
/// with the multiplier rounded to two decimals inside [1.0, 3.0].
pub fn compute_multiplier(
    demand: i64,
    supply: i64,
    time_factor: f64,
    weather_factor: f64,
) -> (f64, f64) {
    let ratio = demand.max(0) as f64 / (supply.max(0) as f64).max(1.0);
    let demand_factor = (ratio * DEMAND_FACTOR_SLOPE).min(DEMAND_FACTOR_CAP);
    let raw = 1.0 + demand_factor + time_factor + (weather_factor - 1.0).max(0.0);
    let clamped = raw.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);
    (ratio, (clamped * 100.0).round() / 100.0)
}

/// Peak-hour bump: 0.2 at 07-10, 12-14 and 18-22; 0.1 late night 23-05.
pub fn time_factor(hour: u32) -> f64 {
    if (7..=10).contains(&hour) || (12..=14).contains(&hour) || (18..=22).contains(&hour) {
        0.2
    } else if hour >= 23 || hour <= 5 {
        0.1
    } else {
        0.0
    }
}

/// Applies a multiplier to an amount in paise, rounding to the nearest unit.
pub fn apply_surge(amount: i64, multiplier: f64) -> i64 {
    (amount as f64 * multiplier).round() as i64
}

pub struct SqlxSurgeHistory {
    pool: AnyPool,
}

impl SqlxSurgeHistory {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SurgeHistoryStore for SqlxSurgeHistory {
    async fn insert(&self, s: &SurgeSnapshot) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO surge_history
  (surge_id, job_type, lat, lng, demand, supply, ratio, time_factor, weather_factor, surge_multiplier, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(s.job_type.to_string())
        .bind(s.lat)
        .bind(s.lng)
        .bind(s.demand)
        .bind(s.supply)
        .bind(s.ratio)
        .bind(s.time_factor)
        .bind(s.weather_factor)
        .bind(s.surge_multiplier)
        .bind(s.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
