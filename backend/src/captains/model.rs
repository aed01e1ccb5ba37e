use serde::{Deserialize, Serialize};

use common::geo::GeoPoint;

use crate::jobs::model::{CaptainId, JobId, JobType, VehicleType};

/// Fairness default when a captain has never been assigned: treat them as
/// idle for two hours so new captains rank well immediately.
pub const DEFAULT_IDLE_MINUTES: f64 = 120.0;

/// A mobile driver able to serve food orders and ride requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Captain {
    pub user_id: CaptainId,

    pub is_online: bool,
    pub is_verified: bool,
    pub is_busy: bool,

    pub vehicle_type: Option<VehicleType>,
    pub is_ev: bool,

    pub location: Option<GeoPoint>,
    pub current_job_id: Option<JobId>,
    pub current_job_type: Option<JobType>,
    /// Orders carried at once, head = active order. Never larger than the
    /// batching cap.
    pub batched_order_ids: Vec<JobId>,

    pub average_rating: f64,
    pub total_ratings: i64,
    pub total_trips: i64,
    pub cancellations: i64,

    pub last_assigned_at_ms: Option<i64>,
    pub last_seen_ms: Option<i64>,

    pub go_home_mode: bool,
    pub home_location: Option<GeoPoint>,
    pub go_home_eta_s: Option<i64>,
    pub go_home_distance_m: Option<i64>,

    pub created_at_ms: i64,
}

impl Captain {
    /// Fresh profile defaults; verification and onboarding happen later.
    pub fn new(user_id: CaptainId, now_ms: i64) -> Self {
        Self {
            user_id,
            is_online: false,
            is_verified: false,
            is_busy: false,
            vehicle_type: None,
            is_ev: false,
            location: None,
            current_job_id: None,
            current_job_type: None,
            batched_order_ids: Vec::new(),
            average_rating: 5.0,
            total_ratings: 0,
            total_trips: 0,
            cancellations: 0,
            last_assigned_at_ms: None,
            last_seen_ms: Some(now_ms),
            go_home_mode: false,
            home_location: None,
            go_home_eta_s: None,
            go_home_distance_m: None,
            created_at_ms: now_ms,
        }
    }

    /// Minutes since the last assignment, clamped at zero.
    pub fn idle_minutes(&self, now_ms: i64) -> f64 {
        match self.last_assigned_at_ms {
            Some(at) => ((now_ms - at) as f64 / 60_000.0).max(0.0),
            None => DEFAULT_IDLE_MINUTES,
        }
    }

    /// `is_busy` implies holding work.
    pub fn busy_state_consistent(&self) -> bool {
        !self.is_busy || self.current_job_id.is_some() || !self.batched_order_ids.is_empty()
    }
}
