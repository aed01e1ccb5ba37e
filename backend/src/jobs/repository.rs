use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use common::geo::GeoPoint;

use crate::jobs::model::{CaptainId, DispatchStatus, Job, JobId, JobStatus, JobType, StatusChange};

/// One row per ranking decision or issued offer.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingLog {
    pub job_type: JobType,
    pub job_id: JobId,
    pub candidate_ids: Option<Vec<CaptainId>>,
    pub eta_map: Option<serde_json::Value>,
    pub offered_captain_id: Option<CaptainId>,
    pub expires_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

/// Persistence boundary for job rows. Every mutation that can race an
/// accept, a timer, or a cancellation is an atomic conditional update.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn fetch(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// Conditional business-status transition: applies only while the row
    /// still carries `from`, appending `change` to the status history.
    /// Returns false on a CAS miss (a racer transitioned first).
    async fn transition_status(
        &self,
        job_id: &JobId,
        from: JobStatus,
        change: &StatusChange,
        now_ms: i64,
    ) -> Result<bool>;

    async fn set_dispatch_status(&self, job_id: &JobId, status: DispatchStatus) -> Result<()>;

    /// Resets matching state at the start of a dispatch round.
    async fn init_dispatch(&self, job_id: &JobId, pickup: &GeoPoint) -> Result<()>;

    /// Writes the current-offer mirror and bumps `job_attempts`.
    async fn record_offer(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        expires_at_ms: i64,
    ) -> Result<()>;

    /// Moves the offered captain to the rejected set and clears the offer
    /// mirror, leaving the job in `job_status`.
    async fn reject_offer(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        job_status: DispatchStatus,
    ) -> Result<()>;

    /// Marks the job assigned to `captain_id` and clears the offer mirror.
    async fn set_assigned(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        batched: bool,
        now_ms: i64,
    ) -> Result<()>;

    /// Stamps SLA deadlines once; later calls are no-ops.
    /// Returns false when the deadlines were already set.
    async fn set_sla(&self, job_id: &JobId, assign_by_ms: i64, complete_by_ms: i64)
    -> Result<bool>;

    /// Bumps the retry counter and marks the job RETRYING.
    async fn mark_retrying(&self, job_id: &JobId) -> Result<()>;

    async fn set_cancelled_meta(
        &self,
        job_id: &JobId,
        cancelled_by: &str,
        reason: &str,
    ) -> Result<()>;

    /// Active-demand count near a pickup (CREATED/SEARCHING/OFFERED jobs
    /// of the given type within `radius_m`).
    async fn count_active_near(
        &self,
        job_type: JobType,
        center: &GeoPoint,
        radius_m: u32,
    ) -> Result<i64>;

    /// Delivered/completed jobs not yet settled, oldest first.
    async fn list_unsettled(&self, limit: usize) -> Result<Vec<Job>>;

    async fn insert_matching_log(&self, log: &MatchingLog) -> Result<()>;

    async fn restaurant_point(&self, restaurant_id: &Uuid) -> Result<Option<GeoPoint>>;

    async fn restaurant_owner(&self, restaurant_id: &Uuid) -> Result<Option<Uuid>>;
}
