use anyhow::Result;
use async_trait::async_trait;

use common::geo::GeoPoint;

use crate::captains::model::Captain;
use crate::jobs::model::{CaptainId, JobId, JobType, VehicleType};

/// Persistence boundary for captain rows.
///
/// The busy transition (`try_assign`) and the batched-list mutations are
/// storage-level atomic operations; profile writes go through `save`.
#[async_trait]
pub trait CaptainRepository: Send + Sync {
    async fn fetch(&self, captain_id: &CaptainId) -> Result<Option<Captain>>;

    /// Whole-row upsert for profile-level writes (bootstrap, online toggle,
    /// go-home settings). Not for the racy dispatch paths.
    async fn save(&self, captain: &Captain) -> Result<()>;

    /// Free captains near a point: online, verified, not busy, optionally
    /// restricted to a vehicle set. Ordered nearest-first.
    async fn find_available_near(
        &self,
        center: &GeoPoint,
        radius_m: u32,
        vehicles: Option<&[VehicleType]>,
        limit: usize,
    ) -> Result<Vec<Captain>>;

    async fn count_available_near(&self, center: &GeoPoint, radius_m: u32) -> Result<i64>;

    /// Busy-on-ORDER captains near a point with batching headroom.
    async fn find_batchable_near(
        &self,
        center: &GeoPoint,
        radius_m: u32,
        max_batch: usize,
        limit: usize,
    ) -> Result<Vec<Captain>>;

    /// Compare-and-set busy transition. Succeeds only while the captain is
    /// online, verified, not busy, and (when required) on the right
    /// vehicle. Returns the updated row, or None when the CAS lost.
    async fn try_assign(
        &self,
        captain_id: &CaptainId,
        job_id: &JobId,
        job_type: JobType,
        vehicle_type: Option<VehicleType>,
        now_ms: i64,
    ) -> Result<Option<Captain>>;

    /// Appends an order to the batched list iff the captain is still busy
    /// on an ORDER and under `max_batch`. Optimistic; false on a lost race.
    async fn append_batched(
        &self,
        captain_id: &CaptainId,
        order_id: &JobId,
        max_batch: usize,
        now_ms: i64,
    ) -> Result<bool>;

    /// Completion bookkeeping: removes the job from the batched list,
    /// promotes the next batched order (if any) to current, clears busy
    /// otherwise, and bumps `total_trips`. Returns the updated row.
    async fn complete_job(&self, captain_id: &CaptainId, job_id: &JobId) -> Result<Captain>;

    /// Clears busy, current job and the batched list (cancellation path).
    async fn free(&self, captain_id: &CaptainId) -> Result<()>;

    async fn increment_cancellations(&self, captain_id: &CaptainId) -> Result<()>;

    /// Rating adjustment; clamped to the [0, 5] band by the implementation.
    async fn adjust_rating(&self, captain_id: &CaptainId, delta: f64) -> Result<()>;

    async fn update_location(
        &self,
        captain_id: &CaptainId,
        location: &GeoPoint,
        now_ms: i64,
    ) -> Result<()>;

    /// Best-effort go-home progress write; callers ignore failures.
    async fn set_go_home_progress(
        &self,
        captain_id: &CaptainId,
        eta_s: i64,
        distance_m: i64,
    ) -> Result<()>;

    async fn insert_trust_log(
        &self,
        captain_id: &CaptainId,
        finding: &str,
        detail: &str,
        now_ms: i64,
    ) -> Result<()>;
}
