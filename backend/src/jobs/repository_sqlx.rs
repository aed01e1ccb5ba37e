use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use common::geo::{GeoPoint, bounding_box};

use crate::jobs::model::{
    CaptainId, CurrentOffer, DispatchStatus, Job, JobId, JobStatus, JobType, Sla, StatusChange,
};
use crate::jobs::repository::{JobRepository, MatchingLog};

const JOB_COLUMNS: &str = r#"
  job_id, job_type, user_id, restaurant_id, captain_id,
  pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, vehicle_type,
  amount_subtotal, surge_multiplier, surge_amount, amount_total,
  wallet_amount, reward_redeem_amount, payment_amount, payment_mode,
  gateway_payment_id, is_paid, settled,
  status, job_status, offer_captain_id, offer_expires_ms,
  job_attempts, rejected_captains, matching_retry_count,
  assign_by_ms, complete_by_ms, status_history, batched,
  cancelled_by, cancel_reason, created_ms, status_updated_ms, matched_ms
"#;

/// SQLx-backed implementation of JobRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxJobRepository {
    pool: AnyPool,
}

impl SqlxJobRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO jobs (
  job_id, job_type, user_id, restaurant_id, captain_id,
  pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, vehicle_type,
  amount_subtotal, surge_multiplier, surge_amount, amount_total,
  wallet_amount, reward_redeem_amount, payment_amount, payment_mode,
  gateway_payment_id, is_paid, settled,
  status, job_status, offer_captain_id, offer_expires_ms,
  job_attempts, rejected_captains, matching_retry_count,
  assign_by_ms, complete_by_ms, status_history, batched,
  cancelled_by, cancel_reason, created_ms, status_updated_ms, matched_ms
) VALUES (
  ?, ?, ?, ?, ?,
  ?, ?, ?, ?, ?,
  ?, ?, ?, ?,
  ?, ?, ?, ?,
  ?, ?, ?,
  ?, ?, ?, ?,
  ?, ?, ?,
  ?, ?, ?, ?,
  ?, ?, ?, ?, ?
);
"#,
        )
        .bind(job.id.to_string())
        .bind(job.job_type.to_string())
        .bind(job.user_id.to_string())
        .bind(job.restaurant_id.map(|r| r.to_string()))
        .bind(job.captain_id.map(|c| c.to_string()))
        .bind(job.pickup.map(|p| p.lat))
        .bind(job.pickup.map(|p| p.lng))
        .bind(job.dropoff.map(|p| p.lat))
        .bind(job.dropoff.map(|p| p.lng))
        .bind(job.vehicle_type.map(|v| v.to_string()))
        .bind(job.amount_subtotal)
        .bind(job.surge_multiplier)
        .bind(job.surge_amount)
        .bind(job.amount_total)
        .bind(job.wallet_amount)
        .bind(job.reward_redeem_amount)
        .bind(job.payment_amount)
        .bind(job.payment_mode.to_string())
        .bind(job.gateway_payment_id.as_deref())
        .bind(job.is_paid as i64)
        .bind(job.settled as i64)
        .bind(job.status.to_string())
        .bind(job.job_status.to_string())
        .bind(job.current_offer.map(|o| o.captain_id.to_string()))
        .bind(job.current_offer.map(|o| o.expires_at_ms))
        .bind(job.job_attempts as i64)
        .bind(serde_json::to_string(&job.rejected_captains)?)
        .bind(job.matching_retry_count as i64)
        .bind(job.sla.map(|s| s.assign_by_ms))
        .bind(job.sla.map(|s| s.complete_by_ms))
        .bind(serde_json::to_string(&job.status_history)?)
        .bind(job.batched as i64)
        .bind(job.cancelled_by.as_deref())
        .bind(job.cancel_reason.as_deref())
        .bind(job.created_at_ms)
        .bind(job.created_at_ms)
        .bind(job.matched_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, job_id: &JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?;");
        let row = sqlx::query(&sql)
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_job(&r)?)),
            None => Ok(None),
        }
    }

    async fn transition_status(
        &self,
        job_id: &JobId,
        from: JobStatus,
        change: &StatusChange,
        now_ms: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // CAS on the previous status decides which writer wins.
        let res = sqlx::query(
            r#"
UPDATE jobs
SET status = ?, status_updated_ms = ?
WHERE job_id = ? AND status = ?;
"#,
        )
        .bind(change.to.to_string())
        .bind(now_ms)
        .bind(job_id.to_string())
        .bind(from.to_string())
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let row = sqlx::query("SELECT status_history FROM jobs WHERE job_id = ?;")
            .bind(job_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let raw: String = row.get("status_history");
        let mut history: Vec<StatusChange> = serde_json::from_str(&raw).unwrap_or_default();
        history.push(change.clone());

        sqlx::query("UPDATE jobs SET status_history = ? WHERE job_id = ?;")
            .bind(serde_json::to_string(&history)?)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn set_dispatch_status(&self, job_id: &JobId, status: DispatchStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET job_status = ? WHERE job_id = ?;")
            .bind(status.to_string())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn init_dispatch(&self, job_id: &JobId, pickup: &GeoPoint) -> Result<()> {
        sqlx::query(
            r#"
UPDATE jobs
SET job_status = 'SEARCHING',
    pickup_lat = ?, pickup_lng = ?,
    offer_captain_id = NULL, offer_expires_ms = NULL,
    job_attempts = 0
WHERE job_id = ?;
"#,
        )
        .bind(pickup.lat)
        .bind(pickup.lng)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_offer(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        expires_at_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE jobs
SET job_status = 'OFFERED',
    offer_captain_id = ?, offer_expires_ms = ?,
    job_attempts = job_attempts + 1
WHERE job_id = ?;
"#,
        )
        .bind(captain_id.to_string())
        .bind(expires_at_ms)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reject_offer(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        job_status: DispatchStatus,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT rejected_captains FROM jobs WHERE job_id = ?;")
            .bind(job_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let raw: String = row.get("rejected_captains");
        let mut rejected: Vec<CaptainId> = serde_json::from_str(&raw).unwrap_or_default();
        if !rejected.contains(captain_id) {
            rejected.push(*captain_id);
        }

        sqlx::query(
            r#"
UPDATE jobs
SET rejected_captains = ?,
    offer_captain_id = NULL, offer_expires_ms = NULL,
    job_status = ?
WHERE job_id = ?;
"#,
        )
        .bind(serde_json::to_string(&rejected)?)
        .bind(job_status.to_string())
        .bind(job_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_assigned(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        batched: bool,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE jobs
SET captain_id = ?, job_status = 'ASSIGNED',
    offer_captain_id = NULL, offer_expires_ms = NULL,
    matched_ms = ?, batched = ?
WHERE job_id = ?;
"#,
        )
        .bind(captain_id.to_string())
        .bind(now_ms)
        .bind(batched as i64)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_sla(
        &self,
        job_id: &JobId,
        assign_by_ms: i64,
        complete_by_ms: i64,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE jobs
SET assign_by_ms = ?, complete_by_ms = ?
WHERE job_id = ? AND assign_by_ms IS NULL;
"#,
        )
        .bind(assign_by_ms)
        .bind(complete_by_ms)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn mark_retrying(&self, job_id: &JobId) -> Result<()> {
        sqlx::query(
            r#"
UPDATE jobs
SET job_status = 'RETRYING', matching_retry_count = matching_retry_count + 1
WHERE job_id = ?;
"#,
        )
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_cancelled_meta(
        &self,
        job_id: &JobId,
        cancelled_by: &str,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE jobs
SET cancelled_by = ?, cancel_reason = ?,
    job_status = 'CANCELLED',
    offer_captain_id = NULL, offer_expires_ms = NULL
WHERE job_id = ?;
"#,
        )
        .bind(cancelled_by)
        .bind(reason)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_active_near(
        &self,
        job_type: JobType,
        center: &GeoPoint,
        radius_m: u32,
    ) -> Result<i64> {
        let (lat_min, lat_max, lng_min, lng_max) = bounding_box(center, radius_m);

        let rows = sqlx::query(
            r#"
SELECT pickup_lat, pickup_lng
FROM jobs
WHERE job_type = ?
  AND job_status IN ('CREATED', 'SEARCHING', 'OFFERED')
  AND pickup_lat BETWEEN ? AND ?
  AND pickup_lng BETWEEN ? AND ?;
"#,
        )
        .bind(job_type.to_string())
        .bind(lat_min)
        .bind(lat_max)
        .bind(lng_min)
        .bind(lng_max)
        .fetch_all(&self.pool)
        .await?;

        let radius_km = radius_m as f64 / 1000.0;
        let count = rows
            .iter()
            .filter_map(|r| {
                let lat: Option<f64> = r.get("pickup_lat");
                let lng: Option<f64> = r.get("pickup_lng");
                Some(GeoPoint::new(lat?, lng?))
            })
            .filter(|p| p.distance_km(center) <= radius_km)
            .count();

        Ok(count as i64)
    }

    async fn list_unsettled(&self, limit: usize) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
SELECT {JOB_COLUMNS}
FROM jobs
WHERE settled = 0 AND status IN ('DELIVERED', 'COMPLETED')
ORDER BY created_ms ASC
LIMIT ?;
"#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_job(&r) {
                Ok(job) => out.push(job),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed job row");
                }
            }
        }
        Ok(out)
    }

    async fn insert_matching_log(&self, log: &MatchingLog) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO matching_logs
  (log_id, job_type, job_id, candidate_ids, eta_map, offered_captain_id, expires_ms, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(log.job_type.to_string())
        .bind(log.job_id.to_string())
        .bind(match &log.candidate_ids {
            Some(ids) => Some(serde_json::to_string(ids)?),
            None => None,
        })
        .bind(match &log.eta_map {
            Some(map) => Some(serde_json::to_string(map)?),
            None => None,
        })
        .bind(log.offered_captain_id.map(|c| c.to_string()))
        .bind(log.expires_at_ms)
        .bind(log.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn restaurant_point(&self, restaurant_id: &Uuid) -> Result<Option<GeoPoint>> {
        let row = sqlx::query("SELECT lat, lng FROM restaurants WHERE restaurant_id = ?;")
            .bind(restaurant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            let lat: Option<f64> = r.get("lat");
            let lng: Option<f64> = r.get("lng");
            Some(GeoPoint::new(lat?, lng?))
        }))
    }

    async fn restaurant_owner(&self, restaurant_id: &Uuid) -> Result<Option<Uuid>> {
        let row = sqlx::query("SELECT owner_id FROM restaurants WHERE restaurant_id = ?;")
            .bind(restaurant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let owner: Option<String> = r.get("owner_id");
                match owner {
                    Some(s) => Ok(Some(Uuid::parse_str(&s).context("invalid owner_id")?)),
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_job(r: &sqlx::any::AnyRow) -> Result<Job> {
    let id: String = r.get("job_id");
    let user_id: String = r.get("user_id");

    let pickup = point_from(r.get("pickup_lat"), r.get("pickup_lng"));
    let dropoff = point_from(r.get("dropoff_lat"), r.get("dropoff_lng"));

    let vehicle_type = match r.get::<Option<String>, _>("vehicle_type") {
        Some(s) => Some(s.parse().map_err(|e| anyhow!("vehicle_type: {e}"))?),
        None => None,
    };

    let current_offer = match (
        r.get::<Option<String>, _>("offer_captain_id"),
        r.get::<Option<i64>, _>("offer_expires_ms"),
    ) {
        (Some(cid), Some(expires_at_ms)) => Some(CurrentOffer {
            captain_id: Uuid::parse_str(&cid).context("invalid offer_captain_id")?,
            expires_at_ms,
        }),
        _ => None,
    };

    let sla = match (
        r.get::<Option<i64>, _>("assign_by_ms"),
        r.get::<Option<i64>, _>("complete_by_ms"),
    ) {
        (Some(assign_by_ms), Some(complete_by_ms)) => Some(Sla {
            assign_by_ms,
            complete_by_ms,
        }),
        _ => None,
    };

    let rejected: Vec<CaptainId> =
        serde_json::from_str(&r.get::<String, _>("rejected_captains")).unwrap_or_default();
    let history: Vec<StatusChange> =
        serde_json::from_str(&r.get::<String, _>("status_history")).unwrap_or_default();

    Ok(Job {
        id: Uuid::parse_str(&id).context("invalid job_id")?,
        job_type: r.get::<String, _>("job_type").parse()?,
        user_id: Uuid::parse_str(&user_id).context("invalid user_id")?,
        restaurant_id: opt_uuid(r.get("restaurant_id"))?,
        captain_id: opt_uuid(r.get("captain_id"))?,
        pickup,
        dropoff,
        vehicle_type,
        amount_subtotal: r.get("amount_subtotal"),
        surge_multiplier: r.get("surge_multiplier"),
        surge_amount: r.get("surge_amount"),
        amount_total: r.get("amount_total"),
        wallet_amount: r.get("wallet_amount"),
        reward_redeem_amount: r.get("reward_redeem_amount"),
        payment_amount: r.get("payment_amount"),
        payment_mode: r.get::<String, _>("payment_mode").parse()?,
        gateway_payment_id: r.get("gateway_payment_id"),
        is_paid: r.get::<i64, _>("is_paid") != 0,
        settled: r.get::<i64, _>("settled") != 0,
        status: r.get::<String, _>("status").parse()?,
        job_status: r.get::<String, _>("job_status").parse()?,
        current_offer,
        job_attempts: i64_to_u32(r.get("job_attempts"))?,
        rejected_captains: rejected,
        matching_retry_count: i64_to_u32(r.get("matching_retry_count"))?,
        sla,
        status_history: history,
        batched: r.get::<i64, _>("batched") != 0,
        cancelled_by: r.get("cancelled_by"),
        cancel_reason: r.get("cancel_reason"),
        created_at_ms: r.get("created_ms"),
        matched_at_ms: r.get("matched_ms"),
    })
}

fn point_from(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    Some(GeoPoint::new(lat?, lng?))
}

fn opt_uuid(v: Option<String>) -> Result<Option<Uuid>> {
    match v {
        Some(s) => Ok(Some(Uuid::parse_str(&s).context("invalid uuid column")?)),
        None => Ok(None),
    }
}

fn i64_to_u32(v: i64) -> Result<u32> {
    if v < 0 || v > u32::MAX as i64 {
        return Err(anyhow!("out of range for u32: {v}"));
    }
    Ok(v as u32)
}
