use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use common::geo::{GeoPoint, bounding_box};

use crate::captains::model::Captain;
use crate::captains::repository::CaptainRepository;
use crate::jobs::model::{CaptainId, JobId, JobType, VehicleType};

const CAPTAIN_COLUMNS: &str = r#"
  user_id, is_online, is_verified, is_busy, vehicle_type, is_ev,
  lat, lng, current_job_id, current_job_type, batched_order_ids,
  average_rating, total_ratings, total_trips, cancellations,
  last_assigned_ms, last_seen_ms,
  go_home_mode, home_lat, home_lng, go_home_eta_s, go_home_distance_m,
  created_ms
"#;

/// SQLx-backed implementation of CaptainRepository.
///
/// Radius queries prefilter on a lat/lng bounding box in SQL and re-check
/// the exact haversine distance in process.
pub struct SqlxCaptainRepository {
    pool: AnyPool,
}

impl SqlxCaptainRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn fetch_in_bbox(&self, sql: &str, center: &GeoPoint, radius_m: u32) -> Result<Vec<Captain>> {
        let (lat_min, lat_max, lng_min, lng_max) = bounding_box(center, radius_m);

        let rows = sqlx::query(sql)
            .bind(lat_min)
            .bind(lat_max)
            .bind(lng_min)
            .bind(lng_max)
            .fetch_all(&self.pool)
            .await?;

        let radius_km = radius_m as f64 / 1000.0;
        let mut found: Vec<(f64, Captain)> = Vec::new();
        for r in rows {
            let captain = match row_to_captain(&r) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed captain row");
                    continue;
                }
            };
            let Some(location) = captain.location else {
                continue;
            };
            let distance = location.distance_km(center);
            if distance <= radius_km {
                found.push((distance, captain));
            }
        }

        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().map(|(_, c)| c).collect())
    }
}

#[async_trait]
impl CaptainRepository for SqlxCaptainRepository {
    async fn fetch(&self, captain_id: &CaptainId) -> Result<Option<Captain>> {
        let sql = format!("SELECT {CAPTAIN_COLUMNS} FROM captains WHERE user_id = ?;");
        let row = sqlx::query(&sql)
            .bind(captain_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_captain(&r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, c: &Captain) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO captains (
  user_id, is_online, is_verified, is_busy, vehicle_type, is_ev,
  lat, lng, current_job_id, current_job_type, batched_order_ids,
  average_rating, total_ratings, total_trips, cancellations,
  last_assigned_ms, last_seen_ms,
  go_home_mode, home_lat, home_lng, go_home_eta_s, go_home_distance_m,
  created_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(user_id) DO UPDATE SET
  is_online = excluded.is_online,
  is_verified = excluded.is_verified,
  is_busy = excluded.is_busy,
  vehicle_type = excluded.vehicle_type,
  is_ev = excluded.is_ev,
  lat = excluded.lat,
  lng = excluded.lng,
  current_job_id = excluded.current_job_id,
  current_job_type = excluded.current_job_type,
  batched_order_ids = excluded.batched_order_ids,
  average_rating = excluded.average_rating,
  total_ratings = excluded.total_ratings,
  total_trips = excluded.total_trips,
  cancellations = excluded.cancellations,
  last_assigned_ms = excluded.last_assigned_ms,
  last_seen_ms = excluded.last_seen_ms,
  go_home_mode = excluded.go_home_mode,
  home_lat = excluded.home_lat,
  home_lng = excluded.home_lng,
  go_home_eta_s = excluded.go_home_eta_s,
  go_home_distance_m = excluded.go_home_distance_m;
"#,
        )
        .bind(c.user_id.to_string())
        .bind(c.is_online as i64)
        .bind(c.is_verified as i64)
        .bind(c.is_busy as i64)
        .bind(c.vehicle_type.map(|v| v.to_string()))
        .bind(c.is_ev as i64)
        .bind(c.location.map(|p| p.lat))
        .bind(c.location.map(|p| p.lng))
        .bind(c.current_job_id.map(|j| j.to_string()))
        .bind(c.current_job_type.map(|t| t.to_string()))
        .bind(serde_json::to_string(&c.batched_order_ids)?)
        .bind(c.average_rating)
        .bind(c.total_ratings)
        .bind(c.total_trips)
        .bind(c.cancellations)
        .bind(c.last_assigned_at_ms)
        .bind(c.last_seen_ms)
        .bind(c.go_home_mode as i64)
        .bind(c.home_location.map(|p| p.lat))
        .bind(c.home_location.map(|p| p.lng))
        .bind(c.go_home_eta_s)
        .bind(c.go_home_distance_m)
        .bind(c.created_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_available_near(
        &self,
        center: &GeoPoint,
        radius_m: u32,
        vehicles: Option<&[VehicleType]>,
        limit: usize,
    ) -> Result<Vec<Captain>> {
        let sql = format!(
            r#"
SELECT {CAPTAIN_COLUMNS}
FROM captains
WHERE is_online = 1 AND is_verified = 1 AND is_busy = 0
  AND lat BETWEEN ? AND ?
  AND lng BETWEEN ? AND ?;
"#
        );

        let mut captains = self.fetch_in_bbox(&sql, center, radius_m).await?;
        if let Some(allowed) = vehicles {
            captains.retain(|c| c.vehicle_type.is_some_and(|v| allowed.contains(&v)));
        }
        captains.truncate(limit);
        Ok(captains)
    }

    async fn count_available_near(&self, center: &GeoPoint, radius_m: u32) -> Result<i64> {
        let found = self
            .find_available_near(center, radius_m, None, usize::MAX)
            .await?;
        Ok(found.len() as i64)
    }

    async fn find_batchable_near(
        &self,
        center: &GeoPoint,
        radius_m: u32,
        max_batch: usize,
        limit: usize,
    ) -> Result<Vec<Captain>> {
        let sql = format!(
            r#"
SELECT {CAPTAIN_COLUMNS}
FROM captains
WHERE is_online = 1 AND is_verified = 1 AND is_busy = 1
  AND current_job_type = 'ORDER'
  AND lat BETWEEN ? AND ?
  AND lng BETWEEN ? AND ?;
"#
        );

        let mut captains = self.fetch_in_bbox(&sql, center, radius_m).await?;
        captains.retain(|c| c.batched_order_ids.len() < max_batch);
        captains.truncate(limit);
        Ok(captains)
    }

    async fn try_assign(
        &self,
        captain_id: &CaptainId,
        job_id: &JobId,
        job_type: JobType,
        vehicle_type: Option<VehicleType>,
        now_ms: i64,
    ) -> Result<Option<Captain>> {
        let mut tx = self.pool.begin().await?;

        // Busy CAS: the WHERE clause is the availability guard.
        let res = match vehicle_type {
            Some(vt) => {
                sqlx::query(
                    r#"
UPDATE captains
SET is_busy = 1, current_job_id = ?, current_job_type = ?,
    last_assigned_ms = ?, last_seen_ms = ?
WHERE user_id = ? AND is_online = 1 AND is_verified = 1 AND is_busy = 0
  AND vehicle_type = ?;
"#,
                )
                .bind(job_id.to_string())
                .bind(job_type.to_string())
                .bind(now_ms)
                .bind(now_ms)
                .bind(captain_id.to_string())
                .bind(vt.to_string())
                .execute(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
UPDATE captains
SET is_busy = 1, current_job_id = ?, current_job_type = ?,
    last_assigned_ms = ?, last_seen_ms = ?
WHERE user_id = ? AND is_online = 1 AND is_verified = 1 AND is_busy = 0;
"#,
                )
                .bind(job_id.to_string())
                .bind(job_type.to_string())
                .bind(now_ms)
                .bind(now_ms)
                .bind(captain_id.to_string())
                .execute(&mut *tx)
                .await?
            }
        };

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        // An order assignment also opens the captain's batched list.
        if job_type == JobType::Order {
            let row = sqlx::query("SELECT batched_order_ids FROM captains WHERE user_id = ?;")
                .bind(captain_id.to_string())
                .fetch_one(&mut *tx)
                .await?;
            let raw: String = row.get("batched_order_ids");
            let mut batched: Vec<JobId> = serde_json::from_str(&raw).unwrap_or_default();
            if !batched.contains(job_id) {
                batched.push(*job_id);
            }
            sqlx::query("UPDATE captains SET batched_order_ids = ? WHERE user_id = ?;")
                .bind(serde_json::to_string(&batched)?)
                .bind(captain_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.fetch(captain_id).await
    }

    async fn append_batched(
        &self,
        captain_id: &CaptainId,
        order_id: &JobId,
        max_batch: usize,
        now_ms: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT is_busy, current_job_type, batched_order_ids FROM captains WHERE user_id = ?;",
        )
        .bind(captain_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        let is_busy: i64 = row.get("is_busy");
        let job_type: Option<String> = row.get("current_job_type");
        let raw: String = row.get("batched_order_ids");
        let mut batched: Vec<JobId> = serde_json::from_str(&raw).unwrap_or_default();

        let eligible = is_busy == 1
            && job_type.as_deref() == Some("ORDER")
            && batched.len() < max_batch
            && !batched.contains(order_id);
        if !eligible {
            tx.rollback().await?;
            return Ok(false);
        }

        batched.push(*order_id);

        // Optimistic CAS on the serialized list guards concurrent appends.
        let res = sqlx::query(
            r#"
UPDATE captains
SET batched_order_ids = ?, last_assigned_ms = ?
WHERE user_id = ? AND batched_order_ids = ?;
"#,
        )
        .bind(serde_json::to_string(&batched)?)
        .bind(now_ms)
        .bind(captain_id.to_string())
        .bind(raw)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn complete_job(&self, captain_id: &CaptainId, job_id: &JobId) -> Result<Captain> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT batched_order_ids FROM captains WHERE user_id = ?;")
            .bind(captain_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow!("captain not found: {captain_id}"))?;

        let raw: String = row.get("batched_order_ids");
        let mut batched: Vec<JobId> = serde_json::from_str(&raw).unwrap_or_default();
        batched.retain(|id| id != job_id);

        // The head of the remaining batch becomes the active order.
        match batched.first().copied() {
            Some(next) => {
                sqlx::query(
                    r#"
UPDATE captains
SET batched_order_ids = ?, is_busy = 1,
    current_job_id = ?, current_job_type = 'ORDER',
    total_trips = total_trips + 1
WHERE user_id = ?;
"#,
                )
                .bind(serde_json::to_string(&batched)?)
                .bind(next.to_string())
                .bind(captain_id.to_string())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
UPDATE captains
SET batched_order_ids = '[]', is_busy = 0,
    current_job_id = NULL, current_job_type = NULL,
    total_trips = total_trips + 1
WHERE user_id = ?;
"#,
                )
                .bind(captain_id.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        self.fetch(captain_id)
            .await?
            .ok_or_else(|| anyhow!("captain disappeared: {captain_id}"))
    }

    async fn free(&self, captain_id: &CaptainId) -> Result<()> {
        sqlx::query(
            r#"
UPDATE captains
SET is_busy = 0, current_job_id = NULL, current_job_type = NULL,
    batched_order_ids = '[]'
WHERE user_id = ?;
"#,
        )
        .bind(captain_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_cancellations(&self, captain_id: &CaptainId) -> Result<()> {
        sqlx::query("UPDATE captains SET cancellations = cancellations + 1 WHERE user_id = ?;")
            .bind(captain_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn adjust_rating(&self, captain_id: &CaptainId, delta: f64) -> Result<()> {
        let row = sqlx::query("SELECT average_rating FROM captains WHERE user_id = ?;")
            .bind(captain_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(());
        };
        let current: f64 = row.get("average_rating");
        let updated = (current + delta).clamp(0.0, 5.0);

        sqlx::query("UPDATE captains SET average_rating = ? WHERE user_id = ?;")
            .bind(updated)
            .bind(captain_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_location(
        &self,
        captain_id: &CaptainId,
        location: &GeoPoint,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE captains SET lat = ?, lng = ?, last_seen_ms = ? WHERE user_id = ?;")
            .bind(location.lat)
            .bind(location.lng)
            .bind(now_ms)
            .bind(captain_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_go_home_progress(
        &self,
        captain_id: &CaptainId,
        eta_s: i64,
        distance_m: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE captains SET go_home_eta_s = ?, go_home_distance_m = ? WHERE user_id = ?;",
        )
        .bind(eta_s)
        .bind(distance_m)
        .bind(captain_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_trust_log(
        &self,
        captain_id: &CaptainId,
        finding: &str,
        detail: &str,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO trust_logs (log_id, user_id, finding, detail, created_ms) VALUES (?, ?, ?, ?, ?);",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(captain_id.to_string())
        .bind(finding)
        .bind(detail)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/* =========================
Row mapping
========================= */

fn row_to_captain(r: &sqlx::any::AnyRow) -> Result<Captain> {
    let user_id: String = r.get("user_id");

    let vehicle_type: Option<VehicleType> = match r.get::<Option<String>, _>("vehicle_type") {
        Some(s) => Some(s.parse().map_err(|e| anyhow!("vehicle_type: {e}"))?),
        None => None,
    };

    let current_job_type: Option<JobType> = match r.get::<Option<String>, _>("current_job_type") {
        Some(s) => Some(s.parse().map_err(|e| anyhow!("current_job_type: {e}"))?),
        None => None,
    };

    let batched: Vec<JobId> =
        serde_json::from_str(&r.get::<String, _>("batched_order_ids")).unwrap_or_default();

    Ok(Captain {
        user_id: Uuid::parse_str(&user_id).context("invalid user_id")?,
        is_online: r.get::<i64, _>("is_online") != 0,
        is_verified: r.get::<i64, _>("is_verified") != 0,
        is_busy: r.get::<i64, _>("is_busy") != 0,
        vehicle_type,
        is_ev: r.get::<i64, _>("is_ev") != 0,
        location: point_from(r.get("lat"), r.get("lng")),
        current_job_id: opt_uuid(r.get("current_job_id"))?,
        current_job_type,
        batched_order_ids: batched,
        average_rating: r.get("average_rating"),
        total_ratings: r.get("total_ratings"),
        total_trips: r.get("total_trips"),
        cancellations: r.get("cancellations"),
        last_assigned_at_ms: r.get("last_assigned_ms"),
        last_seen_ms: r.get("last_seen_ms"),
        go_home_mode: r.get::<i64, _>("go_home_mode") != 0,
        home_location: point_from(r.get("home_lat"), r.get("home_lng")),
        go_home_eta_s: r.get("go_home_eta_s"),
        go_home_distance_m: r.get("go_home_distance_m"),
        created_at_ms: r.get("created_ms"),
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
