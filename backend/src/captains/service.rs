//! Captain profile lifecycle: onboarding defaults, online/offline
//! transitions, location ingestion with a plausibility guard, go-home
//! progress refresh.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use common::geo::{GeoPoint, haversine_km};
use common::time::now_ms;

use crate::captains::model::Captain;
use crate::captains::repository::CaptainRepository;
use crate::config::AppConfig;
use crate::dispatch::matcher::Matcher;
use crate::error::{AppError, AppResult};
use crate::jobs::model::CaptainId;
use crate::maps::MapsClient;

pub struct CaptainService {
    repo: Arc<dyn CaptainRepository>,
    maps: Arc<dyn MapsClient>,
    matcher: Arc<Matcher>,
    cfg: Arc<AppConfig>,
}

impl CaptainService {
    pub fn new(
        repo: Arc<dyn CaptainRepository>,
        maps: Arc<dyn MapsClient>,
        matcher: Arc<Matcher>,
        cfg: Arc<AppConfig>,
    ) -> Self {
        Self {
            repo,
            maps,
            matcher,
            cfg,
        }
    }

    /// Fetches the profile, creating it with onboarding defaults first.
    pub async fn ensure_profile(&self, captain_id: &CaptainId) -> AppResult<Captain> {
        if let Some(existing) = self.repo.fetch(captain_id).await? {
            return Ok(existing);
        }
        let fresh = Captain::new(*captain_id, now_ms() as i64);
        self.repo.save(&fresh).await?;
        Ok(fresh)
    }

    /// Going online requires verification; going offline clears busy and
    /// go-home state so a stale session cannot keep receiving offers.
    /// First contact provisions the profile with onboarding defaults.
    #[instrument(skip(self), target = "captains", fields(captain_id = %captain_id))]
    pub async fn set_online(&self, captain_id: &CaptainId, is_online: bool) -> AppResult<Captain> {
        let mut captain = self.ensure_profile(captain_id).await?;

        if is_online && !captain.is_verified {
            return Err(AppError::Forbidden("captain is not verified".into()));
        }

        captain.is_online = is_online;
        captain.last_seen_ms = Some(now_ms() as i64);
        if !is_online {
            captain.is_busy = false;
            captain.current_job_id = None;
            captain.current_job_type = None;
            captain.batched_order_ids.clear();
            captain.go_home_mode = false;
            captain.home_location = None;
        }

        self.repo.save(&captain).await?;
        info!(is_online, "captain availability updated");
        Ok(captain)
    }

    /// Ingests a location fix. Implausible jumps are recorded as trust
    /// findings and ignored; accepted fixes broadcast to any job the
    /// captain is serving and opportunistically refresh go-home progress.
    #[instrument(skip(self), target = "captains", fields(captain_id = %captain_id))]
    pub async fn update_location(
        &self,
        captain_id: &CaptainId,
        lat: f64,
        lng: f64,
    ) -> AppResult<Captain> {
        let captain = self
            .repo
            .fetch(captain_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("captain {captain_id}")))?;

        let now = now_ms() as i64;

        if let (Some(previous), Some(last_seen)) = (captain.location, captain.last_seen_ms) {
            let distance_km = haversine_km(previous.lat, previous.lng, lat, lng);
            let elapsed_s = ((now - last_seen) as f64 / 1000.0).max(1.0);
            let speed_kmph = distance_km / (elapsed_s / 3600.0);

            if speed_kmph > self.cfg.max_plausible_speed_kmph {
                self.repo
                    .insert_trust_log(
                        captain_id,
                        "GPS_JUMP",
                        &format!("speed={speed_kmph:.2}km/h"),
                        now,
                    )
                    .await?;
                warn!(speed_kmph, "implausible location jump ignored");
                return Ok(captain);
            }
        }

        let location = GeoPoint::new(lat, lng);
        self.repo
            .update_location(captain_id, &location, now)
            .await?;

        let updated = self
            .repo
            .fetch(captain_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("captain {captain_id}")))?;

        self.refresh_go_home(&updated, &location).await;

        if updated.current_job_type.is_some() {
            self.matcher.broadcast_location(&updated, lat, lng).await;
        }

        Ok(updated)
    }

    /// Best-effort ETA-to-home refresh; any provider failure is ignored.
    async fn refresh_go_home(&self, captain: &Captain, location: &GeoPoint) {
        if !captain.go_home_mode || !self.maps.enabled() {
            return;
        }
        let Some(home) = captain.home_location else {
            return;
        };

        match self.maps.eta(location, &home).await {
            Ok(eta) => {
                if let Err(e) = self
                    .repo
                    .set_go_home_progress(&captain.user_id, eta.duration_s, eta.distance_m)
                    .await
                {
                    warn!(error = %e, "go-home progress write failed");
                }
            }
            Err(_) => {
                // Opportunistic only.
            }
        }
    }

    /// Toggles go-home mode with an optional home point.
    pub async fn set_go_home(
        &self,
        captain_id: &CaptainId,
        enabled: bool,
        home: Option<GeoPoint>,
    ) -> AppResult<Captain> {
        let mut captain = self
            .repo
            .fetch(captain_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("captain {captain_id}")))?;

        captain.go_home_mode = enabled;
        captain.home_location = if enabled { home } else { None };
        if !enabled {
            captain.go_home_eta_s = None;
            captain.go_home_distance_m = None;
        }

        self.repo.save(&captain).await?;
        Ok(captain)
    }
}
