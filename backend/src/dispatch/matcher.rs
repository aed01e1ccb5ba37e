//! Candidate discovery, ranking and the offer/accept/reject lifecycle.
//!
//! Responsibilities:
//! - Resolve the pickup point (restaurant for orders, rider choice for rides).
//! - Batch nearby orders onto captains already out on an order.
//! - Discover, score and rank free captains; optionally re-rank by ETA.
//! - Drive the offer loop: one exclusive, time-bounded offer at a time.
//! - Commit acceptance (busy CAS + job-row transition) and completion.
//!
//! Every offer outcome is linearised through the candidate store's
//! conditional take; the racing losers observe a no-op or a 409.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, info, instrument, warn};

use common::time::now_ms;

use crate::captains::model::Captain;
use crate::captains::repository::CaptainRepository;
use crate::config::AppConfig;
use crate::dispatch::candidates::CandidateStore;
use crate::dispatch::score::{ScoreWeights, rank_captains, rerank_by_eta};
use crate::error::{AppError, AppResult};
use crate::jobs::model::{CaptainId, DispatchStatus, Job, JobId, JobStatus, JobType, VehicleType};
use crate::jobs::repository::{JobRepository, MatchingLog};
use crate::jobs::state_machine::{Dispatcher, JobStateMachine};
use crate::maps::MapsClient;
use crate::metrics::counters::Counters;
use crate::notifications::model::Priority;
use crate::notifications::queue::NotificationQueue;
use crate::presence::{PresenceKind, PresenceRegistry};
use crate::pricing::surge::SurgeEstimator;
use crate::push::{PushEvent, PushHub, captain_group, job_group, user_group};
use crate::timers;
use crate::wallet::service::WalletService;

pub const REASON_BATCHED: &str = "BATCHED";

pub struct Matcher {
    jobs: Arc<dyn JobRepository>,
    captains: Arc<dyn CaptainRepository>,
    store: Arc<CandidateStore>,
    presence: Arc<PresenceRegistry>,
    hub: Arc<PushHub>,
    surge: Arc<SurgeEstimator>,
    maps: Arc<dyn MapsClient>,
    notifications: Arc<NotificationQueue>,
    state: Arc<JobStateMachine>,
    wallet: Arc<WalletService>,
    cfg: Arc<AppConfig>,
    counters: Counters,
}

impl Matcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        captains: Arc<dyn CaptainRepository>,
        store: Arc<CandidateStore>,
        presence: Arc<PresenceRegistry>,
        hub: Arc<PushHub>,
        surge: Arc<SurgeEstimator>,
        maps: Arc<dyn MapsClient>,
        notifications: Arc<NotificationQueue>,
        state: Arc<JobStateMachine>,
        wallet: Arc<WalletService>,
        cfg: Arc<AppConfig>,
        counters: Counters,
    ) -> Self {
        Self {
            jobs,
            captains,
            store,
            presence,
            hub,
            surge,
            maps,
            notifications,
            state,
            wallet,
            cfg,
            counters,
        }
    }

    fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            distance: self.cfg.w_distance,
            rating: self.cfg.w_rating,
            fairness: self.cfg.w_fairness,
        }
    }

    /// Entry point: ranks candidates for a freshly placed job and starts
    /// the offer loop. Returns the ranked candidate ids.
    #[instrument(skip(self), target = "matcher", fields(job_id = %job_id, job_type = %job_type))]
    pub async fn create_job(
        self: Arc<Self>,
        job_type: JobType,
        job_id: JobId,
    ) -> AppResult<Vec<CaptainId>> {
        let job = self
            .jobs
            .fetch(&job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

        if job.job_type != job_type {
            return Err(AppError::Validation("job type mismatch".into()));
        }
        // Guards both double dispatch of an assigned job and retry timers
        // firing after a cancellation.
        if job.status != job.job_type.dispatchable_status() {
            return Err(AppError::InvalidTransition(format!(
                "job not dispatchable from {}",
                job.status
            )));
        }

        let Some(pickup) = self.resolve_pickup(&job).await? else {
            self.jobs
                .set_dispatch_status(&job_id, DispatchStatus::NoLocation)
                .await?;
            warn!("job has no resolvable pickup");
            return Ok(Vec::new());
        };

        Counters::bump(&self.counters.jobs_created);
        self.state.clone().ensure_sla(&job).await?;

        if job.job_type == JobType::Order {
            if let Some(captain_id) = self.try_batch_order(&job, &pickup).await? {
                return Ok(vec![captain_id]);
            }
        }

        // Surge inflates the distance term; estimation failures fall back
        // to a neutral multiplier rather than blocking dispatch.
        let surge_multiplier = match self
            .surge
            .estimate(job.job_type, pickup.lat, pickup.lng, false)
            .await
        {
            Ok(s) => s.surge_multiplier,
            Err(e) => {
                warn!(error = %e, "surge estimation failed; using 1.0");
                1.0
            }
        };

        let vehicles: Option<Vec<VehicleType>> = match job.job_type {
            JobType::Order => Some(self.cfg.food_allowed_vehicles.clone()),
            JobType::Ride => job.vehicle_type.map(|v| vec![v]),
        };

        let mut found = self
            .captains
            .find_available_near(
                &pickup,
                self.cfg.match_radius_m,
                vehicles.as_deref(),
                self.cfg.match_max_candidates,
            )
            .await?;
        found.retain(|c| !job.rejected_captains.contains(&c.user_id));

        let now = now_ms() as i64;
        let ranked = rank_captains(found, &pickup, surge_multiplier, &self.weights(), now);
        let (ranked, eta_map) = self.rerank_by_eta(ranked, &pickup).await;

        let candidate_ids: Vec<CaptainId> = ranked.iter().map(|c| c.user_id).collect();

        self.store.set_candidates(job_id, candidate_ids.clone());
        self.jobs.init_dispatch(&job_id, &pickup).await?;

        // One log row per ranking decision.
        self.jobs
            .insert_matching_log(&MatchingLog {
                job_type: job.job_type,
                job_id,
                candidate_ids: Some(candidate_ids.clone()),
                eta_map: Some(serde_json::to_value(
                    eta_map
                        .iter()
                        .map(|(k, v)| (k.to_string(), *v))
                        .collect::<HashMap<String, i64>>(),
                )?),
                offered_captain_id: None,
                expires_at_ms: None,
                created_at_ms: now,
            })
            .await?;

        info!(candidates = candidate_ids.len(), surge_multiplier, "dispatch round prepared");

        self.clone().offer_next(job.job_type, job_id).await?;
        Ok(candidate_ids)
    }

    /// ORDER pickup is the restaurant's stored point; RIDE pickup is the
    /// rider's chosen point.
    async fn resolve_pickup(&self, job: &Job) -> AppResult<Option<common::geo::GeoPoint>> {
        if let Some(p) = job.pickup {
            return Ok(Some(p));
        }
        if job.job_type == JobType::Order {
            if let Some(restaurant_id) = job.restaurant_id {
                return Ok(self.jobs.restaurant_point(&restaurant_id).await?);
            }
        }
        Ok(None)
    }

    /// Piggybacks an order onto a captain already out on one. No offer
    /// loop runs for batched assignments.
    async fn try_batch_order(
        &self,
        job: &Job,
        pickup: &common::geo::GeoPoint,
    ) -> AppResult<Option<CaptainId>> {
        let radius = self.cfg.batch_radius_m.min(2_000);
        let candidates = self
            .captains
            .find_batchable_near(pickup, radius, self.cfg.max_batch_orders, 10)
            .await?;

        let now = now_ms() as i64;
        for captain in candidates {
            let appended = self
                .captains
                .append_batched(&captain.user_id, &job.id, self.cfg.max_batch_orders, now)
                .await?;
            if !appended {
                continue;
            }

            self.state
                .set_status(&job.id, JobStatus::Assigned, Some(REASON_BATCHED))
                .await?;
            self.jobs
                .set_assigned(&job.id, &captain.user_id, true, now)
                .await?;

            Counters::bump(&self.counters.jobs_batched);
            info!(captain_id = %captain.user_id, "order batched onto busy captain");

            self.announce_assignment(job, &captain.user_id, true).await;
            return Ok(Some(captain.user_id));
        }

        Ok(None)
    }

    async fn rerank_by_eta(
        &self,
        ranked: Vec<Captain>,
        pickup: &common::geo::GeoPoint,
    ) -> (Vec<Captain>, HashMap<CaptainId, i64>) {
        if !self.maps.enabled() || ranked.is_empty() {
            return (ranked, HashMap::new());
        }

        let located: Vec<(CaptainId, common::geo::GeoPoint)> = ranked
            .iter()
            .filter_map(|c| c.location.map(|loc| (c.user_id, loc)))
            .collect();
        let origins: Vec<common::geo::GeoPoint> = located.iter().map(|(_, p)| *p).collect();

        match self.maps.etas_to(&origins, pickup).await {
            Ok(etas) => {
                let mut eta_map = HashMap::new();
                for ((captain_id, _), eta) in located.iter().zip(etas) {
                    if let Some(eta) = eta {
                        eta_map.insert(*captain_id, eta.duration_s);
                    }
                }
                (rerank_by_eta(ranked, &eta_map), eta_map)
            }
            Err(e) => {
                // Provider trouble degrades to the scored order.
                warn!(error = %e, "eta reranking failed; keeping scored order");
                (ranked, HashMap::new())
            }
        }
    }

    /// Pops the next candidate and issues a time-bounded exclusive offer.
    /// An empty queue hands the job to the no-captain retry policy.
    #[instrument(skip(self), target = "matcher", fields(job_id = %job_id))]
    pub async fn offer_next(
        self: Arc<Self>,
        job_type: JobType,
        job_id: JobId,
    ) -> AppResult<Option<CaptainId>> {
        // A cancellation that raced the previous offer outcome wins: no
        // further offers are served for a closed job.
        let closed = match self.jobs.fetch(&job_id).await? {
            Some(job) => job.is_closed(),
            None => true,
        };
        if closed {
            self.store.clear_job(&job_id);
            return Ok(None);
        }

        let Some(candidate) = self.store.pop_candidate(&job_id) else {
            Counters::bump(&self.counters.match_no_candidates);
            self.store.clear_offer(&job_id);

            let dispatcher: Arc<dyn Dispatcher> = Arc::new(DispatchHandle(self.clone()));
            let retry_scheduled = self.state.handle_no_captain(job_id, dispatcher).await?;
            if retry_scheduled {
                Counters::bump(&self.counters.match_retries);
                return Ok(None);
            }

            // Retry budget spent: tell the user.
            if let Some(job) = self.jobs.fetch(&job_id).await? {
                self.hub.publish(
                    &user_group(&job.user_id),
                    &PushEvent::JobStatus {
                        job_id,
                        status: DispatchStatus::NoCaptain.to_string(),
                    },
                );
                let _ = self
                    .notifications
                    .notify_user(
                        &job.user_id,
                        "No captains available",
                        "We could not find a nearby captain.",
                        serde_json::json!({ "job_id": job_id }),
                        Priority::High,
                    )
                    .await;
            }
            return Ok(None);
        };

        let expires_at_ms = now_ms() as i64 + self.cfg.offer_timeout_sec as i64 * 1_000;

        self.store.set_offer(job_id, candidate, expires_at_ms);
        self.jobs
            .record_offer(&job_id, &candidate, expires_at_ms)
            .await?;
        Counters::bump(&self.counters.offers_issued);

        self.hub.publish(
            &captain_group(&candidate),
            &PushEvent::JobOffer {
                job_id,
                job_type,
                expires_at_ms,
            },
        );

        // One log row per issued offer.
        self.jobs
            .insert_matching_log(&MatchingLog {
                job_type,
                job_id,
                candidate_ids: None,
                eta_map: None,
                offered_captain_id: Some(candidate),
                expires_at_ms: Some(expires_at_ms),
                created_at_ms: now_ms() as i64,
            })
            .await?;

        // Offline captains get a push notification instead of the event.
        if !self.presence.is_online(PresenceKind::Captain, &candidate) {
            let _ = self
                .notifications
                .notify_user(
                    &candidate,
                    "New job offer",
                    &format!("New {job_type} job available."),
                    serde_json::json!({ "job_id": job_id, "job_type": job_type }),
                    Priority::High,
                )
                .await;
        }

        info!(captain_id = %candidate, expires_at_ms, "offer issued");

        let matcher = self.clone();
        timers::fire_at(expires_at_ms, async move {
            if let Err(e) = matcher
                .handle_offer_timeout(job_type, job_id, candidate)
                .await
            {
                warn!(job_id = %job_id, error = %e, "offer timeout handler failed");
            }
        });

        Ok(Some(candidate))
    }

    /// Timer callback. A no-op unless the same offer is still live: an
    /// accept or reject that won the race has already consumed it.
    ///
    /// Returns a boxed future (rather than `async fn`) because this method
    /// and `offer_next` call each other indirectly through `timers::fire_at`;
    /// without boxing, the mutual recursion gives the two futures an
    /// infinitely-recursive type that the compiler cannot resolve.
    pub fn handle_offer_timeout(
        self: Arc<Self>,
        job_type: JobType,
        job_id: JobId,
        captain_id: CaptainId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<()>> + Send>> {
        let span = tracing::span!(
            target: "matcher",
            tracing::Level::INFO,
            "handle_offer_timeout",
            job_id = %job_id,
            captain_id = %captain_id
        );
        Box::pin(
            async move {
                let Some(job) = self.jobs.fetch(&job_id).await? else {
                    return Ok(());
                };
                if job.is_closed() || job.job_status != DispatchStatus::Offered {
                    return Ok(());
                }

                if self.store.take_offer_if(&job_id, &captain_id).is_none() {
                    // Consumed by accept/reject first.
                    return Ok(());
                }

                Counters::bump(&self.counters.offers_timed_out);
                info!("offer timed out; moving to next candidate");

                self.jobs
                    .reject_offer(&job_id, &captain_id, DispatchStatus::Searching)
                    .await?;
                self.captains.increment_cancellations(&captain_id).await?;

                self.offer_next(job_type, job_id).await?;
                Ok(())
            }
            .instrument(span),
        )
    }

    /// Captain accepts the live offer. The offer take linearises against
    /// reject/timeout; the busy CAS guards double assignment.
    #[instrument(skip(self), target = "matcher", fields(job_id = %job_id, captain_id = %captain_id))]
    pub async fn accept_job(
        self: Arc<Self>,
        job_type: JobType,
        job_id: JobId,
        captain_id: CaptainId,
    ) -> AppResult<Job> {
        let job = self
            .jobs
            .fetch(&job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        if job.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "job already {}",
                job.status
            )));
        }

        if self.store.take_offer_if(&job_id, &captain_id).is_none() {
            return Err(AppError::OfferExpired);
        }

        let now = now_ms() as i64;
        let assigned = self
            .captains
            .try_assign(&captain_id, &job_id, job.job_type, job.vehicle_type, now)
            .await?;

        if assigned.is_none() {
            // The captain lost availability between offer and accept.
            // The offer is consumed, so advance to the next candidate now
            // rather than waiting out the timer.
            self.jobs
                .reject_offer(&job_id, &captain_id, DispatchStatus::Searching)
                .await?;
            let matcher = self.clone();
            tokio::spawn(async move {
                if let Err(e) = matcher.offer_next(job_type, job_id).await {
                    warn!(job_id = %job_id, error = %e, "offer advance after failed accept");
                }
            });
            return Err(AppError::CaptainUnavailable);
        }

        // Job-row linearisation: a racing cancellation wins here and the
        // captain is released untouched.
        if let Err(e) = self
            .state
            .set_status(&job_id, JobStatus::Assigned, None)
            .await
        {
            self.captains.free(&captain_id).await?;
            return Err(e);
        }

        self.jobs
            .set_assigned(&job_id, &captain_id, false, now)
            .await?;
        self.store.clear_job(&job_id);

        Counters::bump(&self.counters.offers_accepted);
        info!("offer accepted; job assigned");

        self.announce_assignment(&job, &captain_id, false).await;

        self.jobs
            .fetch(&job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
    }

    /// Captain declines the live offer; the next candidate is served
    /// immediately.
    #[instrument(skip(self), target = "matcher", fields(job_id = %job_id, captain_id = %captain_id))]
    pub async fn reject_job(
        self: Arc<Self>,
        job_type: JobType,
        job_id: JobId,
        captain_id: CaptainId,
    ) -> AppResult<()> {
        let job = self
            .jobs
            .fetch(&job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        if job.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "job already {}",
                job.status
            )));
        }

        if self.store.take_offer_if(&job_id, &captain_id).is_none() {
            return Err(AppError::OfferExpired);
        }

        Counters::bump(&self.counters.offers_rejected);

        self.jobs
            .reject_offer(&job_id, &captain_id, DispatchStatus::Searching)
            .await?;
        self.captains.increment_cancellations(&captain_id).await?;

        info!("offer rejected; moving to next candidate");
        self.offer_next(job_type, job_id).await?;
        Ok(())
    }

    /// Completion by the assigned captain: terminal success transition,
    /// captain bookkeeping (batched promotion), settlement trigger.
    #[instrument(skip(self), target = "matcher", fields(job_id = %job_id, captain_id = %captain_id))]
    pub async fn complete_job(
        &self,
        job_type: JobType,
        job_id: JobId,
        captain_id: CaptainId,
    ) -> AppResult<Job> {
        let job = self
            .jobs
            .fetch(&job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

        if job.captain_id != Some(captain_id) {
            return Err(AppError::Forbidden(
                "captain not assigned to this job".into(),
            ));
        }

        let terminal = job.job_type.completed_status();
        self.state.set_status(&job_id, terminal, None).await?;
        self.jobs
            .set_dispatch_status(&job_id, DispatchStatus::Completed)
            .await?;

        let captain = self.captains.complete_job(&captain_id, &job_id).await?;
        Counters::bump(&self.counters.jobs_completed);
        info!(
            remaining_batched = captain.batched_order_ids.len(),
            "job completed"
        );

        let status_event = PushEvent::JobStatus {
            job_id,
            status: terminal.to_string(),
        };
        self.hub.publish(&user_group(&job.user_id), &status_event);
        self.hub
            .publish(&job_group(job.job_type, &job_id), &status_event);

        // Settlement failures are retried by the sweep.
        let settle = match job.job_type {
            JobType::Order => self.wallet.settle_order(&job_id).await,
            JobType::Ride => self.wallet.settle_ride(&job_id).await,
        };
        if let Err(e) = settle {
            warn!(error = %e, "settlement at completion failed; sweep will retry");
        }

        self.jobs
            .fetch(&job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
    }

    /// Fans a captain's location out to the rider(s) and job group(s);
    /// batched captains broadcast to every carried order.
    pub async fn broadcast_location(&self, captain: &Captain, lat: f64, lng: f64) {
        let job_ids: Vec<JobId> = match captain.current_job_type {
            Some(JobType::Order) => {
                if captain.batched_order_ids.is_empty() {
                    captain.current_job_id.into_iter().collect()
                } else {
                    captain.batched_order_ids.clone()
                }
            }
            Some(JobType::Ride) => captain.current_job_id.into_iter().collect(),
            None => Vec::new(),
        };

        for job_id in job_ids {
            let Ok(Some(job)) = self.jobs.fetch(&job_id).await else {
                continue;
            };
            let event = PushEvent::LocationUpdate {
                job_id,
                job_type: job.job_type,
                captain_id: captain.user_id,
                lat,
                lng,
            };
            self.hub.publish(&user_group(&job.user_id), &event);
            self.hub.publish(&job_group(job.job_type, &job_id), &event);
        }
    }

    /// Shared assignment fanout: user + captain events, user and
    /// restaurant notifications.
    async fn announce_assignment(&self, job: &Job, captain_id: &CaptainId, batched: bool) {
        let assigned = PushEvent::JobAssigned {
            job_id: job.id,
            job_type: job.job_type,
            captain_id: Some(*captain_id),
            batched,
        };

        self.hub.publish(&user_group(&job.user_id), &assigned);
        self.hub.publish(&captain_group(captain_id), &assigned);

        let _ = self
            .notifications
            .notify_user(
                &job.user_id,
                "Captain assigned",
                "A captain has been assigned to your request.",
                serde_json::json!({ "job_id": job.id, "job_type": job.job_type }),
                Priority::Normal,
            )
            .await;

        if job.job_type == JobType::Order {
            if let Some(restaurant_id) = job.restaurant_id {
                if let Ok(Some(owner_id)) = self.jobs.restaurant_owner(&restaurant_id).await {
                    let _ = self
                        .notifications
                        .notify_user(
                            &owner_id,
                            "Order assigned",
                            "A captain has been assigned for pickup.",
                            serde_json::json!({ "order_id": job.id }),
                            Priority::Normal,
                        )
                        .await;
                }
            }
        }
    }
}

/// Retry hook handed to the state machine; owning the `Arc` here keeps
/// timers from holding a component cycle.
pub struct DispatchHandle(pub Arc<Matcher>);

#[async_trait]
impl Dispatcher for DispatchHandle {
    async fn dispatch(&self, job_type: JobType, job_id: JobId) {
        // Retry entry point; the job may have been cancelled meanwhile.
        if let Err(e) = self.0.clone().create_job(job_type, job_id).await {
            warn!(job_id = %job_id, error = %e, "retry dispatch round failed");
        }
    }
}
