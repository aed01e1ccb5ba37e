//! In-memory repositories and a wired test rig for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use common::geo::GeoPoint;
use common::time::now_ms;

use backend::cancellation::CancellationEngine;
use backend::cancellation::policy::CancellationPolicy;
use backend::cancellation::repository::{
    CancellationRecord, CancellationRepository, PenaltyRecord, RefundRecord,
};
use backend::captains::model::Captain;
use backend::captains::repository::CaptainRepository;
use backend::config::AppConfig;
use backend::dispatch::candidates::CandidateStore;
use backend::dispatch::matcher::Matcher;
use backend::jobs::model::{
    CaptainId, CurrentOffer, DispatchStatus, Job, JobId, JobStatus, JobType, PaymentMode, Sla,
    StatusChange, UserId, VehicleType,
};
use backend::jobs::repository::{JobRepository, MatchingLog};
use backend::jobs::state_machine::JobStateMachine;
use backend::maps::DisabledMaps;
use backend::metrics::counters::Counters;
use backend::notifications::model::{Notification, NotificationStatus};
use backend::notifications::queue::{LogPushProvider, NotificationQueue};
use backend::notifications::repository::NotificationRepository;
use backend::payments::OfflineGateway;
use backend::presence::PresenceRegistry;
use backend::pricing::surge::{SurgeEstimator, SurgeHistoryStore, SurgeSnapshot};
use backend::push::PushHub;
use backend::wallet::ledger::balanced_amount;
use backend::wallet::model::{LedgerEntry, LedgerTransaction, WalletTransaction};
use backend::wallet::repository::WalletRepository;
use backend::wallet::service::WalletService;

/* =========================
 * In-memory job repository
 * ========================= */

#[derive(Default)]
pub struct InMemoryJobRepository {
    pub jobs: Mutex<HashMap<JobId, Job>>,
    pub matching_logs: Mutex<Vec<MatchingLog>>,
    pub restaurants: Mutex<HashMap<Uuid, (GeoPoint, Option<Uuid>)>>,
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.jobs.lock().insert(job.id, job.clone());
        Ok(())
    }

    async fn fetch(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    async fn transition_status(
        &self,
        job_id: &JobId,
        from: JobStatus,
        change: &StatusChange,
        _now_ms: i64,
    ) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.status != from {
            return Ok(false);
        }
        job.status = change.to;
        job.status_history.push(change.clone());
        Ok(true)
    }

    async fn set_dispatch_status(&self, job_id: &JobId, status: DispatchStatus) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(job_id) {
            job.job_status = status;
        }
        Ok(())
    }

    async fn init_dispatch(&self, job_id: &JobId, pickup: &GeoPoint) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(job_id) {
            job.job_status = DispatchStatus::Searching;
            job.pickup = Some(*pickup);
            job.current_offer = None;
            job.job_attempts = 0;
        }
        Ok(())
    }

    async fn record_offer(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        expires_at_ms: i64,
    ) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(job_id) {
            job.job_status = DispatchStatus::Offered;
            job.current_offer = Some(CurrentOffer {
                captain_id: *captain_id,
                expires_at_ms,
            });
            job.job_attempts += 1;
        }
        Ok(())
    }

    async fn reject_offer(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        job_status: DispatchStatus,
    ) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(job_id) {
            if !job.rejected_captains.contains(captain_id) {
                job.rejected_captains.push(*captain_id);
            }
            job.current_offer = None;
            job.job_status = job_status;
        }
        Ok(())
    }

    async fn set_assigned(
        &self,
        job_id: &JobId,
        captain_id: &CaptainId,
        batched: bool,
        now_ms: i64,
    ) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(job_id) {
            job.captain_id = Some(*captain_id);
            job.job_status = DispatchStatus::Assigned;
            job.current_offer = None;
            job.matched_at_ms = Some(now_ms);
            job.batched = batched;
        }
        Ok(())
    }

    async fn set_sla(
        &self,
        job_id: &JobId,
        assign_by_ms: i64,
        complete_by_ms: i64,
    ) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.sla.is_some() {
            return Ok(false);
        }
        job.sla = Some(Sla {
            assign_by_ms,
            complete_by_ms,
        });
        Ok(true)
    }

    async fn mark_retrying(&self, job_id: &JobId) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(job_id) {
            job.job_status = DispatchStatus::Retrying;
            job.matching_retry_count += 1;
        }
        Ok(())
    }

    async fn set_cancelled_meta(
        &self,
        job_id: &JobId,
        cancelled_by: &str,
        reason: &str,
    ) -> Result<()> {
        if let Some(job) = self.jobs.lock().get_mut(job_id) {
            job.cancelled_by = Some(cancelled_by.to_string());
            job.cancel_reason = Some(reason.to_string());
            job.job_status = DispatchStatus::Cancelled;
            job.current_offer = None;
        }
        Ok(())
    }

    async fn count_active_near(
        &self,
        job_type: JobType,
        center: &GeoPoint,
        radius_m: u32,
    ) -> Result<i64> {
        let radius_km = radius_m as f64 / 1000.0;
        let count = self
            .jobs
            .lock()
            .values()
            .filter(|j| j.job_type == job_type)
            .filter(|j| {
                matches!(
                    j.job_status,
                    DispatchStatus::Created | DispatchStatus::Searching | DispatchStatus::Offered
                )
            })
            .filter(|j| {
                j.pickup
                    .map(|p| p.distance_km(center) <= radius_km)
                    .unwrap_or(false)
            })
            .count();
        Ok(count as i64)
    }

    async fn list_unsettled(&self, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock();
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| !j.settled)
            .filter(|j| j.status == j.job_type.completed_status())
            .cloned()
            .collect();
        out.sort_by_key(|j| j.created_at_ms);
        out.truncate(limit);
        Ok(out)
    }

    async fn insert_matching_log(&self, log: &MatchingLog) -> Result<()> {
        self.matching_logs.lock().push(log.clone());
        Ok(())
    }

    async fn restaurant_point(&self, restaurant_id: &Uuid) -> Result<Option<GeoPoint>> {
        Ok(self.restaurants.lock().get(restaurant_id).map(|(p, _)| *p))
    }

    async fn restaurant_owner(&self, restaurant_id: &Uuid) -> Result<Option<Uuid>> {
        Ok(self
            .restaurants
            .lock()
            .get(restaurant_id)
            .and_then(|(_, owner)| *owner))
    }
}

/* =========================
 * In-memory captain repository
 * ========================= */

#[derive(Default)]
pub struct InMemoryCaptainRepository {
    pub captains: Mutex<HashMap<CaptainId, Captain>>,
    pub trust_logs: Mutex<Vec<(CaptainId, String, String)>>,
}

impl InMemoryCaptainRepository {
    pub fn get(&self, id: &CaptainId) -> Option<Captain> {
        self.captains.lock().get(id).cloned()
    }
}

#[async_trait]
impl CaptainRepository for InMemoryCaptainRepository {
    async fn fetch(&self, captain_id: &CaptainId) -> Result<Option<Captain>> {
        Ok(self.captains.lock().get(captain_id).cloned())
    }

    async fn save(&self, captain: &Captain) -> Result<()> {
        self.captains.lock().insert(captain.user_id, captain.clone());
        Ok(())
    }

    async fn find_available_near(
        &self,
        center: &GeoPoint,
        radius_m: u32,
        vehicles: Option<&[VehicleType]>,
        limit: usize,
    ) -> Result<Vec<Captain>> {
        let radius_km = radius_m as f64 / 1000.0;
        let mut found: Vec<(f64, Captain)> = self
            .captains
            .lock()
            .values()
            .filter(|c| c.is_online && c.is_verified && !c.is_busy)
            .filter(|c| match vehicles {
                Some(allowed) => c.vehicle_type.map(|v| allowed.contains(&v)).unwrap_or(false),
                None => true,
            })
            .filter_map(|c| {
                let d = c.location?.distance_km(center);
                (d <= radius_km).then(|| (d, c.clone()))
            })
            .collect();

        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().map(|(_, c)| c).take(limit).collect())
    }

    async fn count_available_near(&self, center: &GeoPoint, radius_m: u32) -> Result<i64> {
        Ok(self
            .find_available_near(center, radius_m, None, usize::MAX)
            .await?
            .len() as i64)
    }

    async fn find_batchable_near(
        &self,
        center: &GeoPoint,
        radius_m: u32,
        max_batch: usize,
        limit: usize,
    ) -> Result<Vec<Captain>> {
        let radius_km = radius_m as f64 / 1000.0;
        let mut found: Vec<(f64, Captain)> = self
            .captains
            .lock()
            .values()
            .filter(|c| c.is_online && c.is_verified && c.is_busy)
            .filter(|c| c.current_job_type == Some(JobType::Order))
            .filter(|c| c.batched_order_ids.len() < max_batch)
            .filter_map(|c| {
                let d = c.location?.distance_km(center);
                (d <= radius_km).then(|| (d, c.clone()))
            })
            .collect();

        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().map(|(_, c)| c).take(limit).collect())
    }

    async fn try_assign(
        &self,
        captain_id: &CaptainId,
        job_id: &JobId,
        job_type: JobType,
        vehicle_type: Option<VehicleType>,
        now_ms: i64,
    ) -> Result<Option<Captain>> {
        let mut captains = self.captains.lock();
        let Some(captain) = captains.get_mut(captain_id) else {
            return Ok(None);
        };

        let available = captain.is_online && captain.is_verified && !captain.is_busy;
        let vehicle_ok = match vehicle_type {
            Some(required) => captain.vehicle_type == Some(required),
            None => true,
        };
        if !available || !vehicle_ok {
            return Ok(None);
        }

        captain.is_busy = true;
        captain.current_job_id = Some(*job_id);
        captain.current_job_type = Some(job_type);
        captain.last_assigned_at_ms = Some(now_ms);
        captain.last_seen_ms = Some(now_ms);
        if job_type == JobType::Order && !captain.batched_order_ids.contains(job_id) {
            captain.batched_order_ids.push(*job_id);
        }

        Ok(Some(captain.clone()))
    }

    async fn append_batched(
        &self,
        captain_id: &CaptainId,
        order_id: &JobId,
        max_batch: usize,
        now_ms: i64,
    ) -> Result<bool> {
        let mut captains = self.captains.lock();
        let Some(captain) = captains.get_mut(captain_id) else {
            return Ok(false);
        };

        let eligible = captain.is_busy
            && captain.current_job_type == Some(JobType::Order)
            && captain.batched_order_ids.len() < max_batch
            && !captain.batched_order_ids.contains(order_id);
        if !eligible {
            return Ok(false);
        }

        captain.batched_order_ids.push(*order_id);
        captain.last_assigned_at_ms = Some(now_ms);
        Ok(true)
    }

    async fn complete_job(&self, captain_id: &CaptainId, job_id: &JobId) -> Result<Captain> {
        let mut captains = self.captains.lock();
        let captain = captains
            .get_mut(captain_id)
            .ok_or_else(|| anyhow!("captain not found"))?;

        captain.batched_order_ids.retain(|id| id != job_id);
        match captain.batched_order_ids.first().copied() {
            Some(next) => {
                captain.is_busy = true;
                captain.current_job_id = Some(next);
                captain.current_job_type = Some(JobType::Order);
            }
            None => {
                captain.is_busy = false;
                captain.current_job_id = None;
                captain.current_job_type = None;
            }
        }
        captain.total_trips += 1;
        Ok(captain.clone())
    }

    async fn free(&self, captain_id: &CaptainId) -> Result<()> {
        if let Some(captain) = self.captains.lock().get_mut(captain_id) {
            captain.is_busy = false;
            captain.current_job_id = None;
            captain.current_job_type = None;
            captain.batched_order_ids.clear();
        }
        Ok(())
    }

    async fn increment_cancellations(&self, captain_id: &CaptainId) -> Result<()> {
        if let Some(captain) = self.captains.lock().get_mut(captain_id) {
            captain.cancellations += 1;
        }
        Ok(())
    }

    async fn adjust_rating(&self, captain_id: &CaptainId, delta: f64) -> Result<()> {
        if let Some(captain) = self.captains.lock().get_mut(captain_id) {
            captain.average_rating = (captain.average_rating + delta).clamp(0.0, 5.0);
        }
        Ok(())
    }

    async fn update_location(
        &self,
        captain_id: &CaptainId,
        location: &GeoPoint,
        now_ms: i64,
    ) -> Result<()> {
        if let Some(captain) = self.captains.lock().get_mut(captain_id) {
            captain.location = Some(*location);
            captain.last_seen_ms = Some(now_ms);
        }
        Ok(())
    }

    async fn set_go_home_progress(
        &self,
        captain_id: &CaptainId,
        eta_s: i64,
        distance_m: i64,
    ) -> Result<()> {
        if let Some(captain) = self.captains.lock().get_mut(captain_id) {
            captain.go_home_eta_s = Some(eta_s);
            captain.go_home_distance_m = Some(distance_m);
        }
        Ok(())
    }

    async fn insert_trust_log(
        &self,
        captain_id: &CaptainId,
        finding: &str,
        detail: &str,
        _now_ms: i64,
    ) -> Result<()> {
        self.trust_logs
            .lock()
            .push((*captain_id, finding.to_string(), detail.to_string()));
        Ok(())
    }
}

/* =========================
 * In-memory wallet repository
 * ========================= */

pub struct InMemoryWalletRepository {
    pub jobs: Arc<InMemoryJobRepository>,
    pub balances: Mutex<HashMap<UserId, i64>>,
    pub txns: Mutex<Vec<WalletTransaction>>,
    pub ledger: Mutex<Vec<LedgerTransaction>>,
}

impl InMemoryWalletRepository {
    pub fn new(jobs: Arc<InMemoryJobRepository>) -> Self {
        Self {
            jobs,
            balances: Mutex::new(HashMap::new()),
            txns: Mutex::new(Vec::new()),
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn set_balance(&self, user: UserId, balance: i64) {
        self.balances.lock().insert(user, balance);
    }

    pub fn balance_of(&self, user: &UserId) -> i64 {
        self.balances.lock().get(user).copied().unwrap_or(0)
    }

    /// Every recorded transaction must balance.
    pub fn assert_ledger_balanced(&self) {
        for tx in self.ledger.lock().iter() {
            assert_eq!(balanced_amount(&tx.entries).unwrap(), tx.amount);
        }
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn debit_balance(&self, user_id: &UserId, amount: i64) -> Result<Option<i64>> {
        let mut balances = self.balances.lock();
        let Some(balance) = balances.get_mut(user_id) else {
            return Ok(None);
        };
        if *balance < amount {
            return Ok(None);
        }
        *balance -= amount;
        Ok(Some(*balance))
    }

    async fn credit_balance(&self, user_id: &UserId, amount: i64) -> Result<Option<i64>> {
        let mut balances = self.balances.lock();
        let Some(balance) = balances.get_mut(user_id) else {
            return Ok(None);
        };
        *balance += amount;
        Ok(Some(*balance))
    }

    async fn balance(&self, user_id: &UserId) -> Result<i64> {
        Ok(self.balance_of(user_id))
    }

    async fn insert_wallet_txn(&self, txn: &WalletTransaction) -> Result<()> {
        self.txns.lock().push(txn.clone());
        Ok(())
    }

    async fn insert_ledger_transaction(&self, tx: &LedgerTransaction) -> Result<()> {
        self.ledger.lock().push(tx.clone());
        Ok(())
    }

    async fn settle_job(
        &self,
        job_id: &JobId,
        tx: &LedgerTransaction,
        _now_ms: i64,
    ) -> Result<bool> {
        let mut jobs = self.jobs.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.settled {
            return Ok(false);
        }
        job.settled = true;
        drop(jobs);
        self.ledger.lock().push(tx.clone());
        Ok(true)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>> {
        let txns = self.txns.lock();
        Ok(txns
            .iter()
            .filter(|t| t.user_id == *user_id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let ledger = self.ledger.lock();
        Ok(ledger
            .iter()
            .flat_map(|tx| tx.entries.iter())
            .filter(|e| e.user_id == Some(*user_id))
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

/* =========================
 * Small stores
 * ========================= */

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    pub rows: Mutex<HashMap<Uuid, Notification>>,
    pub tokens: Mutex<HashMap<UserId, String>>,
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(&self, n: &Notification) -> Result<()> {
        self.rows.lock().insert(n.id, n.clone());
        Ok(())
    }

    async fn fetch(&self, id: &Uuid) -> Result<Option<Notification>> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &Uuid,
        status: NotificationStatus,
        retry_count: u32,
    ) -> Result<()> {
        if let Some(n) = self.rows.lock().get_mut(id) {
            n.status = status;
            n.retry_count = retry_count;
        }
        Ok(())
    }

    async fn insert_log(&self, _id: &Uuid, _status: &str, _detail: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn user_push_token(&self, user_id: &UserId) -> Result<Option<String>> {
        Ok(self.tokens.lock().get(user_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCancellationRepository {
    pub cancellations: Mutex<Vec<CancellationRecord>>,
    pub refunds: Mutex<Vec<RefundRecord>>,
    pub penalties: Mutex<Vec<PenaltyRecord>>,
}

#[async_trait]
impl CancellationRepository for InMemoryCancellationRepository {
    async fn insert_cancellation(&self, record: &CancellationRecord) -> Result<()> {
        self.cancellations.lock().push(record.clone());
        Ok(())
    }

    async fn insert_refund(&self, record: &RefundRecord) -> Result<()> {
        self.refunds.lock().push(record.clone());
        Ok(())
    }

    async fn insert_penalty(&self, record: &PenaltyRecord) -> Result<()> {
        self.penalties.lock().push(record.clone());
        Ok(())
    }
}

pub struct NullSurgeHistory;

#[async_trait]
impl SurgeHistoryStore for NullSurgeHistory {
    async fn insert(&self, _snapshot: &SurgeSnapshot) -> Result<()> {
        Ok(())
    }
}

/* =========================
 * Wired rig
 * ========================= */

pub struct Rig {
    pub cfg: Arc<AppConfig>,
    pub jobs: Arc<InMemoryJobRepository>,
    pub captains: Arc<InMemoryCaptainRepository>,
    pub wallet_repo: Arc<InMemoryWalletRepository>,
    pub cancellation_repo: Arc<InMemoryCancellationRepository>,
    pub store: Arc<CandidateStore>,
    pub presence: Arc<PresenceRegistry>,
    pub hub: Arc<PushHub>,
    pub state: Arc<JobStateMachine>,
    pub wallet: Arc<WalletService>,
    pub matcher: Arc<Matcher>,
    pub cancellation: Arc<CancellationEngine>,
}

pub fn rig() -> Rig {
    rig_with(|_| {})
}

pub fn rig_with(tune: impl FnOnce(&mut AppConfig)) -> Rig {
    let mut cfg = AppConfig::from_env();
    tune(&mut cfg);
    let cfg = Arc::new(cfg);

    let jobs = Arc::new(InMemoryJobRepository::default());
    let captains = Arc::new(InMemoryCaptainRepository::default());
    let wallet_repo = Arc::new(InMemoryWalletRepository::new(Arc::clone(&jobs)));
    let cancellation_repo = Arc::new(InMemoryCancellationRepository::default());
    let notification_repo = Arc::new(InMemoryNotificationRepository::default());

    let store = Arc::new(CandidateStore::new());
    let presence = Arc::new(PresenceRegistry::new());
    let hub = Arc::new(PushHub::new());

    let jobs_dyn: Arc<dyn JobRepository> = jobs.clone();
    let captains_dyn: Arc<dyn CaptainRepository> = captains.clone();

    let surge = Arc::new(SurgeEstimator::new(
        jobs_dyn.clone(),
        captains_dyn.clone(),
        Arc::new(NullSurgeHistory),
        cfg.match_radius_m,
        cfg.weather_factor,
    ));

    let notifications = Arc::new(NotificationQueue::new(
        notification_repo,
        Arc::new(LogPushProvider),
        cfg.notification_max_retries,
    ));

    let state = Arc::new(JobStateMachine::new(jobs_dyn.clone(), Arc::clone(&cfg)));

    let wallet = Arc::new(WalletService::new(
        wallet_repo.clone(),
        jobs_dyn.clone(),
        cfg.commission_pct,
    ));

    let matcher = Arc::new(Matcher::new(
        jobs_dyn.clone(),
        captains_dyn.clone(),
        Arc::clone(&store),
        Arc::clone(&presence),
        Arc::clone(&hub),
        surge,
        Arc::new(DisabledMaps),
        Arc::clone(&notifications),
        Arc::clone(&state),
        Arc::clone(&wallet),
        Arc::clone(&cfg),
        Counters::default(),
    ));

    let cancellation = Arc::new(CancellationEngine::new(
        jobs_dyn,
        captains_dyn,
        cancellation_repo.clone(),
        Arc::clone(&wallet),
        Arc::new(OfflineGateway),
        Arc::clone(&store),
        Arc::clone(&hub),
        notifications,
        Arc::clone(&state),
        CancellationPolicy::default(),
        Counters::default(),
    ));

    Rig {
        cfg,
        jobs,
        captains,
        wallet_repo,
        cancellation_repo,
        store,
        presence,
        hub,
        state,
        wallet,
        matcher,
        cancellation,
    }
}

/* =========================
 * Fixtures
 * ========================= */

pub const PICKUP: (f64, f64) = (12.97, 77.59);

pub fn pickup_point() -> GeoPoint {
    GeoPoint::new(PICKUP.0, PICKUP.1)
}

/// A captain `km` kilometres due north of the pickup, online, verified,
/// free, on a food-capable bike.
pub fn captain_at_km(rig: &Rig, km: f64, rating: f64) -> Captain {
    let mut captain = Captain::new(Uuid::new_v4(), now_ms() as i64);
    captain.is_online = true;
    captain.is_verified = true;
    captain.vehicle_type = Some(VehicleType::BikePetrol);
    captain.location = Some(GeoPoint::new(PICKUP.0 + km / 111.0, PICKUP.1));
    captain.average_rating = rating;
    rig.captains
        .captains
        .lock()
        .insert(captain.user_id, captain.clone());
    captain
}

pub fn placed_order(rig: &Rig, subtotal: i64) -> Job {
    let job = Job {
        id: Uuid::new_v4(),
        job_type: JobType::Order,
        user_id: Uuid::new_v4(),
        restaurant_id: None,
        captain_id: None,
        pickup: Some(pickup_point()),
        dropoff: None,
        vehicle_type: None,
        amount_subtotal: subtotal,
        surge_multiplier: 1.0,
        surge_amount: 0,
        amount_total: subtotal,
        wallet_amount: 0,
        reward_redeem_amount: 0,
        payment_amount: subtotal,
        payment_mode: PaymentMode::Razorpay,
        gateway_payment_id: Some("pay_test".to_string()),
        is_paid: true,
        settled: false,
        status: JobStatus::Placed,
        job_status: DispatchStatus::Created,
        current_offer: None,
        job_attempts: 0,
        rejected_captains: Vec::new(),
        matching_retry_count: 0,
        sla: None,
        status_history: Vec::new(),
        batched: false,
        cancelled_by: None,
        cancel_reason: None,
        created_at_ms: now_ms() as i64,
        matched_at_ms: None,
    };
    rig.jobs.jobs.lock().insert(job.id, job.clone());
    job
}

pub fn requested_ride(rig: &Rig, fare: i64, vehicle: VehicleType) -> Job {
    let mut job = placed_order(rig, fare);
    job.job_type = JobType::Ride;
    job.status = JobStatus::Requested;
    job.vehicle_type = Some(vehicle);
    job.dropoff = Some(GeoPoint::new(PICKUP.0 + 0.05, PICKUP.1 + 0.05));
    rig.jobs.jobs.lock().insert(job.id, job.clone());
    job
}

pub fn fetch_job(rig: &Rig, id: &JobId) -> Job {
    rig.jobs.jobs.lock().get(id).cloned().expect("job exists")
}
