//! Process-wide wiring.
//!
//! The `Runtime` value owns the storage pool, the in-memory stores, the
//! push hub, the notification queue and the config, and hands them to
//! components at construction time. There are no module-level singletons
//! and no lazy index creation; migrations run before anything serves.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cancellation::policy::CancellationPolicy;
use crate::cancellation::repository_sqlx::SqlxCancellationRepository;
use crate::cancellation::CancellationEngine;
use crate::captains::repository::CaptainRepository;
use crate::captains::repository_sqlx::SqlxCaptainRepository;
use crate::captains::service::CaptainService;
use crate::config::AppConfig;
use crate::db::Db;
use crate::dispatch::candidates::CandidateStore;
use crate::dispatch::matcher::Matcher;
use crate::jobs::repository::JobRepository;
use crate::jobs::repository_sqlx::SqlxJobRepository;
use crate::jobs::state_machine::JobStateMachine;
use crate::maps::{DisabledMaps, GoogleMapsClient, MapsClient};
use crate::metrics::counters::Counters;
use crate::notifications::queue::{LogPushProvider, NotificationQueue};
use crate::notifications::repository_sqlx::SqlxNotificationRepository;
use crate::payments::{OfflineGateway, PaymentGateway};
use crate::presence::PresenceRegistry;
use crate::pricing::surge::{SqlxSurgeHistory, SurgeEstimator};
use crate::push::PushHub;
use crate::api::idempotency::IdempotencyCache;
use crate::api::ratelimit::RateLimiter;
use crate::wallet::repository_sqlx::SqlxWalletRepository;
use crate::wallet::service::WalletService;

pub struct Runtime {
    pub cfg: Arc<AppConfig>,
    pub db: Db,

    pub jobs: Arc<dyn JobRepository>,
    pub captain_repo: Arc<dyn CaptainRepository>,

    pub store: Arc<CandidateStore>,
    pub presence: Arc<PresenceRegistry>,
    pub hub: Arc<PushHub>,

    pub surge: Arc<SurgeEstimator>,
    pub maps: Arc<dyn MapsClient>,
    pub notifications: Arc<NotificationQueue>,
    pub state_machine: Arc<JobStateMachine>,
    pub wallet: Arc<WalletService>,
    pub matcher: Arc<Matcher>,
    pub captains: Arc<CaptainService>,
    pub cancellation: Arc<CancellationEngine>,

    pub ratelimiter: Arc<RateLimiter>,
    pub idempotency: Arc<IdempotencyCache>,
    pub counters: Counters,
}

impl Runtime {
    /// Connects storage, runs migrations and wires every component.
    pub async fn initialize(cfg: AppConfig) -> Result<Arc<Self>> {
        let cfg = Arc::new(cfg);

        let db = Db::connect(&cfg.database_url).await?;
        db.migrate().await?;

        let counters = Counters::default();

        let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(db.pool.clone()));
        let captain_repo: Arc<dyn CaptainRepository> =
            Arc::new(SqlxCaptainRepository::new(db.pool.clone()));
        let wallet_repo = Arc::new(SqlxWalletRepository::new(db.pool.clone()));
        let notification_repo = Arc::new(SqlxNotificationRepository::new(db.pool.clone()));
        let cancellation_repo = Arc::new(SqlxCancellationRepository::new(db.pool.clone()));
        let surge_history = Arc::new(SqlxSurgeHistory::new(db.pool.clone()));

        let store = Arc::new(CandidateStore::new());
        let presence = Arc::new(PresenceRegistry::new());
        let hub = Arc::new(PushHub::new());

        let maps: Arc<dyn MapsClient> = match &cfg.maps_api_key {
            Some(key) => Arc::new(GoogleMapsClient::new(
                key.clone(),
                Duration::from_secs(cfg.maps_timeout_sec),
            )?),
            None => Arc::new(DisabledMaps),
        };

        let gateway: Arc<dyn PaymentGateway> = Arc::new(OfflineGateway);

        let surge = Arc::new(SurgeEstimator::new(
            Arc::clone(&jobs),
            Arc::clone(&captain_repo),
            surge_history,
            cfg.match_radius_m,
            cfg.weather_factor,
        ));

        let notifications = Arc::new(NotificationQueue::new(
            notification_repo,
            Arc::new(LogPushProvider),
            cfg.notification_max_retries,
        ));

        let state_machine = Arc::new(JobStateMachine::new(Arc::clone(&jobs), Arc::clone(&cfg)));

        let wallet = Arc::new(WalletService::new(
            wallet_repo,
            Arc::clone(&jobs),
            cfg.commission_pct,
        ));

        let matcher = Arc::new(Matcher::new(
            Arc::clone(&jobs),
            Arc::clone(&captain_repo),
            Arc::clone(&store),
            Arc::clone(&presence),
            Arc::clone(&hub),
            Arc::clone(&surge),
            Arc::clone(&maps),
            Arc::clone(&notifications),
            Arc::clone(&state_machine),
            Arc::clone(&wallet),
            Arc::clone(&cfg),
            counters.clone(),
        ));

        let captains = Arc::new(CaptainService::new(
            Arc::clone(&captain_repo),
            Arc::clone(&maps),
            Arc::clone(&matcher),
            Arc::clone(&cfg),
        ));

        let cancellation = Arc::new(CancellationEngine::new(
            Arc::clone(&jobs),
            Arc::clone(&captain_repo),
            cancellation_repo,
            Arc::clone(&wallet),
            gateway,
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&notifications),
            Arc::clone(&state_machine),
            CancellationPolicy::default(),
            counters.clone(),
        ));

        let ratelimiter = Arc::new(RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_window_sec,
            cfg.rate_limit_max_requests,
            cfg.rate_limit_exempt_paths.clone(),
        ));
        let idempotency = Arc::new(IdempotencyCache::new(cfg.idempotency_ttl_sec));

        Ok(Arc::new(Self {
            cfg,
            db,
            jobs,
            captain_repo,
            store,
            presence,
            hub,
            surge,
            maps,
            notifications,
            state_machine,
            wallet,
            matcher,
            captains,
            cancellation,
            ratelimiter,
            idempotency,
            counters,
        }))
    }

    /// Starts background workers (notification delivery).
    pub fn start_workers(&self) {
        Arc::clone(&self.notifications).spawn_worker(Duration::from_millis(500));
    }
}
