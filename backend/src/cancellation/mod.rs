//! Cancellation engine.
//!
//! Responsibilities:
//! - Linearise the cancellation against the job row (the state-machine
//!   transition is the commit point; a losing racer has no side effects).
//! - Invalidate any live offer and free the assigned captain.
//! - Apply the refund/penalty policy: gateway refund first where the
//!   original payment allows it, wallet credit as the fallback.
//! - Record cancellation/refund/penalty rows and notify the user.

pub mod policy;
pub mod repository;
pub mod repository_sqlx;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use common::time::now_ms;

use crate::captains::repository::CaptainRepository;
use crate::cancellation::policy::CancellationPolicy;
use crate::cancellation::repository::{
    CancellationRecord, CancellationRepository, PenaltyRecord, RefundRecord,
};
use crate::dispatch::candidates::CandidateStore;
use crate::error::{AppError, AppResult};
use crate::jobs::model::{Job, JobId, JobStatus, JobType};
use crate::jobs::repository::JobRepository;
use crate::jobs::state_machine::JobStateMachine;
use crate::metrics::counters::Counters;
use crate::notifications::model::Priority;
use crate::notifications::queue::NotificationQueue;
use crate::payments::PaymentGateway;
use crate::push::{PushEvent, PushHub, user_group};
use crate::wallet::service::WalletService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    User,
    Captain,
    Restaurant,
    System,
    Admin,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActorRole::User => "USER",
            ActorRole::Captain => "CAPTAIN",
            ActorRole::Restaurant => "RESTAURANT",
            ActorRole::System => "SYSTEM",
            ActorRole::Admin => "ADMIN",
        })
    }
}

impl FromStr for ActorRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(ActorRole::User),
            "CAPTAIN" => Ok(ActorRole::Captain),
            "RESTAURANT" => Ok(ActorRole::Restaurant),
            "SYSTEM" => Ok(ActorRole::System),
            "ADMIN" => Ok(ActorRole::Admin),
            other => Err(anyhow::anyhow!("invalid actor role: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancellationRequest {
    pub actor_id: Option<Uuid>,
    pub actor_role: ActorRole,
    pub reason: String,
    pub late_delivery: bool,
    pub no_show: bool,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub cancellation: CancellationRecord,
    pub refund: Option<RefundRecord>,
    pub penalty: Option<PenaltyRecord>,
}

pub struct CancellationEngine {
    jobs: Arc<dyn JobRepository>,
    captains: Arc<dyn CaptainRepository>,
    repo: Arc<dyn CancellationRepository>,
    wallet: Arc<WalletService>,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<CandidateStore>,
    hub: Arc<PushHub>,
    notifications: Arc<NotificationQueue>,
    state: Arc<JobStateMachine>,
    policy: CancellationPolicy,
    counters: Counters,
}

impl CancellationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        captains: Arc<dyn CaptainRepository>,
        repo: Arc<dyn CancellationRepository>,
        wallet: Arc<WalletService>,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<CandidateStore>,
        hub: Arc<PushHub>,
        notifications: Arc<NotificationQueue>,
        state: Arc<JobStateMachine>,
        policy: CancellationPolicy,
        counters: Counters,
    ) -> Self {
        Self {
            jobs,
            captains,
            repo,
            wallet,
            gateway,
            store,
            hub,
            notifications,
            state,
            policy,
            counters,
        }
    }

    pub fn policy(&self) -> &CancellationPolicy {
        &self.policy
    }

    #[instrument(
        skip(self, request),
        target = "cancellation",
        fields(job_id = %job_id, actor_role = %request.actor_role)
    )]
    pub async fn cancel(
        &self,
        job_type: JobType,
        job_id: JobId,
        request: CancellationRequest,
    ) -> AppResult<CancellationOutcome> {
        let job = self
            .jobs
            .fetch(&job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

        if job.job_type != job_type {
            return Err(AppError::Validation("job type mismatch".into()));
        }
        if job.is_closed() {
            return Err(AppError::InvalidTransition(format!(
                "job already {}",
                job.status
            )));
        }

        // User and captain actors may only cancel their own job; platform
        // roles act on anything.
        if let Some(actor_id) = request.actor_id {
            let owns = match request.actor_role {
                ActorRole::User => actor_id == job.user_id,
                ActorRole::Captain => job.captain_id == Some(actor_id),
                ActorRole::Restaurant | ActorRole::System | ActorRole::Admin => true,
            };
            if !owns {
                return Err(AppError::Forbidden("job does not belong to actor".into()));
            }
        }

        let amount_paid = job.amount_total;
        let decision = policy::compute(
            &self.policy,
            request.actor_role,
            job.captain_id.is_some(),
            amount_paid,
            request.late_delivery,
            request.no_show,
        );

        // Commit point: a racing accept that transitions the row first
        // makes this fail, and no side effects have happened yet.
        self.state
            .set_status(&job_id, JobStatus::Cancelled, Some(request.reason.as_str()))
            .await?;

        self.jobs
            .set_cancelled_meta(&job_id, &request.actor_role.to_string(), &request.reason)
            .await?;

        // Any live offer dies with the job.
        self.store.clear_job(&job_id);

        if let Some(captain_id) = job.captain_id {
            self.captains.free(&captain_id).await?;
        }

        let now = now_ms() as i64;
        let cancellation = CancellationRecord {
            id: Uuid::new_v4(),
            job_type,
            job_id,
            actor_id: request.actor_id,
            actor_role: request.actor_role,
            reason: request.reason.clone(),
            late_delivery: request.late_delivery,
            no_show: request.no_show,
            refund_amount: decision.refund_amount,
            penalty_amount: decision.penalty_amount,
            metadata: request.metadata.clone(),
            created_at_ms: now,
        };
        self.repo.insert_cancellation(&cancellation).await?;

        if decision.no_show_fee > 0 {
            self.charge_no_show_fee(&job, decision.no_show_fee).await?;
        }

        let refund = if decision.refund_amount > 0 && job.is_paid {
            Some(self.apply_refund(&job, decision.refund_amount).await?)
        } else {
            None
        };

        let penalty = if decision.penalty_amount > 0 && request.actor_role == ActorRole::Captain {
            self.apply_captain_penalty(&job, decision.penalty_amount)
                .await?
        } else {
            None
        };

        Counters::bump(&self.counters.jobs_cancelled);
        info!(
            refund_amount = decision.refund_amount,
            penalty_amount = decision.penalty_amount,
            "job cancelled"
        );

        self.hub.publish(
            &user_group(&job.user_id),
            &PushEvent::JobStatus {
                job_id,
                status: JobStatus::Cancelled.to_string(),
            },
        );
        let noun = match job_type {
            JobType::Order => "order",
            JobType::Ride => "ride",
        };
        let _ = self
            .notifications
            .notify_user(
                &job.user_id,
                &format!("{} cancelled", capitalize(noun)),
                &format!("Your {noun} {job_id} has been cancelled."),
                serde_json::json!({ "job_id": job_id, "reason": request.reason }),
                Priority::High,
            )
            .await;

        Ok(CancellationOutcome {
            cancellation,
            refund,
            penalty,
        })
    }

    /// No-show fee: debit the user's wallet; when the wallet cannot cover
    /// it, record a penalty instead of failing the cancellation.
    async fn charge_no_show_fee(&self, job: &Job, fee: i64) -> AppResult<()> {
        let source = match job.job_type {
            JobType::Order => "FOOD",
            JobType::Ride => "RIDE",
        };

        match self
            .wallet
            .debit(
                &job.user_id,
                fee,
                "NO_SHOW_FEE",
                source,
                Some(&job.id.to_string()),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(AppError::InsufficientFunds) => {
                self.repo
                    .insert_penalty(&PenaltyRecord {
                        id: Uuid::new_v4(),
                        actor_id: job.user_id,
                        amount: fee,
                        reason: "NO_SHOW_FEE".to_string(),
                        reference: job.id.to_string(),
                        created_at_ms: now_ms() as i64,
                    })
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Gateway refund when the original payment went through one and a
    /// payment id is known; wallet credit otherwise or on failure. The
    /// fallback keeps refunds user-positive even with the gateway down.
    async fn apply_refund(&self, job: &Job, amount: i64) -> AppResult<RefundRecord> {
        let mut method = "WALLET";

        if job.payment_mode.gateway_refundable() {
            if let Some(payment_id) = job.gateway_payment_id.as_deref() {
                match self.gateway.refund(payment_id, amount).await {
                    Ok(()) => method = "RAZORPAY",
                    Err(e) => {
                        warn!(error = %e, "gateway refund failed; crediting wallet");
                    }
                }
            }
        }

        if method == "WALLET" {
            self.wallet
                .refund(
                    &job.user_id,
                    amount,
                    "CANCEL_REFUND",
                    "REFUND",
                    Some(&job.id.to_string()),
                )
                .await?;
        }

        let record = RefundRecord {
            id: Uuid::new_v4(),
            user_id: job.user_id,
            amount,
            source: "CANCEL".to_string(),
            reference: job.id.to_string(),
            method: method.to_string(),
            created_at_ms: now_ms() as i64,
        };
        self.repo.insert_refund(&record).await?;
        Ok(record)
    }

    /// Captain-fault bookkeeping: penalty record, wallet debit where the
    /// balance allows, and a rating decrement.
    async fn apply_captain_penalty(
        &self,
        job: &Job,
        amount: i64,
    ) -> AppResult<Option<PenaltyRecord>> {
        let Some(captain_id) = job.captain_id else {
            return Ok(None);
        };

        let record = PenaltyRecord {
            id: Uuid::new_v4(),
            actor_id: captain_id,
            amount,
            reason: "CAPTAIN_CANCEL".to_string(),
            reference: job.id.to_string(),
            created_at_ms: now_ms() as i64,
        };
        self.repo.insert_penalty(&record).await?;

        match self
            .wallet
            .debit(
                &captain_id,
                amount,
                "CAPTAIN_CANCEL",
                "PENALTY",
                Some(&job.id.to_string()),
            )
            .await
        {
            Ok(_) => {}
            Err(AppError::InsufficientFunds) => {
                warn!(captain_id = %captain_id, "captain wallet cannot cover penalty");
            }
            Err(e) => return Err(e),
        }

        self.captains.adjust_rating(&captain_id, -0.1).await?;

        Ok(Some(record))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
