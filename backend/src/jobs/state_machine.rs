//! Job lifecycle state machines and SLA enforcement.
//!
//! Responsibilities:
//! - Per-type transition tables (orders deliver, rides complete).
//! - Conditional status updates with an appended history entry.
//! - SLA timers: assign-by and deliver/complete-by cancellations.
//! - No-captain retry with linear backoff, then terminal cancellation.
//!
//! Timer handlers re-read the job row and act only when the guarded
//! condition still holds; a late firing after an accept is a no-op.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use common::time::now_ms;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::model::{DispatchStatus, Job, JobId, JobStatus, JobType, StatusChange};
use crate::jobs::repository::JobRepository;
use crate::timers;

pub const REASON_ASSIGN_TIMEOUT: &str = "ASSIGN_TIMEOUT";
pub const REASON_DELIVERY_TIMEOUT: &str = "DELIVERY_TIMEOUT";
pub const REASON_COMPLETE_TIMEOUT: &str = "COMPLETE_TIMEOUT";
pub const REASON_NO_CAPTAIN: &str = "NO_CAPTAIN";

/// Re-runs candidate discovery for a job. Implemented by the matcher and
/// passed in at the call site so retry timers never hold a component cycle.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, job_type: JobType, job_id: JobId);
}

/// Whether `from -> to` is legal for the job type. Self-transitions are
/// handled (idempotently) by the caller before consulting the table.
pub fn transition_allowed(job_type: JobType, from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    match job_type {
        JobType::Order => match from {
            PendingPayment => matches!(to, Placed | Failed | Cancelled),
            Placed => matches!(to, Assigned | Cancelled),
            Assigned => matches!(to, Delivered | Cancelled),
            Delivered | Cancelled | Failed => false,
            // Ride-only states are unreachable for orders.
            Requested | Completed => false,
        },
        JobType::Ride => match from {
            PendingPayment => matches!(to, Requested | Failed | Cancelled),
            Requested => matches!(to, Assigned | Cancelled),
            Assigned => matches!(to, Completed | Cancelled),
            Completed | Cancelled | Failed => false,
            Placed | Delivered => false,
        },
    }
}

pub struct JobStateMachine {
    repo: Arc<dyn JobRepository>,
    cfg: Arc<AppConfig>,
}

impl JobStateMachine {
    pub fn new(repo: Arc<dyn JobRepository>, cfg: Arc<AppConfig>) -> Self {
        Self { repo, cfg }
    }

    /// Applies a transition, appending to the status history. Idempotent
    /// when the job already carries `to`; fails with `InvalidTransition`
    /// for illegal moves or when a racer transitions the row first.
    #[instrument(skip(self), target = "state_machine", fields(job_id = %job_id, to = %to))]
    pub async fn set_status(
        &self,
        job_id: &JobId,
        to: JobStatus,
        reason: Option<&str>,
    ) -> AppResult<Job> {
        let job = self
            .repo
            .fetch(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

        if job.status == to {
            return Ok(job);
        }

        if !transition_allowed(job.job_type, job.status, to) {
            return Err(AppError::InvalidTransition(format!(
                "{} -> {}",
                job.status, to
            )));
        }

        let now = now_ms() as i64;
        let change = StatusChange {
            from: Some(job.status),
            to,
            reason: reason.map(str::to_string),
            at_ms: now,
        };

        let applied = self
            .repo
            .transition_status(job_id, job.status, &change, now)
            .await?;
        if !applied {
            // A concurrent writer moved the row first; the caller lost.
            return Err(AppError::InvalidTransition(format!(
                "{} -> {} (stale)",
                job.status, to
            )));
        }

        info!(from = %job.status, reason, "status transition applied");

        self.repo
            .fetch(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
    }

    /// Stamps assign-by / complete-by deadlines on first entry into the
    /// dispatchable state and arms their timers. Later calls no-op.
    pub async fn ensure_sla(self: Arc<Self>, job: &Job) -> AppResult<()> {
        if job.sla.is_some() {
            return Ok(());
        }

        let assign_by_ms =
            job.created_at_ms + self.cfg.assign_timeout_sec(job.job_type) as i64 * 1_000;
        let complete_by_ms =
            job.created_at_ms + self.cfg.completion_sla_sec(job.job_type) as i64 * 1_000;

        if !self
            .repo
            .set_sla(&job.id, assign_by_ms, complete_by_ms)
            .await?
        {
            // Another caller stamped and armed first.
            return Ok(());
        }

        let sm = self.clone();
        let (job_id, job_type) = (job.id, job.job_type);
        timers::fire_at(assign_by_ms, async move {
            if let Err(e) = sm.handle_assign_timeout(job_type, job_id).await {
                warn!(job_id = %job_id, error = %e, "assign timeout handler failed");
            }
        });

        let sm = self.clone();
        timers::fire_at(complete_by_ms, async move {
            if let Err(e) = sm.handle_completion_timeout(job_type, job_id).await {
                warn!(job_id = %job_id, error = %e, "completion timeout handler failed");
            }
        });

        Ok(())
    }

    /// Assign-by deadline: still waiting for a captain => cancel.
    #[instrument(skip(self), target = "state_machine", fields(job_id = %job_id))]
    pub async fn handle_assign_timeout(&self, _job_type: JobType, job_id: JobId) -> AppResult<()> {
        let Some(job) = self.repo.fetch(&job_id).await? else {
            return Ok(());
        };

        let waiting = matches!(
            job.status,
            JobStatus::PendingPayment | JobStatus::Placed | JobStatus::Requested
        );
        if !waiting {
            return Ok(());
        }

        self.set_status(&job_id, JobStatus::Cancelled, Some(REASON_ASSIGN_TIMEOUT))
            .await?;
        self.repo
            .set_dispatch_status(&job_id, DispatchStatus::NoCaptain)
            .await?;
        info!("job cancelled on assign timeout");
        Ok(())
    }

    /// Deliver/complete deadline: still assigned => cancel.
    #[instrument(skip(self), target = "state_machine", fields(job_id = %job_id))]
    pub async fn handle_completion_timeout(
        &self,
        job_type: JobType,
        job_id: JobId,
    ) -> AppResult<()> {
        let Some(job) = self.repo.fetch(&job_id).await? else {
            return Ok(());
        };
        if job.status != JobStatus::Assigned {
            return Ok(());
        }

        let reason = match job_type {
            JobType::Order => REASON_DELIVERY_TIMEOUT,
            JobType::Ride => REASON_COMPLETE_TIMEOUT,
        };
        self.set_status(&job_id, JobStatus::Cancelled, Some(reason))
            .await?;
        info!(reason, "job cancelled on completion timeout");
        Ok(())
    }

    /// Candidate queue drained without an acceptance. Schedules another
    /// discovery round at `delay * (n + 1)` until the retry budget is
    /// spent, then cancels with NO_CAPTAIN. Returns whether a retry was
    /// scheduled.
    #[instrument(skip(self, dispatcher), target = "state_machine", fields(job_id = %job_id))]
    pub async fn handle_no_captain(
        &self,
        job_id: JobId,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> AppResult<bool> {
        let Some(job) = self.repo.fetch(&job_id).await? else {
            return Ok(false);
        };

        if job.matching_retry_count >= self.cfg.match_retry_max {
            self.repo
                .set_dispatch_status(&job_id, DispatchStatus::NoCaptain)
                .await?;
            match self
                .set_status(&job_id, JobStatus::Cancelled, Some(REASON_NO_CAPTAIN))
                .await
            {
                Ok(_) => {}
                Err(AppError::InvalidTransition(_)) => {
                    // Already terminal; nothing left to cancel.
                }
                Err(e) => return Err(e),
            }
            info!("retry budget exhausted; job cancelled with NO_CAPTAIN");
            return Ok(false);
        }

        self.repo.mark_retrying(&job_id).await?;

        let delay =
            Duration::from_secs(self.cfg.match_retry_delay_sec * (job.matching_retry_count + 1) as u64);
        info!(delay_sec = delay.as_secs(), "scheduling matching retry");

        let job_type = job.job_type;
        timers::fire_after(delay, async move {
            dispatcher.dispatch(job_type, job_id).await;
        });

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn order_transitions() {
        let t = |from, to| transition_allowed(JobType::Order, from, to);

        assert!(t(PendingPayment, Placed));
        assert!(t(PendingPayment, Failed));
        assert!(t(PendingPayment, Cancelled));
        assert!(t(Placed, Assigned));
        assert!(t(Placed, Cancelled));
        assert!(t(Assigned, Delivered));
        assert!(t(Assigned, Cancelled));

        assert!(!t(Placed, Delivered));
        assert!(!t(Delivered, Cancelled));
        assert!(!t(Cancelled, Placed));
        assert!(!t(Failed, Placed));
        assert!(!t(PendingPayment, Requested));
        assert!(!t(Assigned, Completed));
    }

    #[test]
    fn ride_transitions() {
        let t = |from, to| transition_allowed(JobType::Ride, from, to);

        assert!(t(PendingPayment, Requested));
        assert!(t(Requested, Assigned));
        assert!(t(Assigned, Completed));
        assert!(t(Assigned, Cancelled));

        assert!(!t(Requested, Completed));
        assert!(!t(Completed, Cancelled));
        assert!(!t(PendingPayment, Placed));
        assert!(!t(Assigned, Delivered));
    }

    #[test]
    fn terminals_admit_nothing() {
        for from in [Delivered, Cancelled, Failed] {
            for to in [
                PendingPayment,
                Placed,
                Requested,
                Assigned,
                Delivered,
                Completed,
                Cancelled,
                Failed,
            ] {
                assert!(!transition_allowed(JobType::Order, from, to));
            }
        }
    }
}
