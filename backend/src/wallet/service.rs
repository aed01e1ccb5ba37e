//! Wallet operations and settlement.
//!
//! Balance updates pair a cached-projection write (users.wallet_balance)
//! with a balanced ledger transaction; the ledger is authoritative and an
//! imbalance fails loudly before anything is persisted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use common::time::now_ms;

use crate::error::{AppError, AppResult};
use crate::jobs::model::{Job, JobId, JobType, PaymentMode, UserId};
use crate::jobs::repository::JobRepository;
use crate::logger::warn_if_slow;
use crate::wallet::ledger;
use crate::wallet::model::{
    Direction, LedgerEntry, LedgerTransaction, ReferenceType, WalletTransaction,
};
use crate::wallet::repository::WalletRepository;

pub struct WalletService {
    repo: Arc<dyn WalletRepository>,
    jobs: Arc<dyn JobRepository>,
    commission_pct: f64,
}

impl WalletService {
    pub fn new(
        repo: Arc<dyn WalletRepository>,
        jobs: Arc<dyn JobRepository>,
        commission_pct: f64,
    ) -> Self {
        Self {
            repo,
            jobs,
            commission_pct,
        }
    }

    pub async fn balance(&self, user_id: &UserId) -> AppResult<i64> {
        Ok(self.repo.balance(user_id).await?)
    }

    /// Debits the wallet and records `USER_WALLET:DEBIT / PLATFORM_CASH:CREDIT`.
    /// Fails with `InsufficientFunds` when the balance does not cover it.
    #[instrument(skip(self), target = "wallet", fields(user_id = %user_id))]
    pub async fn debit(
        &self,
        user_id: &UserId,
        amount: i64,
        reason: &str,
        source: &str,
        reference: Option<&str>,
    ) -> AppResult<WalletTransaction> {
        if amount <= 0 {
            return Err(AppError::Validation("debit amount must be positive".into()));
        }

        let balance_after = self
            .repo
            .debit_balance(user_id, amount)
            .await?
            .ok_or(AppError::InsufficientFunds)?;

        let txn = self
            .write_movement(
                user_id,
                amount,
                Direction::Debit,
                reason,
                source,
                reference,
                false,
                balance_after,
                ledger::user_debit_entries(*user_id, amount),
            )
            .await?;

        info!(amount, balance_after, reason, "wallet debited");
        Ok(txn)
    }

    /// Credits the wallet and records the inverse entry pair.
    #[instrument(skip(self), target = "wallet", fields(user_id = %user_id))]
    pub async fn credit(
        &self,
        user_id: &UserId,
        amount: i64,
        reason: &str,
        source: &str,
        reference: Option<&str>,
    ) -> AppResult<WalletTransaction> {
        self.credit_inner(user_id, amount, reason, source, reference, false)
            .await
    }

    /// A credit flagged as a refund.
    pub async fn refund(
        &self,
        user_id: &UserId,
        amount: i64,
        reason: &str,
        source: &str,
        reference: Option<&str>,
    ) -> AppResult<WalletTransaction> {
        self.credit_inner(user_id, amount, reason, source, reference, true)
            .await
    }

    async fn credit_inner(
        &self,
        user_id: &UserId,
        amount: i64,
        reason: &str,
        source: &str,
        reference: Option<&str>,
        is_refund: bool,
    ) -> AppResult<WalletTransaction> {
        if amount <= 0 {
            return Err(AppError::Validation(
                "credit amount must be positive".into(),
            ));
        }

        let balance_after = self
            .repo
            .credit_balance(user_id, amount)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

        let txn = self
            .write_movement(
                user_id,
                amount,
                Direction::Credit,
                reason,
                source,
                reference,
                is_refund,
                balance_after,
                ledger::user_credit_entries(*user_id, amount),
            )
            .await?;

        info!(amount, balance_after, reason, is_refund, "wallet credited");
        Ok(txn)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_movement(
        &self,
        user_id: &UserId,
        amount: i64,
        kind: Direction,
        reason: &str,
        source: &str,
        reference: Option<&str>,
        is_refund: bool,
        balance_after: i64,
        entries: Vec<LedgerEntry>,
    ) -> AppResult<WalletTransaction> {
        let txn = WalletTransaction {
            txn_id: Uuid::new_v4(),
            user_id: *user_id,
            amount,
            kind,
            reason: reason.to_string(),
            source: source.to_string(),
            reference: reference.map(str::to_string),
            is_refund,
            balance_after,
            created_at_ms: now_ms() as i64,
        };
        self.repo.insert_wallet_txn(&txn).await?;

        let tx = LedgerTransaction::new(
            ReferenceType::Wallet,
            Some(txn.txn_id.to_string()),
            entries,
            txn.created_at_ms,
        )?;
        self.repo.insert_ledger_transaction(&tx).await?;

        Ok(txn)
    }

    /// Settles a delivered order: debit CUSTOMER_PAYMENTS, credit
    /// PLATFORM_REVENUE (commission) and RESTAURANT_PAYABLE (remainder).
    /// Idempotent; a second call returns None.
    #[instrument(skip(self), target = "wallet", fields(job_id = %job_id))]
    pub async fn settle_order(&self, job_id: &JobId) -> AppResult<Option<LedgerTransaction>> {
        let Some(job) = self.jobs.fetch(job_id).await? else {
            return Err(AppError::NotFound(format!("order {job_id}")));
        };
        if job.job_type != JobType::Order {
            return Err(AppError::Validation("not an order".into()));
        }
        let Some(amount) = settleable_amount(&job) else {
            return Ok(None);
        };

        let entries =
            ledger::order_settlement_entries(amount, self.commission_pct, job.restaurant_id);
        self.commit_settlement(job_id, ReferenceType::Order, entries)
            .await
    }

    /// Settles a completed ride between PLATFORM_REVENUE and CAPTAIN_PAYABLE.
    #[instrument(skip(self), target = "wallet", fields(job_id = %job_id))]
    pub async fn settle_ride(&self, job_id: &JobId) -> AppResult<Option<LedgerTransaction>> {
        let Some(job) = self.jobs.fetch(job_id).await? else {
            return Err(AppError::NotFound(format!("ride {job_id}")));
        };
        if job.job_type != JobType::Ride {
            return Err(AppError::Validation("not a ride".into()));
        }
        let Some(amount) = settleable_amount(&job) else {
            return Ok(None);
        };

        let entries = ledger::ride_settlement_entries(amount, self.commission_pct, job.captain_id);
        self.commit_settlement(job_id, ReferenceType::Ride, entries)
            .await
    }

    async fn commit_settlement(
        &self,
        job_id: &JobId,
        reference_type: ReferenceType,
        entries: Vec<LedgerEntry>,
    ) -> AppResult<Option<LedgerTransaction>> {
        let tx = LedgerTransaction::new(
            reference_type,
            Some(job_id.to_string()),
            entries,
            now_ms() as i64,
        )?;

        let settled = warn_if_slow("settle_job", Duration::from_millis(200), async {
            self.repo.settle_job(job_id, &tx, tx.created_at_ms).await
        })
        .await?;

        if !settled {
            // Another settlement already holds the flag.
            return Ok(None);
        }

        info!(tx_id = %tx.tx_id, amount = tx.amount, "settlement recorded");
        Ok(Some(tx))
    }

    /// Bounded sweep settling delivered orders and completed rides that
    /// have not been settled yet. Per-item failures are logged and skipped.
    pub async fn run_settlements(&self, limit: usize) -> AppResult<Vec<LedgerTransaction>> {
        let pending = self.jobs.list_unsettled(limit).await?;
        let mut settled = Vec::new();

        for job in pending {
            let result = match job.job_type {
                JobType::Order => self.settle_order(&job.id).await,
                JobType::Ride => self.settle_ride(&job.id).await,
            };
            match result {
                Ok(Some(tx)) => settled.push(tx),
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "settlement failed; skipping");
                }
            }
        }

        Ok(settled)
    }

    pub async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> AppResult<Vec<WalletTransaction>> {
        Ok(self.repo.list_transactions(user_id, limit).await?)
    }
}

/// Amount a closed job settles for, if it qualifies: paid (or COD), in the
/// terminal success state, positive total.
fn settleable_amount(job: &Job) -> Option<i64> {
    if job.status != job.job_type.completed_status() {
        return None;
    }
    if !job.is_paid && job.payment_mode != PaymentMode::Cod {
        return None;
    }
    if job.amount_total <= 0 {
        return None;
    }
    Some(job.amount_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{DispatchStatus, JobStatus};
    use common::geo::GeoPoint;

    fn mk_job(job_type: JobType, status: JobStatus, paid: bool, mode: PaymentMode) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type,
            user_id: Uuid::new_v4(),
            restaurant_id: Some(Uuid::new_v4()),
            captain_id: Some(Uuid::new_v4()),
            pickup: Some(GeoPoint::new(12.97, 77.59)),
            dropoff: None,
            vehicle_type: None,
            amount_subtotal: 30_000,
            surge_multiplier: 1.0,
            surge_amount: 0,
            amount_total: 30_000,
            wallet_amount: 0,
            reward_redeem_amount: 0,
            payment_amount: 30_000,
            payment_mode: mode,
            gateway_payment_id: None,
            is_paid: paid,
            settled: false,
            status,
            job_status: DispatchStatus::Completed,
            current_offer: None,
            job_attempts: 1,
            rejected_captains: vec![],
            matching_retry_count: 0,
            sla: None,
            status_history: vec![],
            batched: false,
            cancelled_by: None,
            cancel_reason: None,
            created_at_ms: 0,
            matched_at_ms: None,
        }
    }

    #[test]
    fn settleable_requires_terminal_success() {
        let job = mk_job(JobType::Order, JobStatus::Assigned, true, PaymentMode::Razorpay);
        assert_eq!(settleable_amount(&job), None);

        let job = mk_job(JobType::Order, JobStatus::Delivered, true, PaymentMode::Razorpay);
        assert_eq!(settleable_amount(&job), Some(30_000));

        let job = mk_job(JobType::Ride, JobStatus::Completed, true, PaymentMode::Wallet);
        assert_eq!(settleable_amount(&job), Some(30_000));
    }

    #[test]
    fn unpaid_settles_only_for_cod() {
        let job = mk_job(JobType::Order, JobStatus::Delivered, false, PaymentMode::Razorpay);
        assert_eq!(settleable_amount(&job), None);

        let job = mk_job(JobType::Order, JobStatus::Delivered, false, PaymentMode::Cod);
        assert_eq!(settleable_amount(&job), Some(30_000));
    }

    #[test]
    fn zero_total_never_settles() {
        let mut job = mk_job(JobType::Order, JobStatus::Delivered, true, PaymentMode::Wallet);
        job.amount_total = 0;
        assert_eq!(settleable_amount(&job), None);
    }
}
