use anyhow::Result;
use async_trait::async_trait;

use crate::jobs::model::{JobId, UserId};
use crate::wallet::model::{LedgerEntry, LedgerTransaction, WalletTransaction};

/// Persistence boundary for wallet balances and the append-only ledger.
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Compare-and-decrement: the balance only moves when it covers
    /// `amount`. Returns the new balance, or None when it does not.
    async fn debit_balance(&self, user_id: &UserId, amount: i64) -> Result<Option<i64>>;

    /// Returns the new balance, or None when the user row is missing.
    async fn credit_balance(&self, user_id: &UserId, amount: i64) -> Result<Option<i64>>;

    async fn balance(&self, user_id: &UserId) -> Result<i64>;

    async fn insert_wallet_txn(&self, txn: &WalletTransaction) -> Result<()>;

    /// Persists the transaction row and all its entries atomically.
    async fn insert_ledger_transaction(&self, tx: &LedgerTransaction) -> Result<()>;

    /// Atomically flags the job settled and records the settlement
    /// transaction; false when another settlement won the flag.
    async fn settle_job(&self, job_id: &JobId, tx: &LedgerTransaction, now_ms: i64)
    -> Result<bool>;

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>>;

    async fn list_ledger_entries(&self, user_id: &UserId, limit: usize)
    -> Result<Vec<LedgerEntry>>;
}
