use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::jobs::model::{JobId, UserId};
use crate::wallet::model::{LedgerEntry, LedgerTransaction, WalletTransaction};
use crate::wallet::repository::WalletRepository;

/// SQLx-backed implementation of WalletRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxWalletRepository {
    pool: AnyPool,
}

impl SqlxWalletRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletRepository for SqlxWalletRepository {
    async fn debit_balance(&self, user_id: &UserId, amount: i64) -> Result<Option<i64>> {
        // Compare-and-decrement: the WHERE clause is the funds check.
        let res = sqlx::query(
            r#"
UPDATE users
SET wallet_balance = wallet_balance - ?
WHERE user_id = ? AND wallet_balance >= ?;
"#,
        )
        .bind(amount)
        .bind(user_id.to_string())
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() != 1 {
            return Ok(None);
        }

        Ok(Some(self.balance(user_id).await?))
    }

    async fn credit_balance(&self, user_id: &UserId, amount: i64) -> Result<Option<i64>> {
        let res = sqlx::query(
            r#"
UPDATE users
SET wallet_balance = wallet_balance + ?
WHERE user_id = ?;
"#,
        )
        .bind(amount)
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() != 1 {
            return Ok(None);
        }

        Ok(Some(self.balance(user_id).await?))
    }

    async fn balance(&self, user_id: &UserId) -> Result<i64> {
        let row = sqlx::query("SELECT wallet_balance FROM users WHERE user_id = ?;")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("wallet_balance")).unwrap_or(0))
    }

    async fn insert_wallet_txn(&self, txn: &WalletTransaction) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO wallet_transactions
  (txn_id, user_id, amount, kind, reason, source, reference, is_refund, balance_after, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(txn.txn_id.to_string())
        .bind(txn.user_id.to_string())
        .bind(txn.amount)
        .bind(txn.kind.to_string())
        .bind(&txn.reason)
        .bind(&txn.source)
        .bind(txn.reference.as_deref())
        .bind(if txn.is_refund { 1_i64 } else { 0 })
        .bind(txn.balance_after)
        .bind(txn.created_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_ledger_transaction(&self, tx: &LedgerTransaction) -> Result<()> {
        let mut dbtx = self.pool.begin().await?;
        write_ledger_tx(&mut dbtx, tx).await?;
        dbtx.commit().await?;
        Ok(())
    }

    async fn settle_job(
        &self,
        job_id: &JobId,
        tx: &LedgerTransaction,
        now_ms: i64,
    ) -> Result<bool> {
        let mut dbtx = self.pool.begin().await?;

        // CAS on the settled flag decides which settlement attempt wins.
        let res = sqlx::query(
            r#"
UPDATE jobs
SET settled = 1, settled_ms = ?
WHERE job_id = ? AND settled = 0;
"#,
        )
        .bind(now_ms)
        .bind(job_id.to_string())
        .execute(&mut *dbtx)
        .await?;

        if res.rows_affected() != 1 {
            dbtx.rollback().await?;
            return Ok(false);
        }

        write_ledger_tx(&mut dbtx, tx).await?;
        dbtx.commit().await?;
        Ok(true)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query(
            r#"
SELECT txn_id, user_id, amount, kind, reason, source, reference, is_refund, balance_after, created_ms
FROM wallet_transactions
WHERE user_id = ?
ORDER BY created_ms DESC
LIMIT ?;
"#,
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_wallet_txn(&r) {
                Ok(t) => out.push(t),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed wallet transaction row");
                }
            }
        }
        Ok(out)
    }

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
SELECT user_id, account, direction, amount
FROM ledger_entries
WHERE user_id = ?
ORDER BY created_ms DESC
LIMIT ?;
"#,
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            out.push(row_to_ledger_entry(&r)?);
        }
        Ok(out)
    }
}

async fn write_ledger_tx(
    dbtx: &mut sqlx::Transaction<'_, sqlx::Any>,
    tx: &LedgerTransaction,
) -> Result<()> {
    sqlx::query(
        r#"
INSERT INTO ledger_transactions (tx_id, reference_type, reference_id, amount, created_ms)
VALUES (?, ?, ?, ?, ?);
"#,
    )
    .bind(tx.tx_id.to_string())
    .bind(tx.reference_type.to_string())
    .bind(tx.reference_id.as_deref())
    .bind(tx.amount)
    .bind(tx.created_at_ms)
    .execute(&mut **dbtx)
    .await?;

    for entry in &tx.entries {
        sqlx::query(
            r#"
INSERT INTO ledger_entries
  (entry_id, tx_id, user_id, account, direction, amount, reference_type, reference_id, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tx.tx_id.to_string())
        .bind(entry.user_id.map(|u| u.to_string()))
        .bind(entry.account.to_string())
        .bind(entry.direction.to_string())
        .bind(entry.amount)
        .bind(tx.reference_type.to_string())
        .bind(tx.reference_id.as_deref())
        .bind(tx.created_at_ms)
        .execute(&mut **dbtx)
        .await?;
    }

    Ok(())
}

fn row_to_wallet_txn(r: &sqlx::any::AnyRow) -> Result<WalletTransaction> {
    let txn_id: String = r.get("txn_id");
    let user_id: String = r.get("user_id");
    Ok(WalletTransaction {
        txn_id: Uuid::parse_str(&txn_id).context("invalid txn_id")?,
        user_id: Uuid::parse_str(&user_id).context("invalid user_id")?,
        amount: r.get("amount"),
        kind: r.get::<String, _>("kind").parse()?,
        reason: r.get("reason"),
        source: r.get("source"),
        reference: r.get::<Option<String>, _>("reference"),
        is_refund: r.get::<i64, _>("is_refund") != 0,
        balance_after: r.get("balance_after"),
        created_at_ms: r.get("created_ms"),
    })
}

fn row_to_ledger_entry(r: &sqlx::any::AnyRow) -> Result<LedgerEntry> {
    let user_id: Option<String> = r.get("user_id");
    let user_id = match user_id {
        Some(s) => Some(Uuid::parse_str(&s).map_err(|e| anyhow!("invalid user_id: {e}"))?),
        None => None,
    };
    Ok(LedgerEntry {
        user_id,
        account: r.get::<String, _>("account").parse()?,
        direction: r.get::<String, _>("direction").parse()?,
        amount: r.get("amount"),
    })
}
