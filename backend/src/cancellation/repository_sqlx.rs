use anyhow::Result;
use async_trait::async_trait;
use sqlx::AnyPool;

use crate::cancellation::repository::{
    CancellationRecord, CancellationRepository, PenaltyRecord, RefundRecord,
};

pub struct SqlxCancellationRepository {
    pool: AnyPool,
}

impl SqlxCancellationRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CancellationRepository for SqlxCancellationRepository {
    async fn insert_cancellation(&self, record: &CancellationRecord) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO cancellations
  (cancellation_id, job_type, job_id, actor_id, actor_role, reason,
   late_delivery, no_show, refund_amount, penalty_amount, metadata, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(record.id.to_string())
        .bind(record.job_type.to_string())
        .bind(record.job_id.to_string())
        .bind(record.actor_id.map(|a| a.to_string()))
        .bind(record.actor_role.to_string())
        .bind(&record.reason)
        .bind(record.late_delivery as i64)
        .bind(record.no_show as i64)
        .bind(record.refund_amount)
        .bind(record.penalty_amount)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(record.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_refund(&self, record: &RefundRecord) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO refunds (refund_id, user_id, amount, source, reference, method, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.amount)
        .bind(&record.source)
        .bind(&record.reference)
        .bind(&record.method)
        .bind(record.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_penalty(&self, record: &PenaltyRecord) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO penalties (penalty_id, actor_id, amount, reason, reference, created_ms)
VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(record.id.to_string())
        .bind(record.actor_id.to_string())
        .bind(record.amount)
        .bind(&record.reason)
        .bind(&record.reference)
        .bind(record.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
