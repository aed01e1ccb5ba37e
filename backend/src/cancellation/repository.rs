use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::cancellation::ActorRole;
use crate::jobs::model::{JobId, JobType, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct CancellationRecord {
    pub id: Uuid,
    pub job_type: JobType,
    pub job_id: JobId,
    pub actor_id: Option<Uuid>,
    pub actor_role: ActorRole,
    pub reason: String,
    pub late_delivery: bool,
    pub no_show: bool,
    pub refund_amount: i64,
    pub penalty_amount: i64,
    pub metadata: serde_json::Value,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: i64,
    pub source: String,
    pub reference: String,
    /// `RAZORPAY` when the gateway refunded, `WALLET` on the fallback.
    pub method: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PenaltyRecord {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub reference: String,
    pub created_at_ms: i64,
}

#[async_trait]
pub trait CancellationRepository: Send + Sync {
    async fn insert_cancellation(&self, record: &CancellationRecord) -> Result<()>;
    async fn insert_refund(&self, record: &RefundRecord) -> Result<()>;
    async fn insert_penalty(&self, record: &PenaltyRecord) -> Result<()>;
}
