//! Payment gateway boundary.
//!
//! Only the refund leg matters to the dispatch core: cancellation first
//! tries the original gateway and falls back to a wallet credit. Capture
//! and checkout live outside this system.

use anyhow::{Result, anyhow};
use async_trait::async_trait;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Refunds `amount` paise against a captured gateway payment.
    async fn refund(&self, payment_id: &str, amount: i64) -> Result<()>;
}

/// Stand-in used when no gateway is configured; every refund attempt
/// fails so the caller's wallet-credit fallback always runs.
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn refund(&self, _payment_id: &str, _amount: i64) -> Result<()> {
        Err(anyhow!("payment gateway not configured"))
    }
}
