use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::model::UserId;
use crate::notifications::model::{Notification, NotificationStatus};

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;

    async fn fetch(&self, id: &Uuid) -> Result<Option<Notification>>;

    async fn update_status(
        &self,
        id: &Uuid,
        status: NotificationStatus,
        retry_count: u32,
    ) -> Result<()>;

    /// Audit trail row per delivery attempt.
    async fn insert_log(&self, id: &Uuid, status: &str, detail: Option<&str>) -> Result<()>;

    async fn user_push_token(&self, user_id: &UserId) -> Result<Option<String>>;
}
