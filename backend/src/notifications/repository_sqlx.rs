use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::jobs::model::UserId;
use crate::notifications::model::{Notification, NotificationStatus};
use crate::notifications::repository::NotificationRepository;

pub struct SqlxNotificationRepository {
    pool: AnyPool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn insert(&self, n: &Notification) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO notifications
  (notification_id, user_id, title, body, data, priority, status, retry_count, send_at_ms, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(n.id.to_string())
        .bind(n.user_id.to_string())
        .bind(&n.title)
        .bind(&n.body)
        .bind(serde_json::to_string(&n.data)?)
        .bind(n.priority.to_string())
        .bind(n.status.to_string())
        .bind(n.retry_count as i64)
        .bind(n.send_at_ms)
        .bind(n.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: &Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(
            r#"
SELECT notification_id, user_id, title, body, data, priority, status, retry_count, send_at_ms, created_ms
FROM notifications
WHERE notification_id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let id: String = r.get("notification_id");
                let user_id: String = r.get("user_id");
                let data: String = r.get("data");
                Ok(Some(Notification {
                    id: Uuid::parse_str(&id).context("invalid notification_id")?,
                    user_id: Uuid::parse_str(&user_id).context("invalid user_id")?,
                    title: r.get("title"),
                    body: r.get("body"),
                    data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                    priority: r.get::<String, _>("priority").parse()?,
                    status: r.get::<String, _>("status").parse()?,
                    retry_count: r.get::<i64, _>("retry_count").max(0) as u32,
                    send_at_ms: r.get("send_at_ms"),
                    created_at_ms: r.get("created_ms"),
                }))
            }
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: &Uuid,
        status: NotificationStatus,
        retry_count: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notifications SET status = ?, retry_count = ? WHERE notification_id = ?;",
        )
        .bind(status.to_string())
        .bind(retry_count as i64)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_log(&self, id: &Uuid, status: &str, detail: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO notification_logs (log_id, notification_id, status, detail, created_ms)
VALUES (?, ?, ?, ?, ?);
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id.to_string())
        .bind(status)
        .bind(detail)
        .bind(common::time::now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_push_token(&self, user_id: &UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT fcm_token FROM users WHERE user_id = ?;")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.get::<Option<String>, _>("fcm_token")))
    }
}
