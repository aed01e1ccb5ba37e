use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::model::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        })
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(Priority::High),
            "NORMAL" => Ok(Priority::Normal),
            "LOW" => Ok(Priority::Low),
            other => Err(anyhow::anyhow!("invalid priority: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Queued,
    Scheduled,
    Sent,
    Failed,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationStatus::Queued => "QUEUED",
            NotificationStatus::Scheduled => "SCHEDULED",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Failed => "FAILED",
        })
    }
}

impl FromStr for NotificationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(NotificationStatus::Queued),
            "SCHEDULED" => Ok(NotificationStatus::Scheduled),
            "SENT" => Ok(NotificationStatus::Sent),
            "FAILED" => Ok(NotificationStatus::Failed),
            other => Err(anyhow::anyhow!("invalid notification status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub send_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        title: impl Into<String>,
        body: impl Into<String>,
        data: serde_json::Value,
        priority: Priority,
        now_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            body: body.into(),
            data,
            priority,
            status: NotificationStatus::Queued,
            retry_count: 0,
            send_at_ms: None,
            created_at_ms: now_ms,
        }
    }
}
