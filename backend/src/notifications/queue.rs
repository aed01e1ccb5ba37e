//! Priority delivery queues with scheduling and bounded retry.
//!
//! Three FIFO queues drain high-first; a time-sorted set holds scheduled
//! and backing-off items until they become due. Delivery failures retry
//! with exponential backoff up to the configured cap, then mark FAILED.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::time::now_ms;

use crate::error::AppResult;
use crate::jobs::model::UserId;
use crate::notifications::model::{Notification, NotificationStatus, Priority};
use crate::notifications::repository::NotificationRepository;

const RETRY_BACKOFF_BASE_MS: i64 = 2_000;

/// Push transport boundary (FCM in production).
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, token: &str, notification: &Notification) -> Result<()>;
}

/// Transport stand-in that records the send in the logs and succeeds.
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(&self, token: &str, notification: &Notification) -> Result<()> {
        debug!(
            token_prefix = &token[..token.len().min(8)],
            title = %notification.title,
            "push notification delivered (log provider)"
        );
        Ok(())
    }
}

#[derive(Default)]
struct QueueInner {
    high: VecDeque<Uuid>,
    normal: VecDeque<Uuid>,
    low: VecDeque<Uuid>,
    /// `(due_ms, id)` ordering makes the earliest item first.
    scheduled: BTreeSet<(i64, Uuid)>,
}

impl QueueInner {
    fn push(&mut self, priority: Priority, id: Uuid) {
        match priority {
            Priority::High => self.high.push_back(id),
            Priority::Normal => self.normal.push_back(id),
            Priority::Low => self.low.push_back(id),
        }
    }

    fn pop(&mut self) -> Option<Uuid> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

pub struct NotificationQueue {
    repo: Arc<dyn NotificationRepository>,
    provider: Arc<dyn PushProvider>,
    max_retries: u32,
    inner: Mutex<QueueInner>,
}

impl NotificationQueue {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        provider: Arc<dyn PushProvider>,
        max_retries: u32,
    ) -> Self {
        Self {
            repo,
            provider,
            max_retries,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Persists and enqueues for immediate delivery.
    pub async fn enqueue(&self, notification: Notification) -> AppResult<()> {
        self.repo.insert(&notification).await?;
        self.inner
            .lock()
            .push(notification.priority, notification.id);
        Ok(())
    }

    /// Convenience used by dispatch and cancellation paths.
    pub async fn notify_user(
        &self,
        user_id: &UserId,
        title: &str,
        body: &str,
        data: serde_json::Value,
        priority: Priority,
    ) -> AppResult<()> {
        let n = Notification::new(*user_id, title, body, data, priority, now_ms() as i64);
        self.enqueue(n).await
    }

    /// Persists for delivery at `send_at_ms`.
    pub async fn schedule(&self, mut notification: Notification, send_at_ms: i64) -> AppResult<()> {
        notification.status = NotificationStatus::Scheduled;
        notification.send_at_ms = Some(send_at_ms);
        self.repo.insert(&notification).await?;
        self.inner
            .lock()
            .scheduled
            .insert((send_at_ms, notification.id));
        Ok(())
    }

    /// Moves due scheduled items into the live queues. Returns how many.
    pub async fn promote_due(&self, now: i64) -> usize {
        let due: Vec<Uuid> = {
            let mut inner = self.inner.lock();
            let mut due = Vec::new();
            while let Some(&(at, id)) = inner.scheduled.iter().next() {
                if at > now {
                    break;
                }
                inner.scheduled.remove(&(at, id));
                due.push(id);
            }
            due
        };

        let mut promoted = 0;
        for id in due {
            let priority = match self.repo.fetch(&id).await {
                Ok(Some(n)) => n.priority,
                _ => Priority::Normal,
            };
            if let Err(e) = self
                .repo
                .update_status(&id, NotificationStatus::Queued, 0)
                .await
            {
                warn!(notification_id = %id, error = %e, "failed to promote scheduled notification");
                continue;
            }
            self.inner.lock().push(priority, id);
            promoted += 1;
        }
        promoted
    }

    /// One worker pass: drains up to `max_items`, delivering each and
    /// applying the retry policy. Returns how many were processed.
    pub async fn process_queue(&self, max_items: usize) -> usize {
        let mut processed = 0;

        for _ in 0..max_items {
            let Some(id) = self.inner.lock().pop() else {
                break;
            };
            processed += 1;

            let notification = match self.repo.fetch(&id).await {
                Ok(Some(n)) => n,
                Ok(None) => continue,
                Err(e) => {
                    warn!(notification_id = %id, error = %e, "fetch failed; dropping from queue");
                    continue;
                }
            };

            self.deliver(notification).await;
        }

        processed
    }

    async fn deliver(&self, notification: Notification) {
        let token = match self.repo.user_push_token(&notification.user_id).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                // No token will never succeed; fail terminally.
                self.mark(&notification, NotificationStatus::Failed, "no push token")
                    .await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "token lookup failed");
                self.retry_or_fail(notification, "token lookup failed").await;
                return;
            }
        };

        match self.provider.send(&token, &notification).await {
            Ok(()) => {
                self.mark(&notification, NotificationStatus::Sent, "delivered")
                    .await;
            }
            Err(e) => {
                self.retry_or_fail(notification, &format!("{e:#}")).await;
            }
        }
    }

    async fn retry_or_fail(&self, notification: Notification, detail: &str) {
        let retries = notification.retry_count + 1;
        if retries > self.max_retries {
            self.mark(&notification, NotificationStatus::Failed, detail)
                .await;
            info!(notification_id = %notification.id, "notification exhausted retries");
            return;
        }

        let backoff = RETRY_BACKOFF_BASE_MS << (retries - 1).min(8);
        let due = now_ms() as i64 + backoff;

        if let Err(e) = self
            .repo
            .update_status(&notification.id, NotificationStatus::Scheduled, retries)
            .await
        {
            warn!(error = %e, "failed to persist retry state");
        }
        let _ = self
            .repo
            .insert_log(&notification.id, "RETRY", Some(detail))
            .await;

        self.inner.lock().scheduled.insert((due, notification.id));
    }

    async fn mark(&self, notification: &Notification, status: NotificationStatus, detail: &str) {
        if let Err(e) = self
            .repo
            .update_status(&notification.id, status, notification.retry_count)
            .await
        {
            warn!(error = %e, "failed to persist notification status");
        }
        let _ = self
            .repo
            .insert_log(&notification.id, &status.to_string(), Some(detail))
            .await;
    }

    /// Background worker: promote due items, then drain a bounded batch.
    pub fn spawn_worker(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.promote_due(now_ms() as i64).await;
                self.process_queue(50).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashMap;

    struct MockRepo {
        rows: PlMutex<HashMap<Uuid, Notification>>,
        tokens: PlMutex<HashMap<Uuid, String>>,
        logs: PlMutex<Vec<(Uuid, String)>>,
    }

    impl MockRepo {
        fn new() -> Self {
            Self {
                rows: PlMutex::new(HashMap::new()),
                tokens: PlMutex::new(HashMap::new()),
                logs: PlMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationRepository for MockRepo {
        async fn insert(&self, n: &Notification) -> Result<()> {
            self.rows.lock().insert(n.id, n.clone());
            Ok(())
        }

        async fn fetch(&self, id: &Uuid) -> Result<Option<Notification>> {
            Ok(self.rows.lock().get(id).cloned())
        }

        async fn update_status(
            &self,
            id: &Uuid,
            status: NotificationStatus,
            retry_count: u32,
        ) -> Result<()> {
            if let Some(n) = self.rows.lock().get_mut(id) {
                n.status = status;
                n.retry_count = retry_count;
            }
            Ok(())
        }

        async fn insert_log(&self, id: &Uuid, status: &str, _detail: Option<&str>) -> Result<()> {
            self.logs.lock().push((*id, status.to_string()));
            Ok(())
        }

        async fn user_push_token(&self, user_id: &UserId) -> Result<Option<String>> {
            Ok(self.tokens.lock().get(user_id).cloned())
        }
    }

    struct FlakyProvider {
        fail_first: PlMutex<u32>,
    }

    #[async_trait]
    impl PushProvider for FlakyProvider {
        async fn send(&self, _token: &str, _n: &Notification) -> Result<()> {
            let mut remaining = self.fail_first.lock();
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("provider unavailable");
            }
            Ok(())
        }
    }

    fn mk_notification(user: Uuid, priority: Priority) -> Notification {
        Notification::new(
            user,
            "title",
            "body",
            serde_json::json!({}),
            priority,
            now_ms() as i64,
        )
    }

    fn queue_with(
        repo: Arc<MockRepo>,
        fail_first: u32,
        max_retries: u32,
    ) -> Arc<NotificationQueue> {
        Arc::new(NotificationQueue::new(
            repo,
            Arc::new(FlakyProvider {
                fail_first: PlMutex::new(fail_first),
            }),
            max_retries,
        ))
    }

    #[tokio::test]
    async fn high_priority_drains_first() {
        let repo = Arc::new(MockRepo::new());
        let user = Uuid::new_v4();
        repo.tokens.lock().insert(user, "tok".into());
        let queue = queue_with(Arc::clone(&repo), 0, 3);

        let low = mk_notification(user, Priority::Low);
        let high = mk_notification(user, Priority::High);
        let normal = mk_notification(user, Priority::Normal);
        queue.enqueue(low.clone()).await.unwrap();
        queue.enqueue(normal.clone()).await.unwrap();
        queue.enqueue(high.clone()).await.unwrap();

        // Drain one at a time; the high item must go first despite being
        // enqueued last.
        queue.process_queue(1).await;
        assert_eq!(
            repo.rows.lock().get(&high.id).unwrap().status,
            NotificationStatus::Sent
        );
        assert_eq!(
            repo.rows.lock().get(&low.id).unwrap().status,
            NotificationStatus::Queued
        );

        queue.process_queue(2).await;
        assert_eq!(
            repo.rows.lock().get(&low.id).unwrap().status,
            NotificationStatus::Sent
        );
    }

    #[tokio::test]
    async fn failures_back_off_then_succeed() {
        let repo = Arc::new(MockRepo::new());
        let user = Uuid::new_v4();
        repo.tokens.lock().insert(user, "tok".into());
        let queue = queue_with(Arc::clone(&repo), 1, 3);

        let n = mk_notification(user, Priority::Normal);
        queue.enqueue(n.clone()).await.unwrap();
        queue.process_queue(5).await;

        // First attempt failed; the item sits in the scheduled set.
        assert_eq!(
            repo.rows.lock().get(&n.id).unwrap().status,
            NotificationStatus::Scheduled
        );

        // Far-future promote drains the backoff; the retry succeeds.
        queue.promote_due(i64::MAX).await;
        queue.process_queue(5).await;
        assert_eq!(
            repo.rows.lock().get(&n.id).unwrap().status,
            NotificationStatus::Sent
        );
    }

    #[tokio::test]
    async fn exhausted_retries_mark_failed() {
        let repo = Arc::new(MockRepo::new());
        let user = Uuid::new_v4();
        repo.tokens.lock().insert(user, "tok".into());
        let queue = queue_with(Arc::clone(&repo), 10, 2);

        let n = mk_notification(user, Priority::Normal);
        queue.enqueue(n.clone()).await.unwrap();

        for _ in 0..4 {
            queue.promote_due(i64::MAX).await;
            queue.process_queue(5).await;
        }

        assert_eq!(
            repo.rows.lock().get(&n.id).unwrap().status,
            NotificationStatus::Failed
        );
    }

    #[tokio::test]
    async fn missing_token_fails_terminally() {
        let repo = Arc::new(MockRepo::new());
        let queue = queue_with(Arc::clone(&repo), 0, 3);

        let n = mk_notification(Uuid::new_v4(), Priority::Normal);
        queue.enqueue(n.clone()).await.unwrap();
        queue.process_queue(1).await;

        assert_eq!(
            repo.rows.lock().get(&n.id).unwrap().status,
            NotificationStatus::Failed
        );
    }

    #[tokio::test]
    async fn scheduled_items_wait_until_due() {
        let repo = Arc::new(MockRepo::new());
        let user = Uuid::new_v4();
        repo.tokens.lock().insert(user, "tok".into());
        let queue = queue_with(Arc::clone(&repo), 0, 3);

        let n = mk_notification(user, Priority::Normal);
        let far_future = now_ms() as i64 + 60_000;
        queue.schedule(n.clone(), far_future).await.unwrap();

        assert_eq!(queue.promote_due(now_ms() as i64).await, 0);
        queue.process_queue(5).await;
        assert_eq!(
            repo.rows.lock().get(&n.id).unwrap().status,
            NotificationStatus::Scheduled
        );

        assert_eq!(queue.promote_due(far_future + 1).await, 1);
        queue.process_queue(5).await;
        assert_eq!(
            repo.rows.lock().get(&n.id).unwrap().status,
            NotificationStatus::Sent
        );
    }
}
