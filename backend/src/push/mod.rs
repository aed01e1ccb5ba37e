//! Typed event fanout to push-channel groups.
//!
//! Delivery is best-effort, at-most-once: job state is authoritative in
//! storage, so a dropped event costs a refresh, not correctness. Closed
//! sessions are pruned on publish.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::jobs::model::{CaptainId, JobId, JobType};

pub type PushSessionId = Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    JobOffer {
        job_id: JobId,
        job_type: JobType,
        expires_at_ms: i64,
    },
    JobAssigned {
        job_id: JobId,
        job_type: JobType,
        captain_id: Option<CaptainId>,
        batched: bool,
    },
    JobStatus {
        job_id: JobId,
        status: String,
    },
    LocationUpdate {
        job_id: JobId,
        job_type: JobType,
        captain_id: CaptainId,
        lat: f64,
        lng: f64,
    },
    ChatMessage {
        job_id: JobId,
        sender_id: Uuid,
        body: String,
    },
    Pong,
}

pub fn captain_group(id: &CaptainId) -> String {
    format!("captain_{id}")
}

pub fn user_group(id: &Uuid) -> String {
    format!("user_{id}")
}

pub fn job_group(job_type: JobType, job_id: &JobId) -> String {
    match job_type {
        JobType::Order => format!("order_{job_id}"),
        JobType::Ride => format!("ride_{job_id}"),
    }
}

type GroupMembers = HashMap<PushSessionId, mpsc::UnboundedSender<PushEvent>>;

#[derive(Default)]
pub struct PushHub {
    groups: Mutex<HashMap<String, GroupMembers>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session in every listed group and returns its event
    /// stream. The caller pairs this with [`PushHub::leave`] on disconnect.
    pub fn subscribe(
        &self,
        groups: &[String],
    ) -> (PushSessionId, mpsc::UnboundedReceiver<PushEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut guard = self.groups.lock();
        for group in groups {
            guard
                .entry(group.clone())
                .or_default()
                .insert(session_id, tx.clone());
        }

        (session_id, rx)
    }

    pub fn leave(&self, session_id: &PushSessionId, groups: &[String]) {
        let mut guard = self.groups.lock();
        for group in groups {
            if let Some(members) = guard.get_mut(group) {
                members.remove(session_id);
                if members.is_empty() {
                    guard.remove(group);
                }
            }
        }
    }

    /// Sends to every live member of a group, pruning closed sessions.
    /// Returns how many sessions received the event.
    pub fn publish(&self, group: &str, event: &PushEvent) -> usize {
        let mut guard = self.groups.lock();
        let Some(members) = guard.get_mut(group) else {
            return 0;
        };

        let mut delivered = 0;
        members.retain(|_, tx| match tx.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });

        if members.is_empty() {
            guard.remove(group);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer_event() -> PushEvent {
        PushEvent::JobOffer {
            job_id: Uuid::new_v4(),
            job_type: JobType::Order,
            expires_at_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscribed_groups_only() {
        let hub = PushHub::new();
        let group = "captain_abc".to_string();
        let (_, mut rx) = hub.subscribe(std::slice::from_ref(&group));

        assert_eq!(hub.publish(&group, &offer_event()), 1);
        assert!(rx.recv().await.is_some());

        assert_eq!(hub.publish("captain_other", &offer_event()), 0);
    }

    #[tokio::test]
    async fn leave_stops_delivery() {
        let hub = PushHub::new();
        let group = "user_1".to_string();
        let (session, _rx) = hub.subscribe(std::slice::from_ref(&group));

        hub.leave(&session, std::slice::from_ref(&group));
        assert_eq!(hub.publish(&group, &offer_event()), 0);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let hub = PushHub::new();
        let group = "order_9".to_string();
        let (_, rx) = hub.subscribe(std::slice::from_ref(&group));
        drop(rx);

        assert_eq!(hub.publish(&group, &offer_event()), 0);
        // Second publish exercises the pruned-empty path.
        assert_eq!(hub.publish(&group, &offer_event()), 0);
    }

    #[tokio::test]
    async fn one_session_can_join_many_groups() {
        let hub = PushHub::new();
        let groups = vec!["user_1".to_string(), "ride_7".to_string()];
        let (_, mut rx) = hub.subscribe(&groups);

        hub.publish("user_1", &offer_event());
        hub.publish("ride_7", &offer_event());

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(PushEvent::Pong).unwrap();
        assert_eq!(json["type"], "pong");

        let json = serde_json::to_value(offer_event()).unwrap();
        assert_eq!(json["type"], "job_offer");
        assert_eq!(json["job_type"], "ORDER");
    }
}
