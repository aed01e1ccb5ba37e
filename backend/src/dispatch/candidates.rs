//! Per-job candidate queues and the live offer record.
//!
//! A single lock covers both maps so that an accept racing a timeout (or
//! two timers racing each other) cannot both consume the same offer: the
//! conditional take is the linearisation point for every offer outcome.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::jobs::model::{CaptainId, JobId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfferRecord {
    pub captain_id: CaptainId,
    pub expires_at_ms: i64,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<JobId, VecDeque<CaptainId>>,
    offers: HashMap<JobId, OfferRecord>,
}

/// In-process candidate store (single-primary design).
#[derive(Default)]
pub struct CandidateStore {
    inner: Mutex<Inner>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the queue for a job.
    pub fn set_candidates(&self, job_id: JobId, captains: Vec<CaptainId>) {
        let mut inner = self.inner.lock();
        inner.queues.insert(job_id, captains.into());
    }

    /// Pops the head candidate, or None when the queue is empty or absent.
    pub fn pop_candidate(&self, job_id: &JobId) -> Option<CaptainId> {
        let mut inner = self.inner.lock();
        inner.queues.get_mut(job_id)?.pop_front()
    }

    pub fn queue_len(&self, job_id: &JobId) -> usize {
        self.inner.lock().queues.get(job_id).map_or(0, VecDeque::len)
    }

    pub fn queue_contains(&self, job_id: &JobId, captain_id: &CaptainId) -> bool {
        self.inner
            .lock()
            .queues
            .get(job_id)
            .is_some_and(|q| q.contains(captain_id))
    }

    /// Writes the single live offer for a job.
    pub fn set_offer(&self, job_id: JobId, captain_id: CaptainId, expires_at_ms: i64) {
        let mut inner = self.inner.lock();
        inner.offers.insert(
            job_id,
            OfferRecord {
                captain_id,
                expires_at_ms,
            },
        );
    }

    pub fn get_offer(&self, job_id: &JobId) -> Option<OfferRecord> {
        self.inner.lock().offers.get(job_id).copied()
    }

    pub fn clear_offer(&self, job_id: &JobId) {
        self.inner.lock().offers.remove(job_id);
    }

    /// Consumes the offer only while it still names `captain_id`. Exactly
    /// one of the racing accept/reject/timeout paths gets the record back;
    /// the others see None and must no-op.
    pub fn take_offer_if(&self, job_id: &JobId, captain_id: &CaptainId) -> Option<OfferRecord> {
        let mut inner = self.inner.lock();
        match inner.offers.get(job_id) {
            Some(rec) if rec.captain_id == *captain_id => inner.offers.remove(job_id),
            _ => None,
        }
    }

    /// Drops every record for a job (assignment, cancellation, terminal).
    pub fn clear_job(&self, job_id: &JobId) {
        let mut inner = self.inner.lock();
        inner.queues.remove(job_id);
        inner.offers.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn queue_is_fifo_and_replaceable() {
        let store = CandidateStore::new();
        let job = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.set_candidates(job, vec![a, b]);
        store.set_candidates(job, vec![b, c]);

        assert_eq!(store.queue_len(&job), 2);
        assert_eq!(store.pop_candidate(&job), Some(b));
        assert_eq!(store.pop_candidate(&job), Some(c));
        assert_eq!(store.pop_candidate(&job), None);
    }

    #[test]
    fn take_offer_requires_matching_captain() {
        let store = CandidateStore::new();
        let job = Uuid::new_v4();
        let (offered, other) = (Uuid::new_v4(), Uuid::new_v4());

        store.set_offer(job, offered, 1_000);

        assert!(store.take_offer_if(&job, &other).is_none());
        assert!(store.get_offer(&job).is_some());

        let rec = store.take_offer_if(&job, &offered).unwrap();
        assert_eq!(rec.captain_id, offered);
        assert!(store.get_offer(&job).is_none());
    }

    #[test]
    fn second_take_is_a_noop() {
        let store = CandidateStore::new();
        let job = Uuid::new_v4();
        let captain = Uuid::new_v4();

        store.set_offer(job, captain, 1_000);
        assert!(store.take_offer_if(&job, &captain).is_some());
        assert!(store.take_offer_if(&job, &captain).is_none());
    }

    #[test]
    fn clear_job_drops_queue_and_offer() {
        let store = CandidateStore::new();
        let job = Uuid::new_v4();
        let captain = Uuid::new_v4();

        store.set_candidates(job, vec![captain]);
        store.set_offer(job, captain, 1_000);
        store.clear_job(&job);

        assert_eq!(store.queue_len(&job), 0);
        assert!(store.get_offer(&job).is_none());
    }

    #[test]
    fn concurrent_takers_consume_at_most_once() {
        let store = Arc::new(CandidateStore::new());
        let job = Uuid::new_v4();
        let captain = Uuid::new_v4();
        store.set_offer(job, captain, 1_000);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.take_offer_if(&job, &captain).is_some()
            }));
        }

        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }
}
