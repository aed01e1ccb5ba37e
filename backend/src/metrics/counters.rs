use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub jobs_created: Arc<AtomicU64>,
    pub jobs_batched: Arc<AtomicU64>,
    pub offers_issued: Arc<AtomicU64>,
    pub offers_accepted: Arc<AtomicU64>,
    pub offers_rejected: Arc<AtomicU64>,
    pub offers_timed_out: Arc<AtomicU64>,

    pub match_no_candidates: Arc<AtomicU64>,
    pub match_retries: Arc<AtomicU64>,

    pub jobs_completed: Arc<AtomicU64>,
    pub jobs_cancelled: Arc<AtomicU64>,

    pub notifications_sent: Arc<AtomicU64>,
    pub notifications_failed: Arc<AtomicU64>,

    pub rate_limited: Arc<AtomicU64>,
    pub idempotent_replays: Arc<AtomicU64>,
}

impl Counters {
    pub fn bump(counter: &Arc<AtomicU64>) {
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
