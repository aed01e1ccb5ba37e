//! In-process one-shot timers.
//!
//! Fired handlers must re-read state and act only when still applicable:
//! a timer may fire late, after a restart lost it, or after the condition
//! it guards has already resolved.

use std::future::Future;
use std::time::Duration;

use common::time::now_ms;

/// Runs `fut` once the wall clock passes `at_ms`; immediately when the
/// deadline is already behind us.
pub fn fire_at<F>(at_ms: i64, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let now = now_ms() as i64;
        if at_ms > now {
            tokio::time::sleep(Duration::from_millis((at_ms - now) as u64)).await;
        }
        fut.await;
    });
}

/// Runs `fut` after a fixed delay.
pub fn fire_after<F>(delay: Duration, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fut.await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn past_deadline_fires_immediately() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        fire_at(0, async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn delayed_fire_waits() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        fire_after(Duration::from_millis(80), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
