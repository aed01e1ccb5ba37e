//! Fixed-window request limiter keyed by `(client ip, method, path)`.

use std::collections::HashMap;

use parking_lot::Mutex;

use common::time::now_ms;

use crate::error::{AppError, AppResult};

struct Window {
    started_at_ms: i64,
    count: u32,
}

pub struct RateLimiter {
    enabled: bool,
    window_ms: i64,
    cap: u32,
    exempt_paths: Vec<String>,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, window_sec: u64, cap: u32, exempt_paths: Vec<String>) -> Self {
        Self {
            enabled,
            window_ms: window_sec as i64 * 1_000,
            cap,
            exempt_paths,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Counts a request against its window; `RateLimited` past the cap.
    pub fn check(&self, ip: &str, method: &str, path: &str) -> AppResult<()> {
        if !self.enabled || self.exempt_paths.iter().any(|p| p == path) {
            return Ok(());
        }

        let key = format!("{ip}:{method}:{path}");
        let now = now_ms() as i64;

        let mut windows = self.windows.lock();

        // Opportunistic cleanup keeps the map from growing unbounded.
        if windows.len() > 10_000 {
            let cutoff = now - self.window_ms;
            windows.retain(|_, w| w.started_at_ms >= cutoff);
        }

        let window = windows.entry(key).or_insert(Window {
            started_at_ms: now,
            count: 0,
        });

        if now - window.started_at_ms >= self.window_ms {
            window.started_at_ms = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count > self.cap {
            let elapsed = now - window.started_at_ms;
            let retry_after_sec = ((self.window_ms - elapsed).max(0) / 1_000).max(1) as u64;
            return Err(AppError::RateLimited { retry_after_sec });
        }

        Ok(())
    }
}
