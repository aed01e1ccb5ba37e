use chrono::{DateTime, Utc};

/// Current wall-clock time, UTC. All persisted timestamps go through this.
pub fn utcnow() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Milliseconds for an arbitrary instant (storage boundary helper).
pub fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Inverse of [`to_ms`]; out-of-range values clamp to the epoch.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}
