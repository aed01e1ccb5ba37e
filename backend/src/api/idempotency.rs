//! Request-replay cache for POST endpoints.
//!
//! The first successful response for a given `Idempotency-Key` is stored
//! under `(method, path, caller-hash, key)` and replayed for the cache
//! lifetime; reuse with a different body is a conflict. The caller hash
//! keeps keys namespaced per bearer identity and deliberately uses only
//! the first 12 hex characters of the token digest, matching the wire
//! contract clients already rely on.

use std::collections::HashMap;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use common::time::now_ms;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    request_hash: String,
    stored_at_ms: i64,
}

pub struct IdempotencyCache {
    ttl_ms: i64,
    entries: Mutex<HashMap<String, StoredResponse>>,
}

#[derive(Debug)]
pub enum Lookup {
    /// No stored response; process the request and offer to store it.
    Miss,
    /// Same key and body: replay the stored response.
    Replay(StoredResponse),
}

impl IdempotencyCache {
    pub fn new(ttl_sec: u64) -> Self {
        Self {
            ttl_ms: ttl_sec as i64 * 1_000,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_key(method: &str, path: &str, bearer: Option<&str>, idem_key: &str) -> String {
        let caller_hash = match bearer {
            Some(token) if !token.is_empty() => {
                let digest = Sha256::digest(token.as_bytes());
                hex_prefix(&digest, 12)
            }
            _ => "anon".to_string(),
        };
        format!("idemp:{method}:{path}:{caller_hash}:{idem_key}")
    }

    pub fn body_hash(body: &[u8]) -> String {
        hex_prefix(&Sha256::digest(body), 64)
    }

    pub fn lookup(&self, key: &str, request_hash: &str) -> AppResult<Lookup> {
        let now = now_ms() as i64;
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(stored) if now - stored.stored_at_ms <= self.ttl_ms => {
                if stored.request_hash != request_hash {
                    return Err(AppError::IdempotencyConflict);
                }
                Ok(Lookup::Replay(stored.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(Lookup::Miss)
            }
            None => Ok(Lookup::Miss),
        }
    }

    /// Stores a successful (2xx) response for replay.
    pub fn store(
        &self,
        key: String,
        request_hash: String,
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
    ) {
        if !(200..=202).contains(&status) {
            return;
        }
        let mut entries = self.entries.lock();

        if entries.len() > 100_000 {
            let cutoff = now_ms() as i64 - self.ttl_ms;
            entries.retain(|_, v| v.stored_at_ms >= cutoff);
        }

        entries.insert(
            key,
            StoredResponse {
                status,
                content_type,
                body,
                request_hash,
                stored_at_ms: now_ms() as i64,
            },
        );
    }
}

fn hex_prefix(digest: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out.truncate(len);
    out
}
