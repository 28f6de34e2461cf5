//! Server-issued captcha challenges.
//!
//! Replaces the legacy client-side arithmetic check. Challenges are single
//! use: a verification attempt consumes the entry whether or not the answer
//! matches. Only the answer hash is held in memory; expired entries are
//! purged whenever a new challenge is issued.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

struct Challenge {
    answer_hash: String,
    expires_at: DateTime<Utc>,
}

/// In-memory store of outstanding captcha challenges
pub struct CaptchaStore {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, Challenge>>,
}

impl CaptchaStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a new arithmetic challenge, returning its id and question text
    pub fn issue(&self) -> (Uuid, String) {
        let (a, b) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..10u32), rng.gen_range(0..10u32))
        };

        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut entries = self.entries.lock();
        entries.retain(|_, c| c.expires_at > now);
        entries.insert(
            id,
            Challenge {
                answer_hash: hash_answer(&(a + b).to_string()),
                expires_at: now + self.ttl,
            },
        );

        (id, format!("{} + {}?", a, b))
    }

    /// Verify and consume a challenge. Unknown, expired, or already-used ids
    /// fail.
    pub fn verify(&self, id: Uuid, answer: &str) -> bool {
        let challenge = match self.entries.lock().remove(&id) {
            Some(c) => c,
            None => return false,
        };

        if challenge.expires_at < Utc::now() {
            return false;
        }

        hash_answer(answer.trim()) == challenge.answer_hash
    }
}

fn hash_answer(answer: &str) -> String {
    format!("{:x}", Sha256::digest(answer.as_bytes()))
}
