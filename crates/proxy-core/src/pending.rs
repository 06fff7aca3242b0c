use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// What to do when a transaction id is recorded while still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Refuse the newer request while the older one is still fresh.
    /// Entries older than the request timeout are treated as orphaned and replaced.
    #[default]
    Reject,
    /// Always overwrite, orphaning the older request.
    Replace,
}

impl DuplicatePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(DuplicatePolicy::Reject),
            "replace" | "overwrite" => Some(DuplicatePolicy::Replace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Reject => "reject",
            DuplicatePolicy::Replace => "replace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PendingError {
    #[error("transaction {transaction_id} already pending for {age_ms} ms")]
    Duplicate { transaction_id: u16, age_ms: u64 },

    #[error("pending request table full ({capacity} entries)")]
    Full { capacity: usize },
}

#[derive(Debug)]
struct PendingEntry<T> {
    value: T,
    inserted_at: Instant,
}

/// Transaction id to requester table.
///
/// At most one entry per id. Time is passed in so callers (and tests)
/// control the clock.
#[derive(Debug)]
pub struct PendingRequests<T> {
    entries: HashMap<u16, PendingEntry<T>>,
    policy: DuplicatePolicy,
    timeout: Duration,
    capacity: usize,
}

impl<T> PendingRequests<T> {
    pub fn new(policy: DuplicatePolicy, timeout: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
            timeout,
            capacity: capacity.max(1),
        }
    }

    /// Records `value` for `transaction_id`.
    ///
    /// Returns the displaced entry, if any, so the caller can report the orphan.
    pub fn insert(
        &mut self,
        transaction_id: u16,
        value: T,
        now: Instant,
    ) -> Result<Option<T>, PendingError> {
        if let Some(existing) = self.entries.get(&transaction_id) {
            let age = now.saturating_duration_since(existing.inserted_at);
            if self.policy == DuplicatePolicy::Reject && age < self.timeout {
                return Err(PendingError::Duplicate {
                    transaction_id,
                    age_ms: age.as_millis() as u64,
                });
            }
        } else if self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                return Err(PendingError::Full {
                    capacity: self.capacity,
                });
            }
        }

        let previous = self.entries.insert(
            transaction_id,
            PendingEntry {
                value,
                inserted_at: now,
            },
        );
        Ok(previous.map(|entry| entry.value))
    }

    /// Removes and returns the entry for `transaction_id`.
    pub fn take(&mut self, transaction_id: u16) -> Option<T> {
        self.entries.remove(&transaction_id).map(|entry| entry.value)
    }

    /// Drops entries older than the request timeout, returning how many went.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let timeout = self.timeout;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < timeout);
        before - self.entries.len()
    }

    pub fn contains(&self, transaction_id: u16) -> bool {
        self.entries.contains_key(&transaction_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
