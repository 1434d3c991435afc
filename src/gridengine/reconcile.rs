use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// An unreported deletion marker outlives an ordinary record by this many
/// grace windows before it is dropped unseen.
const DELETED_RETENTION: u32 = 10;

#[derive(Debug)]
struct Record {
    last_seen: Instant,
    deleted_pending: bool,
}

/// Remembers when each job was last visible to the scheduler, bridging the
/// gap between a job leaving `qstat` and its record showing up in `qacct`.
#[derive(Debug, Default)]
pub struct ReconciliationCache {
    records: Mutex<HashMap<String, Record>>,
}

impl ReconciliationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh the last-seen time of every id.
    pub fn mark_seen<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let now = Instant::now();
        let mut records = self.lock();
        for id in ids {
            records
                .entry(id.to_string())
                .and_modify(|r| r.last_seen = now)
                .or_insert(Record {
                    last_seen: now,
                    deleted_pending: false,
                });
        }
    }

    /// Record that `id` was deleted before it started. No accounting record
    /// will ever appear for it.
    pub fn mark_deleted(&self, id: &str) {
        let now = Instant::now();
        self.lock()
            .entry(id.to_string())
            .and_modify(|r| {
                r.last_seen = now;
                r.deleted_pending = true;
            })
            .or_insert(Record {
                last_seen: now,
                deleted_pending: true,
            });
    }

    /// Consume the deleted-while-pending marker. Returns true at most once per mark.
    pub fn take_deleted(&self, id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(record) => std::mem::replace(&mut record.deleted_pending, false),
            None => false,
        }
    }

    pub fn seen_within(&self, id: &str, grace: Duration) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|r| r.last_seen.elapsed() <= grace)
    }

    /// Forget jobs not seen for longer than `grace`. Records with a deletion
    /// marker still waiting to be reported are kept for
    /// `DELETED_RETENTION` grace windows instead.
    pub fn purge(&self, grace: Duration) -> usize {
        let retention = grace.saturating_mul(DELETED_RETENTION);
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| {
            let keep_for = if r.deleted_pending { retention } else { grace };
            r.last_seen.elapsed() <= keep_for
        });
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
