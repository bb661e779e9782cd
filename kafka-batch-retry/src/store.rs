use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::backoff::{BackOff, BackOffExecution};
use crate::batch::{BatchIdentity, OffsetSnapshot};
use crate::metrics_consts::RETRY_STATE_ENTRIES_REPLACED;

/// In-flight retry progress for one failing batch.
struct RetryState {
    snapshot: OffsetSnapshot,
    execution: Box<dyn BackOffExecution>,
    attempts: u32,
}

impl RetryState {
    fn new(snapshot: OffsetSnapshot, backoff: &dyn BackOff) -> Self {
        Self {
            snapshot,
            execution: backoff.start(),
            attempts: 0,
        }
    }
}

/// Result of advancing the backoff for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// 1-based attempt number that was just consumed
    pub attempt: u32,
    /// Wait before redelivery, None once the backoff is exhausted
    pub delay: Option<Duration>,
    /// Whether a previous entry for the same partitions was discarded
    pub replaced: bool,
}

/// Retry state owned by a single consuming worker. Never shared, so it needs no locking.
///
/// The table is only allocated while something is failing and is dropped as soon as the
/// last entry resolves.
#[derive(Default)]
pub struct RetryStateStore {
    entries: Option<HashMap<BatchIdentity, RetryState>>,
}

impl RetryStateStore {
    pub fn new() -> Self {
        Self { entries: None }
    }

    /// Look up or create the entry for `identity` and advance its backoff once.
    ///
    /// An entry whose snapshot differs from `snapshot` belongs to an earlier batch over the
    /// same partitions and is replaced with fresh progress.
    pub fn advance(
        &mut self,
        identity: &BatchIdentity,
        snapshot: &OffsetSnapshot,
        backoff: &dyn BackOff,
    ) -> Advance {
        let entries = self.entries.get_or_insert_with(HashMap::new);

        let replaced = match entries.get(identity) {
            Some(existing) if existing.snapshot != *snapshot => {
                debug!(
                    partitions = identity.len(),
                    previous_attempts = existing.attempts,
                    "batch offsets moved, restarting backoff"
                );
                metrics::counter!(RETRY_STATE_ENTRIES_REPLACED).increment(1);
                true
            }
            _ => false,
        };
        if replaced {
            entries.insert(identity.clone(), RetryState::new(snapshot.clone(), backoff));
        }

        let state = entries
            .entry(identity.clone())
            .or_insert_with(|| RetryState::new(snapshot.clone(), backoff));

        state.attempts += 1;
        Advance {
            attempt: state.attempts,
            delay: state.execution.next_backoff(),
            replaced,
        }
    }

    /// Drop the entry for `identity`, releasing the whole table if it was the last one.
    pub fn remove(&mut self, identity: &BatchIdentity) -> bool {
        let Some(entries) = self.entries.as_mut() else {
            return false;
        };

        let removed = entries.remove(identity).is_some();
        if entries.is_empty() {
            self.entries = None;
        }
        removed
    }

    /// Drop every entry sharing a partition with `identity`, releasing the table if it empties.
    ///
    /// Once a batch over those partitions has succeeded their read positions have moved on, so
    /// no such entry can match a later snapshot. Returns how many entries were dropped.
    pub fn remove_overlapping(&mut self, identity: &BatchIdentity) -> usize {
        let Some(entries) = self.entries.as_mut() else {
            return 0;
        };

        let before = entries.len();
        entries.retain(|tracked, _| !tracked.overlaps(identity));
        let removed = before - entries.len();

        if entries.is_empty() {
            self.entries = None;
        }
        removed
    }

    /// Attempts consumed so far by the entry for `identity`
    pub fn attempts(&self, identity: &BatchIdentity) -> Option<u32> {
        self.entries
            .as_ref()
            .and_then(|entries| entries.get(identity))
            .map(|state| state.attempts)
    }

    pub fn snapshot(&self, identity: &BatchIdentity) -> Option<&OffsetSnapshot> {
        self.entries
            .as_ref()
            .and_then(|entries| entries.get(identity))
            .map(|state| &state.snapshot)
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the backing table currently exists
    pub fn is_allocated(&self) -> bool {
        self.entries.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedBackOff;
    use crate::batch::BatchSummary;
    use crate::test_utils::record;

    fn summary(offsets: &[(i32, i64)]) -> BatchSummary {
        let records: Vec<_> = offsets
            .iter()
            .map(|(partition, offset)| record("events", *partition, *offset))
            .collect();
        BatchSummary::from_records(&records).unwrap()
    }

    #[test]
    fn test_store_starts_unallocated() {
        let store = RetryStateStore::new();
        assert!(!store.is_allocated());
        assert!(store.is_empty());
    }

    #[test]
    fn test_same_snapshot_reuses_progress() {
        let backoff = FixedBackOff::new(Duration::from_millis(100), 2);
        let mut store = RetryStateStore::new();
        let batch = summary(&[(0, 10), (1, 20)]);

        let first = store.advance(batch.identity(), batch.snapshot(), &backoff);
        assert_eq!(first.attempt, 1);
        assert_eq!(first.delay, Some(Duration::from_millis(100)));
        assert!(!first.replaced);
        assert!(store.is_allocated());

        let second = store.advance(batch.identity(), batch.snapshot(), &backoff);
        assert_eq!(second.attempt, 2);
        assert_eq!(second.delay, Some(Duration::from_millis(100)));

        let third = store.advance(batch.identity(), batch.snapshot(), &backoff);
        assert_eq!(third.attempt, 3);
        assert_eq!(third.delay, None);
        assert_eq!(store.attempts(batch.identity()), Some(3));
    }

    #[test]
    fn test_changed_snapshot_replaces_entry() {
        let backoff = FixedBackOff::new(Duration::from_millis(100), 2);
        let mut store = RetryStateStore::new();
        let original = summary(&[(0, 10), (1, 20)]);
        let moved = summary(&[(0, 15), (1, 20)]);
        assert_eq!(original.identity(), moved.identity());

        store.advance(original.identity(), original.snapshot(), &backoff);
        store.advance(original.identity(), original.snapshot(), &backoff);

        let advance = store.advance(moved.identity(), moved.snapshot(), &backoff);
        assert_eq!(advance.attempt, 1);
        assert_eq!(advance.delay, Some(Duration::from_millis(100)));
        assert!(advance.replaced);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(moved.identity()), Some(moved.snapshot()));
    }

    #[test]
    fn test_different_partition_sets_are_tracked_separately() {
        let backoff = FixedBackOff::new(Duration::from_millis(100), 1);
        let mut store = RetryStateStore::new();
        let left = summary(&[(0, 10)]);
        let right = summary(&[(1, 10)]);

        store.advance(left.identity(), left.snapshot(), &backoff);
        store.advance(right.identity(), right.snapshot(), &backoff);

        assert_eq!(store.len(), 2);
        assert_eq!(store.attempts(left.identity()), Some(1));
        assert_eq!(store.attempts(right.identity()), Some(1));
    }

    #[test]
    fn test_removing_last_entry_releases_table() {
        let backoff = FixedBackOff::new(Duration::from_millis(100), 1);
        let mut store = RetryStateStore::new();
        let left = summary(&[(0, 10)]);
        let right = summary(&[(1, 10)]);

        store.advance(left.identity(), left.snapshot(), &backoff);
        store.advance(right.identity(), right.snapshot(), &backoff);

        assert!(store.remove(left.identity()));
        assert!(store.is_allocated());
        assert!(store.remove(right.identity()));
        assert!(!store.is_allocated());

        // idempotent once empty
        assert!(!store.remove(right.identity()));
        assert_eq!(store.attempts(right.identity()), None);
        assert!(!store.is_allocated());

        let again = store.advance(right.identity(), right.snapshot(), &backoff);
        assert_eq!(again.attempt, 1);
    }

    #[test]
    fn test_remove_overlapping_drops_entries_sharing_a_partition() {
        let backoff = FixedBackOff::new(Duration::from_millis(100), 3);
        let mut store = RetryStateStore::new();
        let wide = summary(&[(0, 10), (1, 20)]);
        let other = summary(&[(2, 5)]);

        store.advance(wide.identity(), wide.snapshot(), &backoff);
        store.advance(other.identity(), other.snapshot(), &backoff);

        // the rewound batch came back split, partition 0 alone succeeded first
        let part = summary(&[(0, 10)]);
        assert_eq!(store.remove_overlapping(part.identity()), 1);
        assert_eq!(store.attempts(wide.identity()), None);
        assert_eq!(store.attempts(other.identity()), Some(1));

        let rest = summary(&[(2, 5), (3, 1)]);
        assert_eq!(store.remove_overlapping(rest.identity()), 1);
        assert!(!store.is_allocated());
        assert_eq!(store.remove_overlapping(rest.identity()), 0);
    }
}
