use std::collections::{BTreeMap, BTreeSet};

use crate::kafka::types::{BatchRecord, Partition};

/// Per-partition target offsets handed to an `OffsetSeeker`.
pub type SeekPositions = BTreeMap<Partition, i64>;

/// The set of partitions a batch spans. Consecutive, different batches can share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchIdentity(BTreeSet<Partition>);

impl BatchIdentity {
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, partition: &Partition) -> bool {
        self.0.contains(partition)
    }

    /// Whether the two identities share at least one partition
    pub fn overlaps(&self, other: &BatchIdentity) -> bool {
        !self.0.is_disjoint(&other.0)
    }
}

/// Earliest offset per partition in a batch. Always covers every partition of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSnapshot(SeekPositions);

impl OffsetSnapshot {
    pub fn get(&self, partition: &Partition) -> Option<i64> {
        self.0.get(partition).copied()
    }

    pub fn positions(&self) -> &SeekPositions {
        &self.0
    }
}

/// Everything the retry engine derives from a failed batch before touching any state.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    identity: BatchIdentity,
    snapshot: OffsetSnapshot,
    // one past the highest offset per partition
    resume: SeekPositions,
}

impl BatchSummary {
    /// Returns None for an empty batch, which has no identity.
    pub fn from_records<R: BatchRecord>(records: &[R]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let mut earliest = SeekPositions::new();
        let mut resume = SeekPositions::new();

        for record in records {
            let partition = record.topic_partition();
            let offset = record.offset();

            earliest
                .entry(partition.clone())
                .and_modify(|min| *min = (*min).min(offset))
                .or_insert(offset);
            resume
                .entry(partition)
                .and_modify(|next| *next = (*next).max(offset.saturating_add(1)))
                .or_insert(offset.saturating_add(1));
        }

        let identity = BatchIdentity(earliest.keys().cloned().collect());

        Some(Self {
            identity,
            snapshot: OffsetSnapshot(earliest),
            resume,
        })
    }

    pub fn identity(&self) -> &BatchIdentity {
        &self.identity
    }

    pub fn snapshot(&self) -> &OffsetSnapshot {
        &self.snapshot
    }

    /// Positions that redeliver the batch on the next poll
    pub fn current_positions(&self) -> &SeekPositions {
        self.snapshot.positions()
    }

    /// Positions that skip past the batch
    pub fn next_positions(&self) -> &SeekPositions {
        &self.resume
    }
}
