use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use rdkafka::consumer::{Consumer, ConsumerContext, StreamConsumer};
use rdkafka::Offset;
use tracing::debug;

use crate::batch::SeekPositions;
use crate::error::SeekError;
use crate::metrics_consts::SEEK_FAILURES;

/// Read-position control over the partitions of a batch.
#[cfg_attr(test, automock)]
pub trait OffsetSeeker {
    /// Rewind each partition so the batch is delivered again on the next poll.
    fn seek_to_current(&self, positions: &SeekPositions) -> Result<(), SeekError>;

    /// Move each partition past the batch.
    fn seek_to_next(&self, positions: &SeekPositions) -> Result<(), SeekError>;
}

/// Seeks an rdkafka consumer. The consumer must currently own every partition it is asked to
/// seek, which holds for batches it delivered itself.
pub struct ConsumerSeeker<'a, K> {
    consumer: &'a K,
    timeout: Duration,
}

impl<'a, K> ConsumerSeeker<'a, K> {
    pub fn new(consumer: &'a K, timeout: Duration) -> Self {
        Self { consumer, timeout }
    }
}

impl<C: ConsumerContext + 'static> OffsetSeeker for ConsumerSeeker<'_, StreamConsumer<C>> {
    fn seek_to_current(&self, positions: &SeekPositions) -> Result<(), SeekError> {
        seek_positions::<C, _>(self.consumer, positions, self.timeout)
    }

    fn seek_to_next(&self, positions: &SeekPositions) -> Result<(), SeekError> {
        seek_positions::<C, _>(self.consumer, positions, self.timeout)
    }
}

fn seek_positions<C, K>(
    consumer: &K,
    positions: &SeekPositions,
    timeout: Duration,
) -> Result<(), SeekError>
where
    C: ConsumerContext,
    K: Consumer<C>,
{
    for (partition, offset) in positions {
        debug!(%partition, offset, "seeking consumer");
        consumer
            .seek(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(*offset),
                timeout,
            )
            .map_err(|error| {
                metrics::counter!(SEEK_FAILURES).increment(1);
                SeekError {
                    partition: partition.clone(),
                    offset: *offset,
                    error,
                }
            })?;
    }
    Ok(())
}
