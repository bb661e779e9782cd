use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackOff;
use crate::batch::BatchSummary;
use crate::error::BatchRetryError;
use crate::kafka::types::BatchRecord;
use crate::metrics_consts::{
    BATCHES_RECOVERED, BATCH_RETRIES_SCHEDULED, BATCH_RETRY_BACKOFF_MS,
    BATCH_RETRY_WAIT_INTERRUPTED, RECORDS_RECOVERED, RECOVERY_FAILURES,
};
use crate::recoverer::Recoverer;
use crate::seek::OffsetSeeker;
use crate::store::RetryStateStore;

/// What the handler did with a failed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The batch was empty; nothing to retry.
    Ignored,
    /// The partitions were rewound so the batch is redelivered on the next poll.
    Retrying {
        attempt: u32,
        delay: Duration,
        interrupted: bool,
    },
    /// Backoff was exhausted: every record went to the recoverer and the partitions moved past the batch.
    Recovered { attempts: u32, records: usize },
}

/// Decides, for each failed batch, whether to back off and redeliver it or hand it to recovery.
///
/// One handler belongs to one consuming worker and owns that worker's retry state. Workers
/// consuming different partitions each construct their own.
pub struct BatchRetryHandler<R> {
    backoff: Arc<dyn BackOff>,
    recoverer: Arc<dyn Recoverer<R>>,
    store: RetryStateStore,

    // cut backoff waits short on shutdown
    interrupt: CancellationToken,
}

impl<R: BatchRecord + Sync> BatchRetryHandler<R> {
    pub fn new(
        backoff: Arc<dyn BackOff>,
        recoverer: Arc<dyn Recoverer<R>>,
        interrupt: CancellationToken,
    ) -> Self {
        Self {
            backoff,
            recoverer,
            store: RetryStateStore::new(),
            interrupt,
        }
    }

    pub fn retry_state(&self) -> &RetryStateStore {
        &self.store
    }

    /// Handle a batch that failed processing with `cause`.
    ///
    /// Until the backoff is exhausted this pauses the calling worker for the next backoff
    /// interval and rewinds the batch's partitions. Once exhausted, every record is passed to
    /// the recoverer in batch order and the partitions are moved past the batch. Only
    /// recoverer and seek failures are returned.
    pub async fn handle_batch_failure<S>(
        &mut self,
        records: &[R],
        seeker: &S,
        cause: &anyhow::Error,
    ) -> Result<RetryOutcome, BatchRetryError>
    where
        S: OffsetSeeker + ?Sized,
    {
        let Some(summary) = BatchSummary::from_records(records) else {
            warn!("Asked to retry an empty batch, ignoring");
            return Ok(RetryOutcome::Ignored);
        };

        let advance = self
            .store
            .advance(summary.identity(), summary.snapshot(), self.backoff.as_ref());

        match advance.delay {
            Some(delay) => {
                info!(
                    attempt = advance.attempt,
                    delay = ?delay,
                    partitions = summary.identity().len(),
                    records = records.len(),
                    error = ?cause,
                    "Batch processing failed, retrying after backoff"
                );
                metrics::counter!(BATCH_RETRIES_SCHEDULED).increment(1);
                metrics::histogram!(BATCH_RETRY_BACKOFF_MS).record(delay.as_secs_f64() * 1000.0);

                let interrupted = self.wait(delay).await;

                seeker.seek_to_current(summary.current_positions())?;

                Ok(RetryOutcome::Retrying {
                    attempt: advance.attempt,
                    delay,
                    interrupted,
                })
            }
            None => {
                warn!(
                    attempts = advance.attempt,
                    partitions = summary.identity().len(),
                    records = records.len(),
                    error = ?cause,
                    "Batch retries exhausted, handing records to recoverer"
                );

                // the subject is finished either way: a redelivery after a recovery failure
                // starts over with fresh backoff
                let recovered = self.recover_all(records, cause).await;
                self.store.remove(summary.identity());
                recovered?;

                seeker.seek_to_next(summary.next_positions())?;

                metrics::counter!(BATCHES_RECOVERED).increment(1);
                Ok(RetryOutcome::Recovered {
                    attempts: advance.attempt,
                    records: records.len(),
                })
            }
        }
    }

    /// Forget any retry progress for the partitions of a batch that was processed successfully.
    ///
    /// Entries for wider batches that share a partition are dropped too, which covers a rewound
    /// batch being redelivered in smaller pieces.
    pub fn handle_batch_success(&mut self, records: &[R]) -> bool {
        if !self.store.is_allocated() {
            return false;
        }
        let Some(summary) = BatchSummary::from_records(records) else {
            return false;
        };

        let cleared = self.store.remove_overlapping(summary.identity());
        if cleared > 0 {
            debug!(
                partitions = summary.identity().len(),
                entries = cleared,
                "Batch succeeded after retries, clearing retry state"
            );
        }
        cleared > 0
    }

    /// Returns true if the wait was interrupted before the delay elapsed.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.interrupt.cancelled() => {
                info!("Backoff wait interrupted, rewinding batch now");
                metrics::counter!(BATCH_RETRY_WAIT_INTERRUPTED).increment(1);
                true
            }
        }
    }

    async fn recover_all(&self, records: &[R], cause: &anyhow::Error) -> Result<(), BatchRetryError> {
        for record in records {
            if let Err(error) = self.recoverer.recover(record, cause).await {
                let partition = record.topic_partition();
                error!(
                    %partition,
                    offset = record.offset(),
                    error = ?error,
                    "Recoverer failed, aborting batch"
                );
                metrics::counter!(RECOVERY_FAILURES).increment(1);
                return Err(BatchRetryError::Recovery {
                    partition,
                    offset: record.offset(),
                    error,
                });
            }
            metrics::counter!(RECORDS_RECOVERED).increment(1);
        }
        Ok(())
    }
}
