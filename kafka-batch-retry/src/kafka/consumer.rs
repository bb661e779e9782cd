use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    CommitMode, Consumer, DefaultConsumerContext, MessageStream, StreamConsumer,
};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::TopicPartitionList;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::BatchSummary;
use crate::handler::{BatchRetryHandler, RetryOutcome};
use crate::kafka::message::KafkaMessage;
use crate::kafka::types::BatchRecord;
use crate::metrics_consts::{
    BATCH_CONSUMER_BATCH_SIZE, BATCH_CONSUMER_KAFKA_ERROR, BATCH_CONSUMER_PROCESSING_FAILURES,
};
use crate::seek::{ConsumerSeeker, OffsetSeeker};

/// Application code run on every consumed batch. An error fails the batch as a whole.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_batch(&self, messages: &[KafkaMessage]) -> Result<()>;
}

/// Consumes batches from one topic and runs them through a `BatchProcessor`, handing failed
/// batches to its own `BatchRetryHandler`.
pub struct BatchRetryConsumer {
    consumer: StreamConsumer,

    processor: Arc<dyn BatchProcessor>,

    retry_handler: BatchRetryHandler<KafkaMessage>,

    // batch configs - how big should batches get
    // and how long to wait before we hand one
    // to the processor
    batch_size: usize,
    batch_timeout: Duration,

    seek_timeout: Duration,

    shutdown: CancellationToken,
}

impl BatchRetryConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &ClientConfig,
        topic: &str,
        processor: Arc<dyn BatchProcessor>,
        retry_handler: BatchRetryHandler<KafkaMessage>,
        batch_size: usize,
        batch_timeout: Duration,
        seek_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let consumer: StreamConsumer = config
            .create()
            .context("Failed to create Kafka consumer")?;

        let err_msg = format!("Failed to subscribe to topic: {topic}");
        consumer.subscribe(&[topic]).context(err_msg)?;

        Ok(Self {
            consumer,
            processor,
            retry_handler,
            batch_size,
            batch_timeout,
            seek_timeout,
            shutdown,
        })
    }

    /// Consume until shutdown is requested or an unrecoverable error occurs.
    ///
    /// Recovery or seek failures end the loop without committing the failed batch, so it is
    /// redelivered to whichever consumer picks the partitions up next.
    pub async fn start_consumption(self) -> Result<()> {
        info!("Starting batch retry consumption...");

        let Self {
            consumer,
            processor,
            mut retry_handler,
            batch_size,
            batch_timeout,
            seek_timeout,
            shutdown,
        } = self;
        let mut stream = consumer.stream();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping consumption");
                    break;
                }

                batch = consume_batch(&mut stream, batch_size, batch_timeout) => {
                    let messages = batch?;
                    if messages.is_empty() {
                        continue;
                    }
                    metrics::histogram!(BATCH_CONSUMER_BATCH_SIZE).record(messages.len() as f64);

                    let result = processor.process_batch(&messages).await;
                    let seeker = ConsumerSeeker::new(&consumer, seek_timeout);
                    let disposition =
                        settle_batch(&mut retry_handler, &messages, result, &seeker).await?;

                    if disposition == BatchDisposition::Commit {
                        commit_batch(&consumer, &messages)?;
                    }
                }
            }
        }

        info!("Batch retry consumer shut down");
        Ok(())
    }
}

/// What the loop does with a batch once the processor and retry handler are done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDisposition {
    /// Processed or recovered, commit past it
    Commit,
    /// Rewound for redelivery, nothing to commit yet
    Redeliver,
}

/// Route a processed batch: successes clear retry state, failures go to the retry handler.
/// Handler errors end consumption, so the batch is never committed.
async fn settle_batch<R, S>(
    retry_handler: &mut BatchRetryHandler<R>,
    records: &[R],
    result: Result<()>,
    seeker: &S,
) -> Result<BatchDisposition>
where
    R: BatchRecord + Sync,
    S: OffsetSeeker + ?Sized,
{
    let cause = match result {
        Ok(()) => {
            retry_handler.handle_batch_success(records);
            return Ok(BatchDisposition::Commit);
        }
        Err(cause) => cause,
    };

    metrics::counter!(BATCH_CONSUMER_PROCESSING_FAILURES).increment(1);
    let outcome = retry_handler
        .handle_batch_failure(records, seeker, &cause)
        .await
        .context("Failed to handle batch failure")?;

    match outcome {
        RetryOutcome::Recovered { .. } => Ok(BatchDisposition::Commit),
        RetryOutcome::Retrying { .. } | RetryOutcome::Ignored => Ok(BatchDisposition::Redeliver),
    }
}

/// Collect up to `batch_size` messages, or whatever arrived within `batch_timeout`.
async fn consume_batch(
    stream: &mut MessageStream<'_, DefaultConsumerContext>,
    batch_size: usize,
    batch_timeout: Duration,
) -> Result<Vec<KafkaMessage>> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut error_count: u64 = 0;
    let deadline = tokio::time::sleep(batch_timeout);
    tokio::pin!(deadline);

    while batch.len() < batch_size {
        tokio::select! {
            _ = &mut deadline => break,

            next_msg = stream.next() => {
                match next_msg {
                    Some(Ok(borrowed_message)) => {
                        error_count = 0;
                        batch.push(KafkaMessage::from_borrowed_message(&borrowed_message));
                    }
                    Some(Err(e)) => {
                        error_count += 1;
                        handle_kafka_error(e, error_count).await?;
                    }
                    // Stream ended - return what we have
                    None => break,
                }
            }
        }
    }

    Ok(batch)
}

async fn handle_kafka_error(e: KafkaError, current_count: u64) -> Result<()> {
    match &e {
        KafkaError::MessageConsumption(code) => {
            match code {
                RDKafkaErrorCode::PartitionEOF => {
                    metrics::counter!(
                        BATCH_CONSUMER_KAFKA_ERROR,
                        &[("level", "info"), ("error", "partition_eof")]
                    )
                    .increment(1);
                }
                RDKafkaErrorCode::OperationTimedOut => {
                    metrics::counter!(
                        BATCH_CONSUMER_KAFKA_ERROR,
                        &[("level", "info"), ("error", "op_timed_out")]
                    )
                    .increment(1);
                }
                RDKafkaErrorCode::OffsetOutOfRange => {
                    // auto.offset.reset moves the partition to head or tail with the broker
                    warn!("Offset out of range - seeking to configured offset reset policy");
                    metrics::counter!(
                        BATCH_CONSUMER_KAFKA_ERROR,
                        &[("level", "info"), ("error", "offset_out_of_range")]
                    )
                    .increment(1);
                    sleep(Duration::from_millis(500)).await;
                }
                _ => {
                    warn!("Kafka consumer error: {code:?}");
                    metrics::counter!(
                        BATCH_CONSUMER_KAFKA_ERROR,
                        &[("level", "warn"), ("error", "consumer")]
                    )
                    .increment(1);
                    sleep(Duration::from_millis(100 * current_count.min(10))).await;
                }
            }
            Ok(())
        }
        KafkaError::MessageConsumptionFatal(code) => {
            error!("Fatal Kafka consumer error: {code:?}");
            metrics::counter!(
                BATCH_CONSUMER_KAFKA_ERROR,
                &[("level", "fatal"), ("error", "consumer")]
            )
            .increment(1);
            Err(e).context("Fatal Kafka consumer error")
        }
        KafkaError::Canceled => {
            info!("Consumer canceled - shutting down");
            Err(e).context("Kafka consumer canceled")
        }
        _ => {
            warn!("Kafka consumer error: {e:#}");
            metrics::counter!(
                BATCH_CONSUMER_KAFKA_ERROR,
                &[("level", "warn"), ("error", "other")]
            )
            .increment(1);
            sleep(Duration::from_millis(100 * current_count.min(10))).await;
            Ok(())
        }
    }
}

/// Offsets to commit once a batch is done with: one past its highest offset per partition.
fn commit_list(messages: &[KafkaMessage]) -> Result<TopicPartitionList> {
    let mut list = TopicPartitionList::new();
    let Some(summary) = BatchSummary::from_records(messages) else {
        return Ok(list);
    };

    for (partition, next_offset) in summary.next_positions() {
        list.add_partition_offset(
            partition.topic(),
            partition.partition_number(),
            rdkafka::Offset::Offset(*next_offset),
        )
        .context("Failed to build commit list")?;
    }
    Ok(list)
}

fn commit_batch(consumer: &StreamConsumer, messages: &[KafkaMessage]) -> Result<()> {
    let list = commit_list(messages)?;

    if let Err(e) = consumer.commit(&list, CommitMode::Async) {
        // the next successful commit covers these partitions too
        warn!("Failed to commit batch offsets: {e:#}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use anyhow::anyhow;
    use tokio::time::Instant;

    use crate::backoff::FixedBackOff;
    use crate::kafka::types::Partition;
    use crate::test_utils::{record, RecordingRecoverer, RecordingSeeker, SeekCall, TestRecord};

    #[test]
    fn test_commit_list_points_past_batch() {
        let messages = vec![
            KafkaMessage::new_for_test(Partition::new("events", 0), 10, "a"),
            KafkaMessage::new_for_test(Partition::new("events", 1), 7, "b"),
            KafkaMessage::new_for_test(Partition::new("events", 0), 12, "c"),
            KafkaMessage::new_for_test(Partition::new("events", 0), 11, "d"),
        ];

        let list = commit_list(&messages).unwrap();

        assert_eq!(list.count(), 2);
        assert_eq!(
            list.find_partition("events", 0).unwrap().offset(),
            rdkafka::Offset::Offset(13)
        );
        assert_eq!(
            list.find_partition("events", 1).unwrap().offset(),
            rdkafka::Offset::Offset(8)
        );
        assert_eq!(commit_list(&[]).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kafka_error_classification() {
        assert!(handle_kafka_error(KafkaError::Canceled, 1).await.is_err());
        assert!(handle_kafka_error(
            KafkaError::MessageConsumptionFatal(RDKafkaErrorCode::Fatal),
            1
        )
        .await
        .is_err());
        assert!(handle_kafka_error(
            KafkaError::MessageConsumption(RDKafkaErrorCode::PartitionEOF),
            1
        )
        .await
        .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_back_off_with_repeat_count() {
        let start = Instant::now();
        handle_kafka_error(
            KafkaError::MessageConsumption(RDKafkaErrorCode::PartitionEOF),
            5,
        )
        .await
        .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        let start = Instant::now();
        handle_kafka_error(
            KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure),
            3,
        )
        .await
        .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(300));

        let start = Instant::now();
        handle_kafka_error(
            KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure),
            50,
        )
        .await
        .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    fn retry_handler(
        max_attempts: u32,
        recoverer: Arc<RecordingRecoverer>,
    ) -> BatchRetryHandler<TestRecord> {
        BatchRetryHandler::new(
            Arc::new(FixedBackOff::new(Duration::from_millis(10), max_attempts)),
            recoverer,
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_success_commits_and_clears_retry_state() {
        let recoverer = Arc::new(RecordingRecoverer::default());
        let mut handler = retry_handler(3, recoverer.clone());
        let seeker = RecordingSeeker::default();
        let records = vec![record("events", 0, 10), record("events", 1, 20)];

        let first = settle_batch(&mut handler, &records, Err(anyhow!("flaky")), &seeker)
            .await
            .unwrap();
        assert_eq!(first, BatchDisposition::Redeliver);
        assert!(handler.retry_state().is_allocated());

        let second = settle_batch(&mut handler, &records, Ok(()), &seeker)
            .await
            .unwrap();
        assert_eq!(second, BatchDisposition::Commit);
        assert!(!handler.retry_state().is_allocated());
        assert!(recoverer.recovered().is_empty());
        assert_eq!(seeker.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_retrying_failure_skips_commit_and_rewinds() {
        let recoverer = Arc::new(RecordingRecoverer::default());
        let mut handler = retry_handler(3, recoverer.clone());
        let seeker = RecordingSeeker::default();
        let records = vec![record("events", 0, 10)];

        let disposition = settle_batch(&mut handler, &records, Err(anyhow!("boom")), &seeker)
            .await
            .unwrap();

        assert_eq!(disposition, BatchDisposition::Redeliver);
        assert!(matches!(seeker.calls().as_slice(), [SeekCall::Current(_)]));
        assert!(recoverer.recovered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_recovered_failure_commits() {
        let recoverer = Arc::new(RecordingRecoverer::default());
        let mut handler = retry_handler(0, recoverer.clone());
        let seeker = RecordingSeeker::default();
        let records = vec![record("events", 0, 10), record("events", 0, 11)];

        let disposition = settle_batch(&mut handler, &records, Err(anyhow!("poison")), &seeker)
            .await
            .unwrap();

        assert_eq!(disposition, BatchDisposition::Commit);
        assert_eq!(recoverer.recovered(), records);
        assert!(matches!(seeker.calls().as_slice(), [SeekCall::Next(_)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_handler_error_stops_without_commit() {
        let recoverer = Arc::new(RecordingRecoverer::default());
        recoverer.fail_after.store(1, Ordering::SeqCst);
        let mut handler = retry_handler(0, recoverer.clone());
        let seeker = RecordingSeeker::default();
        let records = vec![record("events", 0, 10), record("events", 0, 11)];

        let result = settle_batch(&mut handler, &records, Err(anyhow!("poison")), &seeker).await;

        assert!(result.is_err());
        assert!(seeker.calls().is_empty());
    }
}
