// ==== Batch retry metrics ====
/// Counter for failed batches scheduled for redelivery after a backoff wait
pub const BATCH_RETRIES_SCHEDULED: &str = "batch_retry_scheduled_total";

/// Counter for backoff waits cut short by shutdown
pub const BATCH_RETRY_WAIT_INTERRUPTED: &str = "batch_retry_wait_interrupted_total";

/// Histogram for the backoff wait applied before redelivering a batch
pub const BATCH_RETRY_BACKOFF_MS: &str = "batch_retry_backoff_ms";

/// Counter for retry state entries discarded because the batch offsets moved
pub const RETRY_STATE_ENTRIES_REPLACED: &str = "batch_retry_state_replaced_total";

/// Counter for batches whose backoff was exhausted and were handed to recovery
pub const BATCHES_RECOVERED: &str = "batch_retry_batches_recovered_total";

/// Counter for individual records handed to recovery
pub const RECORDS_RECOVERED: &str = "batch_retry_records_recovered_total";

/// Counter for recovery sink failures that aborted a batch
pub const RECOVERY_FAILURES: &str = "batch_retry_recovery_failures_total";

/// Counter for failed seeks on the consumer
pub const SEEK_FAILURES: &str = "batch_retry_seek_failures_total";

// ==== Dead letter metrics ====
/// Counter for dead letter publishes (with status label: success/failure)
pub const DEAD_LETTER_PUBLISHED: &str = "dead_letter_published_total";

// ==== Batch consumer metrics ====
/// Histogram for the number of messages per consumed batch
pub const BATCH_CONSUMER_BATCH_SIZE: &str = "batch_consumer_batch_size";

/// Counter for batches the processor failed on
pub const BATCH_CONSUMER_PROCESSING_FAILURES: &str = "batch_consumer_processing_failures_total";

/// Counter for Kafka errors seen while consuming (with level and error labels)
pub const BATCH_CONSUMER_KAFKA_ERROR: &str = "batch_consumer_kafka_error_total";
