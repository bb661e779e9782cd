use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::kafka::types::Partition;

/// Errors raised by a recovery sink. These are never retried by the batch retry handler.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("failed to publish {partition} offset {offset} to dead letter topic {topic}")]
    DeadLetterPublish {
        topic: String,
        partition: Partition,
        offset: i64,
        #[source]
        error: KafkaError,
    },
    #[error("dead letter publish to {topic} was canceled before delivery")]
    DeadLetterCanceled { topic: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
#[error("failed to seek {partition} to offset {offset}")]
pub struct SeekError {
    pub partition: Partition,
    pub offset: i64,
    #[source]
    pub error: KafkaError,
}

/// Enumeration of errors surfaced by the batch retry handler.
#[derive(Error, Debug)]
pub enum BatchRetryError {
    #[error("recovery sink failed for {partition} offset {offset}")]
    Recovery {
        partition: Partition,
        offset: i64,
        #[source]
        error: RecoveryError,
    },
    #[error("consumer seek failed")]
    Seek(#[from] SeekError),
}
