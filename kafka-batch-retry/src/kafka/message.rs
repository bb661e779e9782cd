use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rdkafka::message::{BorrowedMessage, Message, OwnedHeaders};

use crate::kafka::types::{BatchRecord, Partition};

/// An owned copy of a consumed Kafka message. Batches hold these so they can outlive the
/// consumer's internal buffers across retries and be republished verbatim on recovery.
#[derive(Debug, Clone)]
pub struct KafkaMessage {
    topic_partition: Partition,

    offset: i64,

    /// Optional message key as raw bytes
    pub key: Option<Vec<u8>>,

    pub payload: Option<Vec<u8>>,

    /// Broker or producer timestamp, when the message carried one
    pub timestamp: Option<SystemTime>,

    /// Original headers from inbound message (for republishing)
    pub headers: Option<OwnedHeaders>,
}

impl KafkaMessage {
    pub fn new(
        topic_partition: Partition,
        offset: i64,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
        timestamp: Option<SystemTime>,
        headers: Option<OwnedHeaders>,
    ) -> Self {
        Self {
            topic_partition,
            offset,
            key,
            payload,
            timestamp,
            headers,
        }
    }

    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        let timestamp = msg
            .timestamp()
            .to_millis()
            .and_then(|ms| u64::try_from(ms).ok())
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms));

        Self {
            topic_partition: Partition::new(msg.topic(), msg.partition()),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp,
            headers: msg.headers().map(|h| h.detach()),
        }
    }

    pub fn get_topic_partition(&self) -> &Partition {
        &self.topic_partition
    }

    pub fn get_offset(&self) -> i64 {
        self.offset
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    /// Get the message key as a UTF-8 string if possible
    pub fn key_as_str(&self) -> Option<Result<&str, std::str::Utf8Error>> {
        self.key.as_ref().map(|k| std::str::from_utf8(k))
    }

    /// Milliseconds since the epoch, as Kafka encodes timestamps
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp
            .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_millis()).ok())
    }

    #[cfg(test)]
    pub fn new_for_test(partition: Partition, offset: i64, payload: &str) -> Self {
        Self::new(
            partition,
            offset,
            None,
            Some(payload.as_bytes().to_vec()),
            Some(SystemTime::now()),
            None,
        )
    }
}

impl BatchRecord for KafkaMessage {
    fn topic_partition(&self) -> Partition {
        self.topic_partition.clone()
    }

    fn offset(&self) -> i64 {
        self.offset
    }
}
