use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::RecoveryError;
use crate::kafka::message::KafkaMessage;
use crate::kafka::types::Partition;
use crate::metrics_consts::DEAD_LETTER_PUBLISHED;
use crate::recoverer::Recoverer;

pub const HEADER_ORIGINAL_TOPIC: &str = "dlt-original-topic";
pub const HEADER_ORIGINAL_PARTITION: &str = "dlt-original-partition";
pub const HEADER_ORIGINAL_OFFSET: &str = "dlt-original-offset";
pub const HEADER_ORIGINAL_TIMESTAMP: &str = "dlt-original-timestamp";
pub const HEADER_EXCEPTION_MESSAGE: &str = "dlt-exception-message";
pub const HEADER_EXCEPTION_CAUSE_CHAIN: &str = "dlt-exception-cause-chain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterDestination {
    /// Source topic name with this suffix appended
    Suffix(String),
    /// One topic for every source
    Topic(String),
}

impl DeadLetterDestination {
    pub fn topic_for(&self, source: &Partition) -> String {
        match self {
            DeadLetterDestination::Suffix(suffix) => format!("{}{suffix}", source.topic()),
            DeadLetterDestination::Topic(topic) => topic.clone(),
        }
    }
}

pub fn create_dead_letter_producer(config: &Config) -> Result<FutureProducer, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka dead letter producer configuration: {:?}", client_config);
    client_config.create()
}

/// Republishes exhausted records, unchanged, to a dead letter topic with headers describing
/// where they came from and why they failed.
pub struct DeadLetterPublisher {
    producer: FutureProducer,
    destination: DeadLetterDestination,
    // send to the same partition number as the source record
    preserve_partition: bool,
}

impl DeadLetterPublisher {
    pub fn new(
        producer: FutureProducer,
        destination: DeadLetterDestination,
        preserve_partition: bool,
    ) -> Self {
        Self {
            producer,
            destination,
            preserve_partition,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, KafkaError> {
        let producer = create_dead_letter_producer(config)?;
        info!(
            destination = ?config.dead_letter_destination(),
            "Created dead letter producer"
        );
        Ok(Self::new(
            producer,
            config.dead_letter_destination(),
            config.dead_letter_preserve_partition,
        ))
    }
}

#[async_trait]
impl Recoverer<KafkaMessage> for DeadLetterPublisher {
    async fn recover(
        &self,
        record: &KafkaMessage,
        cause: &anyhow::Error,
    ) -> Result<(), RecoveryError> {
        let source = record.get_topic_partition();
        let topic = self.destination.topic_for(source);

        let future_record = FutureRecord {
            topic: &topic,
            key: record.key.as_deref(),
            payload: record.payload.as_deref(),
            timestamp: None,
            partition: self.preserve_partition.then(|| source.partition_number()),
            headers: Some(dead_letter_headers(record, cause)),
        };

        let delivery = match self.producer.send_result(future_record) {
            Ok(delivery) => delivery,
            Err((error, _)) => {
                metrics::counter!(DEAD_LETTER_PUBLISHED, "status" => "failure").increment(1);
                return Err(RecoveryError::DeadLetterPublish {
                    topic,
                    partition: source.clone(),
                    offset: record.get_offset(),
                    error,
                });
            }
        };

        match delivery.await {
            Ok(Ok(_)) => {
                metrics::counter!(DEAD_LETTER_PUBLISHED, "status" => "success").increment(1);
                debug!(
                    %source,
                    offset = record.get_offset(),
                    dead_letter_topic = %topic,
                    "Published record to dead letter topic"
                );
                Ok(())
            }
            Ok(Err((error, _))) => {
                metrics::counter!(DEAD_LETTER_PUBLISHED, "status" => "failure").increment(1);
                Err(RecoveryError::DeadLetterPublish {
                    topic,
                    partition: source.clone(),
                    offset: record.get_offset(),
                    error,
                })
            }
            Err(_) => {
                metrics::counter!(DEAD_LETTER_PUBLISHED, "status" => "failure").increment(1);
                Err(RecoveryError::DeadLetterCanceled { topic })
            }
        }
    }
}

/// The original headers followed by the dead letter headers.
pub fn dead_letter_headers(record: &KafkaMessage, cause: &anyhow::Error) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new();

    if let Some(original) = &record.headers {
        for header in original.iter() {
            headers = headers.insert(Header {
                key: header.key,
                value: header.value,
            });
        }
    }

    let source = record.get_topic_partition();
    let partition = source.partition_number().to_string();
    let offset = record.get_offset().to_string();
    let message = cause.to_string();
    let chain = format!("{cause:#}");

    headers = headers
        .insert(Header {
            key: HEADER_ORIGINAL_TOPIC,
            value: Some(source.topic()),
        })
        .insert(Header {
            key: HEADER_ORIGINAL_PARTITION,
            value: Some(partition.as_str()),
        })
        .insert(Header {
            key: HEADER_ORIGINAL_OFFSET,
            value: Some(offset.as_str()),
        })
        .insert(Header {
            key: HEADER_EXCEPTION_MESSAGE,
            value: Some(message.as_str()),
        })
        .insert(Header {
            key: HEADER_EXCEPTION_CAUSE_CHAIN,
            value: Some(chain.as_str()),
        });

    if let Some(timestamp) = record.timestamp_millis() {
        let timestamp = timestamp.to_string();
        headers = headers.insert(Header {
            key: HEADER_ORIGINAL_TIMESTAMP,
            value: Some(timestamp.as_str()),
        });
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, UNIX_EPOCH};

    fn header_value<'a>(headers: &'a OwnedHeaders, key: &str) -> Option<&'a [u8]> {
        headers
            .iter()
            .find(|header| header.key == key)
            .and_then(|header| header.value)
    }

    #[test]
    fn test_destination_topic() {
        let source = Partition::new("orders", 4);

        assert_eq!(
            DeadLetterDestination::Suffix(".DLT".to_string()).topic_for(&source),
            "orders.DLT"
        );
        assert_eq!(
            DeadLetterDestination::Topic("failures".to_string()).topic_for(&source),
            "failures"
        );
    }

    #[test]
    fn test_dead_letter_headers_describe_source_and_cause() {
        let original = OwnedHeaders::new().insert(Header {
            key: "trace-id",
            value: Some("abc"),
        });
        let record = KafkaMessage::new(
            Partition::new("orders", 4),
            1234,
            Some(b"key".to_vec()),
            Some(b"payload".to_vec()),
            Some(UNIX_EPOCH + Duration::from_millis(1_700_000_000_000)),
            Some(original),
        );
        let cause = anyhow::anyhow!("connection refused").context("failed to write order");

        let headers = dead_letter_headers(&record, &cause);

        assert_eq!(headers.get(0).key, "trace-id");
        assert_eq!(header_value(&headers, "trace-id"), Some(&b"abc"[..]));
        assert_eq!(
            header_value(&headers, HEADER_ORIGINAL_TOPIC),
            Some(&b"orders"[..])
        );
        assert_eq!(
            header_value(&headers, HEADER_ORIGINAL_PARTITION),
            Some(&b"4"[..])
        );
        assert_eq!(
            header_value(&headers, HEADER_ORIGINAL_OFFSET),
            Some(&b"1234"[..])
        );
        assert_eq!(
            header_value(&headers, HEADER_ORIGINAL_TIMESTAMP),
            Some(&b"1700000000000"[..])
        );
        assert_eq!(
            header_value(&headers, HEADER_EXCEPTION_MESSAGE),
            Some(&b"failed to write order"[..])
        );
        assert_eq!(
            header_value(&headers, HEADER_EXCEPTION_CAUSE_CHAIN),
            Some(&b"failed to write order: connection refused"[..])
        );
    }

    #[test]
    fn test_headers_without_originals_or_timestamp() {
        let record = KafkaMessage::new(Partition::new("orders", 0), 7, None, None, None, None);

        let headers = dead_letter_headers(&record, &anyhow::anyhow!("nope"));

        assert_eq!(headers.count(), 5);
        assert_eq!(header_value(&headers, HEADER_ORIGINAL_TIMESTAMP), None);
    }
}
