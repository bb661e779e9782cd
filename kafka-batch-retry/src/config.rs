use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

use crate::backoff::{BackOff, ExponentialBackOff, FixedBackOff, JitteredBackOff};
use crate::kafka::config::ConsumerConfigBuilder;
use crate::kafka::dead_letter::DeadLetterDestination;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "batch-retry")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "events")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    // Must exceed the longest backoff wait, the worker stops polling while it waits
    #[envconfig(default = "300000")]
    pub kafka_max_poll_interval_ms: u32,

    // Kafka Producer configuration, used for dead letter publishing
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    // Batch consumption
    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub batch_timeout: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub seek_timeout: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub backoff: BackOffConfig,

    // Fixed dead letter topic. When unset, records go to their source topic plus the suffix.
    pub dead_letter_topic: Option<String>,

    #[envconfig(default = ".DLT")]
    pub dead_letter_topic_suffix: String,

    #[envconfig(default = "true")]
    pub dead_letter_preserve_partition: bool,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn to_consumer_config(&self) -> ClientConfig {
        ConsumerConfigBuilder::for_batch_consumer(&self.kafka_hosts, &self.kafka_consumer_group)
            .with_tls(self.kafka_tls)
            .with_offset_reset(&self.kafka_consumer_offset_reset)
            .with_max_poll_interval_ms(self.kafka_max_poll_interval_ms)
            .build()
    }

    pub fn dead_letter_destination(&self) -> DeadLetterDestination {
        match &self.dead_letter_topic {
            Some(topic) => DeadLetterDestination::Topic(topic.clone()),
            None => DeadLetterDestination::Suffix(self.dead_letter_topic_suffix.clone()),
        }
    }

    pub fn backoff_policy(&self) -> Arc<dyn BackOff> {
        self.backoff.policy()
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct BackOffConfig {
    #[envconfig(default = "fixed")]
    pub backoff_kind: BackOffKind,

    /// Wait between attempts for fixed backoff, first wait for exponential backoff.
    #[envconfig(default = "1000")]
    pub backoff_interval: EnvMsDuration,

    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "30000")]
    pub backoff_maximum_interval: EnvMsDuration,

    #[envconfig(default = "9")]
    pub backoff_max_attempts: u32,

    // 0 disables jitter
    #[envconfig(default = "0")]
    pub backoff_jitter: f64,
}

impl BackOffConfig {
    pub fn policy(&self) -> Arc<dyn BackOff> {
        match self.backoff_kind {
            BackOffKind::Fixed => self.with_jitter(FixedBackOff::new(
                self.backoff_interval.0,
                self.backoff_max_attempts,
            )),
            BackOffKind::Exponential => self.with_jitter(ExponentialBackOff::new(
                self.backoff_coefficient,
                self.backoff_interval.0,
                Some(self.backoff_maximum_interval.0),
                self.backoff_max_attempts,
            )),
        }
    }

    fn with_jitter<B: BackOff + 'static>(&self, backoff: B) -> Arc<dyn BackOff> {
        if self.backoff_jitter > 0.0 {
            Arc::new(JitteredBackOff::new(backoff, self.backoff_jitter))
        } else {
            Arc::new(backoff)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackOffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseBackOffKindError(String);

impl std::fmt::Display for ParseBackOffKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not a valid backoff kind", self.0)
    }
}

impl FromStr for BackOffKind {
    type Err = ParseBackOffKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackOffKind::Fixed),
            "exponential" => Ok(BackOffKind::Exponential),
            _ => Err(ParseBackOffKindError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl std::fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected a duration in milliseconds")
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}
