// Kafka module - batch consumption, dead letter publishing and consumer config
pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod message;
pub mod types;

// Public API
pub use config::ConsumerConfigBuilder;
pub use consumer::{BatchProcessor, BatchRetryConsumer};
pub use dead_letter::DeadLetterPublisher;
pub use types::{BatchRecord, Partition};
