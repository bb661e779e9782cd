use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::handler::BatchRetryHandler;
use crate::kafka::consumer::{BatchProcessor, BatchRetryConsumer};
use crate::kafka::dead_letter::DeadLetterPublisher;

/// Wires a batch retry consumer from configuration: one consumer, its retry handler, and a
/// dead letter publisher as the recovery sink.
pub struct BatchRetryService {
    config: Config,
    processor: Arc<dyn BatchProcessor>,
    shutdown: CancellationToken,
}

impl BatchRetryService {
    pub fn new(config: Config, processor: Arc<dyn BatchProcessor>) -> Self {
        Self {
            config,
            processor,
            shutdown: CancellationToken::new(),
        }
    }

    fn build_consumer(&self) -> Result<BatchRetryConsumer> {
        let dead_letters = DeadLetterPublisher::from_config(&self.config)
            .context("Failed to create dead letter producer")?;

        // Shutdown also cuts any in-progress backoff wait short
        let retry_handler = BatchRetryHandler::new(
            self.config.backoff_policy(),
            Arc::new(dead_letters),
            self.shutdown.clone(),
        );

        BatchRetryConsumer::new(
            &self.config.to_consumer_config(),
            &self.config.kafka_consumer_topic,
            self.processor.clone(),
            retry_handler,
            self.config.batch_size,
            self.config.batch_timeout.0,
            self.config.seek_timeout.0,
            self.shutdown.clone(),
        )
    }

    /// Run until ctrl-c
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl+c signal: {e:#}");
            }
        })
        .await
    }

    /// Run the service with a custom shutdown signal (useful for testing)
    pub async fn run_with_shutdown(self, shutdown_signal: impl Future<Output = ()>) -> Result<()> {
        let consumer = self.build_consumer()?;

        info!(
            topic = %self.config.kafka_consumer_topic,
            group = %self.config.kafka_consumer_group,
            "Starting batch retry service"
        );

        let mut consumer_handle = tokio::spawn(async move { consumer.start_consumption().await });

        tokio::select! {
            _ = shutdown_signal => {
                info!("Received shutdown signal, shutting down gracefully...");
            }
            result = &mut consumer_handle => {
                // the consumer stopped on its own, nothing left to shut down
                return match result {
                    Ok(result) => result,
                    Err(e) => Err(e).context("Consumer task panicked"),
                };
            }
        }

        self.shutdown.cancel();

        let shutdown_timeout = self.config.shutdown_timeout.0;
        match tokio::time::timeout(shutdown_timeout, consumer_handle).await {
            Ok(Ok(Ok(_))) => info!("Consumer stopped normally"),
            Ok(Ok(Err(e))) => error!("Consumer stopped with error: {e:#}"),
            Ok(Err(e)) => error!("Consumer task panicked: {e:#}"),
            Err(_) => error!("Consumer shutdown timed out after {:?}", shutdown_timeout),
        }

        info!("Batch retry service stopped");
        Ok(())
    }
}
