use rdkafka::ClientConfig;

/// Kafka consumer configuration builder for batch retry consumers.
///
/// Offsets are never stored or committed automatically: the consumer commits only after a
/// batch was processed or handed to recovery, and rewinds with seeks in between.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    /// Sets: auto.offset.store=false, auto.commit=false, socket.timeout.ms,
    /// session.timeout.ms, heartbeat.interval.ms, max.poll.interval.ms.
    pub fn for_batch_consumer(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id);

        config
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// Set maximum time between poll() calls before consumer leaves group.
    /// Must exceed the longest backoff wait, since the worker does not poll while waiting.
    pub fn with_max_poll_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("max.poll.interval.ms", ms.to_string());
        self
    }

    /// Add any custom configuration
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_consumer_defaults_disable_auto_offsets() {
        let config = ConsumerConfigBuilder::for_batch_consumer("kafka:9092", "retry-group")
            .with_offset_reset("earliest")
            .build();

        assert_eq!(config.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(config.get("group.id"), Some("retry-group"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("security.protocol"), None);
    }

    #[test]
    fn test_tls_and_overrides() {
        let config = ConsumerConfigBuilder::for_batch_consumer("kafka:9092", "retry-group")
            .with_tls(true)
            .with_max_poll_interval_ms(600000)
            .set("client.id", "worker-1")
            .build();

        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("max.poll.interval.ms"), Some("600000"));
        assert_eq!(config.get("client.id"), Some("worker-1"));
    }
}
