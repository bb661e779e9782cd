use std::fmt;

/// A topic-partition pair. Ordered so that batch identities have a stable iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition_number)
    }
}

/// Anything consumed from a partitioned log that can take part in a batch retry.
pub trait BatchRecord {
    fn topic_partition(&self) -> Partition;

    fn offset(&self) -> i64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_equality_is_structural() {
        assert_eq!(Partition::new("events", 0), Partition::new("events", 0));
        assert_ne!(Partition::new("events", 0), Partition::new("events", 1));
        assert_ne!(Partition::new("events", 0), Partition::new("other", 0));
    }

    #[test]
    fn test_partition_ordering_by_topic_then_number() {
        let mut partitions = vec![
            Partition::new("b", 0),
            Partition::new("a", 2),
            Partition::new("a", 1),
        ];
        partitions.sort();

        assert_eq!(
            partitions,
            vec![
                Partition::new("a", 1),
                Partition::new("a", 2),
                Partition::new("b", 0),
            ]
        );
        assert_eq!(partitions[0].to_string(), "a-1");
    }
}
