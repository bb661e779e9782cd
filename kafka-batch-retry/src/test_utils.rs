//! Fakes for the retry handler's collaborators. Used by unit tests and the tests/ directory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::batch::SeekPositions;
use crate::error::{RecoveryError, SeekError};
use crate::kafka::types::{BatchRecord, Partition};
use crate::recoverer::Recoverer;
use crate::seek::OffsetSeeker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub partition: Partition,
    pub offset: i64,
}

impl BatchRecord for TestRecord {
    fn topic_partition(&self) -> Partition {
        self.partition.clone()
    }

    fn offset(&self) -> i64 {
        self.offset
    }
}

pub fn record(topic: &str, partition: i32, offset: i64) -> TestRecord {
    TestRecord {
        partition: Partition::new(topic, partition),
        offset,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekCall {
    Current(SeekPositions),
    Next(SeekPositions),
}

/// Records every seek instead of moving a consumer.
#[derive(Default)]
pub struct RecordingSeeker {
    calls: Mutex<Vec<SeekCall>>,
}

impl RecordingSeeker {
    pub fn calls(&self) -> Vec<SeekCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl OffsetSeeker for RecordingSeeker {
    fn seek_to_current(&self, positions: &SeekPositions) -> Result<(), SeekError> {
        self.calls
            .lock()
            .unwrap()
            .push(SeekCall::Current(positions.clone()));
        Ok(())
    }

    fn seek_to_next(&self, positions: &SeekPositions) -> Result<(), SeekError> {
        self.calls
            .lock()
            .unwrap()
            .push(SeekCall::Next(positions.clone()));
        Ok(())
    }
}

/// Keeps every recovered record and the rendered cause, in call order.
#[derive(Default)]
pub struct RecordingRecoverer {
    recovered: Mutex<Vec<(TestRecord, String)>>,
    /// Fail once this many records have been recovered. Zero never fails.
    pub fail_after: AtomicUsize,
}

impl RecordingRecoverer {
    pub fn recovered(&self) -> Vec<TestRecord> {
        self.recovered
            .lock()
            .unwrap()
            .iter()
            .map(|(record, _)| record.clone())
            .collect()
    }

    pub fn causes(&self) -> Vec<String> {
        self.recovered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cause)| cause.clone())
            .collect()
    }
}

#[async_trait]
impl Recoverer<TestRecord> for RecordingRecoverer {
    async fn recover(&self, record: &TestRecord, cause: &anyhow::Error) -> Result<(), RecoveryError> {
        let mut recovered = self.recovered.lock().unwrap();
        let fail_after = self.fail_after.load(Ordering::SeqCst);
        if fail_after > 0 && recovered.len() >= fail_after {
            return Err(RecoveryError::Other(anyhow::anyhow!(
                "recovery sink unavailable"
            )));
        }
        recovered.push((record.clone(), cause.to_string()));
        Ok(())
    }
}
