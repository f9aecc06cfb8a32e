//! Request recorder implementations.
//!
//! `record` is called on the request path, so every recorder here either
//! does constant work or hands the record to a background task.

use gateway_core::{RequestRecord, RequestRecorder};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Logs each record as a structured event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl RequestRecorder for TracingRecorder {
    fn record(&self, record: RequestRecord) {
        let duration_ms = record.duration.as_millis() as u64;
        let account = record.account.as_deref().unwrap_or("-");

        if record.summary {
            info!(
                request_id = %record.request_id,
                account,
                attempts = record.attempt,
                duration_ms,
                input_tokens = record.input_tokens,
                output_tokens = record.output_tokens,
                error = record.error.as_deref(),
                "Request completed"
            );
        } else if let Some(error) = record.error.as_deref() {
            warn!(
                request_id = %record.request_id,
                url = %record.url,
                status = record.status,
                account,
                attempt = record.attempt,
                duration_ms,
                error,
                "Upstream attempt failed"
            );
        } else {
            debug!(
                request_id = %record.request_id,
                url = %record.url,
                status = record.status,
                account,
                attempt = record.attempt,
                duration_ms,
                "Upstream attempt succeeded"
            );
        }
    }
}

/// Sends every record to each inner recorder
#[derive(Clone, Default)]
pub struct FanoutRecorder {
    recorders: Vec<Arc<dyn RequestRecorder>>,
}

impl FanoutRecorder {
    /// Create an empty fanout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recorder
    #[must_use]
    pub fn with(mut self, recorder: Arc<dyn RequestRecorder>) -> Self {
        self.recorders.push(recorder);
        self
    }

    /// Number of inner recorders
    #[must_use]
    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    /// Whether no recorder is attached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }
}

impl RequestRecorder for FanoutRecorder {
    fn record(&self, record: RequestRecord) {
        if let Some((last, rest)) = self.recorders.split_last() {
            for recorder in rest {
                recorder.record(record.clone());
            }
            last.record(record);
        }
    }
}

/// Queues records for a background task.
///
/// The queue is bounded; records are dropped with a warning when it is full
/// rather than blocking the request.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    tx: mpsc::Sender<RequestRecord>,
}

impl ChannelRecorder {
    /// Create a recorder and the receiving end of its queue
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RequestRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Create a recorder whose records are drained by `sink` on a spawned task.
    ///
    /// The task ends once every clone of the recorder is dropped.
    pub fn spawn<F>(capacity: usize, mut sink: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut(RequestRecord) + Send + 'static,
    {
        let (recorder, mut rx) = Self::new(capacity);
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                sink(record);
            }
            debug!("Record channel closed");
        });
        (recorder, task)
    }
}

impl RequestRecorder for ChannelRecorder {
    fn record(&self, record: RequestRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(request_id = %record.request_id, "Record queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Record queue closed");
            }
        }
    }
}
