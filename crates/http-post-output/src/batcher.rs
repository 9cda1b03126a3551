//! Count/time-windowed batch aggregation with optional gzip compression.
//!
//! The batcher is a long-lived worker between the record pipeline and the
//! delivery worker. It drains serialized records from the bounded record
//! queue into a newline-delimited payload, sealing the batch when either the
//! record count or the wall-clock window is reached:
//!
//! ```text
//!   record queue ──> [ append + "\n" ]* ──> seal ──> batch queue
//!                       │
//!                       └── optional streaming gzip
//! ```
//!
//! Waiting is event-driven: the worker blocks on whichever of "next record"
//! or "window deadline" fires first, never on a fixed-interval poll. An empty
//! window produces nothing. When the record queue closes, the in-progress
//! partial batch is discarded by default (`flush_on_shutdown` seals and
//! forwards it instead) and the batch queue is closed, propagating shutdown
//! downstream.
//!
//! This stage owns the latency/request-volume tradeoff of the whole output:
//! `max_records` and `max_period` directly set how long a record can sit
//! before delivery and how many requests the endpoint sees.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

/// Newline delimiter between serialized records.
const RECORD_DELIMITER: &[u8] = b"\n";

/// Size/time bounds for batch construction.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    /// Seal once this many records are in the batch.
    pub max_records: usize,
    /// Seal once this much wall-clock time has elapsed since batch start.
    pub max_period: Duration,
    /// Gzip the payload.
    pub compress: bool,
    /// Seal and forward a partial batch on shutdown instead of discarding it.
    pub flush_on_shutdown: bool,
}

/// A sealed batch. Immutable once handed downstream.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Newline-delimited serialized records, gzip-compressed if `compressed`.
    pub payload: Vec<u8>,
    /// Number of records in the payload.
    pub records: usize,
    /// Whether `payload` is a complete gzip stream.
    pub compressed: bool,
}

/// In-progress batch buffer, optionally wrapped in a streaming compressor.
enum BatchBuffer {
    Plain(Vec<u8>),
    Gzip(Box<GzEncoder<Vec<u8>>>),
}

impl BatchBuffer {
    fn new(compress: bool) -> Self {
        if compress {
            BatchBuffer::Gzip(Box::new(GzEncoder::new(Vec::new(), Compression::default())))
        } else {
            BatchBuffer::Plain(Vec::new())
        }
    }

    /// Appends one serialized record plus the newline delimiter.
    fn append(&mut self, record: &[u8]) -> std::io::Result<()> {
        match self {
            BatchBuffer::Plain(buf) => {
                buf.extend_from_slice(record);
                buf.extend_from_slice(RECORD_DELIMITER);
                Ok(())
            }
            BatchBuffer::Gzip(encoder) => {
                encoder.write_all(record)?;
                encoder.write_all(RECORD_DELIMITER)
            }
        }
    }

    /// Finalizes the buffer into an independently decodable payload.
    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            BatchBuffer::Plain(buf) => Ok(buf),
            BatchBuffer::Gzip(encoder) => encoder.finish(),
        }
    }
}

/// The aggregation worker.
pub struct Batcher {
    settings: BatchSettings,
    rx: Receiver<Vec<u8>>,
    tx: Sender<Batch>,
}

impl Batcher {
    #[must_use]
    pub fn new(settings: BatchSettings, rx: Receiver<Vec<u8>>, tx: Sender<Batch>) -> Self {
        Batcher { settings, rx, tx }
    }

    /// Runs the batching loop until the record queue closes.
    ///
    /// Dropping the batch sender on return closes the batch queue, which is
    /// how shutdown reaches the delivery worker.
    pub async fn run(mut self) {
        loop {
            let mut buffer = BatchBuffer::new(self.settings.compress);
            let mut records = 0usize;
            let deadline = Instant::now() + self.settings.max_period;

            let input_closed = loop {
                tokio::select! {
                    maybe_record = self.rx.recv() => match maybe_record {
                        Some(record) => {
                            match buffer.append(&record) {
                                Ok(()) => records += 1,
                                Err(e) => error!("Batch buffer write error: {e}"),
                            }
                            if records >= self.settings.max_records {
                                break false;
                            }
                        }
                        None => break true,
                    },
                    () = sleep_until(deadline) => break false,
                }
            };

            if input_closed {
                if records > 0 {
                    if self.settings.flush_on_shutdown {
                        debug!(records, "Record queue closed, flushing partial batch");
                        self.seal_and_forward(buffer, records).await;
                    } else {
                        debug!(records, "Record queue closed, discarding partial batch");
                    }
                }
                // Dropping self.tx closes the batch queue.
                return;
            }

            // A window that expired with nothing in it produces nothing.
            if records == 0 {
                continue;
            }

            if !self.seal_and_forward(buffer, records).await {
                return;
            }
        }
    }

    /// Seals the buffer and pushes the batch downstream, blocking if the
    /// batch queue is full. Returns false when the delivery side is gone.
    async fn seal_and_forward(&self, buffer: BatchBuffer, records: usize) -> bool {
        let payload = match buffer.finish() {
            Ok(payload) => payload,
            Err(e) => {
                error!(records, "Failed to finalize batch: {e}");
                return true;
            }
        };

        debug!(
            records,
            bytes = payload.len(),
            compressed = self.settings.compress,
            "Aggregated batch"
        );

        let batch = Batch {
            payload,
            records,
            compressed: self.settings.compress,
        };
        if self.tx.send(batch).await.is_err() {
            error!("Batch queue closed, stopping batcher");
            return false;
        }
        true
    }
}
