//! Bounded hand-off between the market data loop and the database.
//!
//! Producers push records through a [`Keeper`] without ever waiting on the
//! database. A single [`KeepWorker`] task drains the queue into batches and
//! writes each batch with one [`BatchSink::bulk_write`] call. The worker only
//! stops after it has seen the stop message, so the trailing partial batch is
//! always flushed.
//!
//! A batch whose write fails is logged and dropped. Records are delivered at
//! most once; there is no retry or dead-letter path.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("database write failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    fn table(&self) -> &str;

    async fn bulk_write(&self, records: &[T]) -> Result<(), SinkError>;
}

/// Queue message; `Stop` flushes whatever is buffered and ends the worker.
#[derive(Debug)]
pub enum KeepMessage<T> {
    Record(T),
    Stop,
}

/// Producer half of the pipeline.
pub struct Keeper<T> {
    data_tx: mpsc::Sender<KeepMessage<T>>,
}

impl<T> Clone for Keeper<T> {
    fn clone(&self) -> Self {
        Self {
            data_tx: self.data_tx.clone(),
        }
    }
}

impl<T: Send + Debug> Keeper<T> {
    /// Never waits. A full or closed queue drops the record with an error log.
    pub fn save_data(&self, data: T) {
        if let Err(e) = self.data_tx.try_send(KeepMessage::Record(data)) {
            match e {
                mpsc::error::TrySendError::Full(KeepMessage::Record(dropped)) => {
                    error!("Keep queue is full, dropping record: {:?}", dropped);
                }
                mpsc::error::TrySendError::Closed(KeepMessage::Record(dropped)) => {
                    error!("Keep queue is closed, dropping record: {:?}", dropped);
                }
                other => error!("Failed to put data to keep queue: {}", other),
            }
        }
    }

    /// Sends the stop message, waiting for queue space if needed.
    pub async fn stop(&self) {
        if self.data_tx.send(KeepMessage::Stop).await.is_err() {
            warn!("Keep worker is already gone, stop message not delivered");
        }
    }
}

/// Consumer half of the pipeline.
pub struct KeepWorker<T, S> {
    data_rx: mpsc::Receiver<KeepMessage<T>>,
    sink: Arc<S>,
    batch_size: usize,
}

/// Builds a connected keeper/worker pair over a queue of `capacity` slots.
pub fn keep_channel<T, S>(sink: Arc<S>, batch_size: usize, capacity: usize) -> (Keeper<T>, KeepWorker<T, S>)
where
    T: Send + Debug,
    S: BatchSink<T>,
{
    let (data_tx, data_rx) = mpsc::channel(capacity.max(1));
    (
        Keeper { data_tx },
        KeepWorker {
            data_rx,
            sink,
            batch_size: batch_size.max(1),
        },
    )
}

impl<T, S> KeepWorker<T, S>
where
    T: Send + Sync + Debug,
    S: BatchSink<T>,
{
    pub async fn run(mut self) {
        info!("Starting keep worker for table {}", self.sink.table());
        let mut batch: Vec<T> = Vec::with_capacity(self.batch_size);

        loop {
            match self.data_rx.recv().await {
                Some(KeepMessage::Record(data)) => {
                    batch.push(data);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch).await;
                    }
                }
                Some(KeepMessage::Stop) => {
                    debug!("Stop message received, {} records left in batch", batch.len());
                    self.flush(&mut batch).await;
                    break;
                }
                None => {
                    warn!("Keep queue closed without a stop message. Flushing remaining batch.");
                    self.flush(&mut batch).await;
                    break;
                }
            }
        }
        info!("Keep worker for table {} stopped", self.sink.table());
    }

    async fn flush(&self, batch: &mut Vec<T>) {
        if batch.is_empty() {
            return;
        }
        match self.sink.bulk_write(batch).await {
            Ok(()) => debug!("Wrote {} records to {}", batch.len(), self.sink.table()),
            Err(e) => error!(
                table = self.sink.table(),
                records = batch.len(),
                first = ?batch.first(),
                last = ?batch.last(),
                "Batch write failed, batch dropped: {}",
                e
            ),
        }
        batch.clear();
    }
}
