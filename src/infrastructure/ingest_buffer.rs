//! Buffered writer for position observations.
//!
//! Position crawls emit one record per listed SKU at page speed; writing
//! them one by one would amplify storage round-trips. Records are buffered
//! and flushed when either the count threshold or the time window is hit.
//! Runs as a dedicated background task and never blocks the crawl path.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::domain::entities::PositionSnapshot;
use crate::infrastructure::snapshot_repository::SnapshotRepository;

/// Cloneable sending side handed to position crawl jobs.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<PositionSnapshot>,
}

impl IngestHandle {
    /// Queue one observation. Drops the record (with a log line) if the
    /// consumer is gone; position data is re-observed next round anyway.
    pub async fn submit(&self, snapshot: PositionSnapshot) {
        if self.tx.send(snapshot).await.is_err() {
            error!("position ingest buffer is closed, dropping observation");
        }
    }
}

pub struct IngestBuffer {
    repository: SnapshotRepository,
    rx: mpsc::Receiver<PositionSnapshot>,
    max_buffer: usize,
    flush_interval: Duration,
}

impl IngestBuffer {
    pub fn new(
        repository: SnapshotRepository,
        max_buffer: usize,
        flush_interval: Duration,
    ) -> (IngestHandle, Self) {
        let (tx, rx) = mpsc::channel(max_buffer.max(1) * 2);
        (
            IngestHandle { tx },
            Self {
                repository,
                rx,
                max_buffer: max_buffer.max(1),
                flush_interval,
            },
        )
    }

    /// Consume until every sender is dropped, then flush the remainder.
    pub async fn run(mut self) {
        let mut buffer: Vec<PositionSnapshot> = Vec::with_capacity(self.max_buffer);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    match received {
                        Some(snapshot) => {
                            buffer.push(snapshot);
                            if buffer.len() >= self.max_buffer {
                                self.flush(&mut buffer).await;
                            }
                        }
                        None => {
                            self.flush(&mut buffer).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<PositionSnapshot>) {
        if buffer.is_empty() {
            return;
        }
        debug!("flushing {} position observations", buffer.len());
        if let Err(e) = self.repository.insert_position_snapshots(buffer).await {
            error!("position flush failed, {} observations lost: {e}", buffer.len());
        }
        buffer.clear();
    }
}
