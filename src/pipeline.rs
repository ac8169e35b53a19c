//! NDJSON host pipeline.
//!
//! Reads one event per line (raw bytes, so a line that is not UTF-8 is
//! rejected on its own), runs deliveries concurrently on a bounded number
//! of workers, and on shutdown stops reading while letting every in-flight
//! delivery finish.

use std::sync::Arc;

use anyhow::{Context, Result};
use docfeed_core::Event;
use docfeed_delivery::{DeliveryEngine, Disposition};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Lines accepted as events.
    pub received: u64,
    /// Lines skipped because they were not UTF-8 JSON objects.
    pub rejected: u64,
    /// Events acknowledged by the store.
    pub delivered: u64,
    /// Events handed to the dead-letter sink.
    pub dead_lettered: u64,
}

impl PipelineStats {
    fn record(&mut self, result: Result<Disposition, JoinError>) {
        match result {
            Ok(Disposition::Delivered { .. }) => self.delivered += 1,
            Ok(Disposition::DeadLettered { .. }) => self.dead_lettered += 1,
            Err(e) => error!(error = %e, "delivery task failed"),
        }
    }
}

/// Feeds events from a line-oriented reader into a [`DeliveryEngine`].
#[derive(Debug)]
pub struct Pipeline {
    engine: DeliveryEngine,
    workers: usize,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Creates a pipeline running at most `workers` deliveries at once.
    pub fn new(engine: DeliveryEngine, workers: usize, shutdown: CancellationToken) -> Self {
        Self { engine, workers: workers.max(1), shutdown }
    }

    /// Runs until `input` is exhausted or shutdown is requested, then waits
    /// for all in-flight deliveries.
    ///
    /// # Errors
    ///
    /// Fails only if reading `input` fails. Deliveries already started still
    /// run to completion first.
    pub async fn run<R>(&self, input: R) -> Result<PipelineStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut stats = PipelineStats::default();
        let mut lines = input.split(b'\n');
        let mut line_number = 0_u64;

        info!(workers = self.workers, "pipeline started");

        let read_result = loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!("shutdown requested, no longer reading input");
                    break Ok(());
                },
                next = lines.next_segment() => next,
            };

            let mut line = match next {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            line_number += 1;

            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let event = match Event::from_slice(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(line = line_number, error = %e, "skipping input line");
                    stats.rejected += 1;
                    continue;
                },
            };
            stats.received += 1;

            // An event that has been read is always delivered, even if
            // shutdown arrives while waiting for a worker.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break Ok(());
            };
            let engine = self.engine.clone();
            tasks.spawn(async move {
                let disposition = engine.deliver(&event).await;
                drop(permit);
                disposition
            });

            while let Some(result) = tasks.try_join_next() {
                stats.record(result);
            }
        };

        debug!(in_flight = tasks.len(), "draining in-flight deliveries");
        while let Some(result) = tasks.join_next().await {
            stats.record(result);
        }

        info!(
            received = stats.received,
            rejected = stats.rejected,
            delivered = stats.delivered,
            dead_lettered = stats.dead_lettered,
            "pipeline finished"
        );

        read_result.with_context(|| format!("failed to read input after line {line_number}"))?;
        Ok(stats)
    }
}
