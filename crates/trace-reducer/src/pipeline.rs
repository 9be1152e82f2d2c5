// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Partitioned span processing.
//!
//! Each partition is a worker task that exclusively owns one
//! [`WindowedTraceAssembler`]. Spans are routed by window key, so every span
//! of a trace meets in the same worker. Closed traces are reduced and saved
//! by that worker; a slow or failing repository only delays its partition.
//!
//! Event time is tracked for the whole stream. Whenever a batch raises the
//! highest start time seen, every partition is told, so a window closes even
//! when its own partition receives no further spans.

use std::hash::Hasher;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use fnv::FnvHasher;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, trace};

use crate::config::Config;
use crate::errors::{ConfigError, PipelineError};
use crate::hash_signer::HashSigner;
use crate::reduction::{ReductionOutcome, TraceReducer};
use crate::repository::TraceRepository;
use crate::span::Span;
use crate::stats::{Counter, PipelineStats};
use crate::trace::Trace;
use crate::window::WindowedTraceAssembler;

#[derive(Debug)]
pub enum PartitionCommand {
    Ingest(Vec<Span>),
    AdvanceWatermark(i64),
    Sync(oneshot::Sender<PartitionStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStatus {
    pub partition: usize,
    pub watermark: Option<i64>,
    pub open_windows: usize,
    /// Accumulators dropped for size whose window has not closed yet.
    pub overflowed_windows: usize,
}

/// Stable partition index for a window key.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() % partitions.max(1) as u64) as usize
}

#[derive(Clone)]
pub struct PipelineHandle {
    partitions: Vec<mpsc::UnboundedSender<PartitionCommand>>,
    signer: HashSigner,
    stats: Arc<PipelineStats>,
    // Highest span start time routed by any handle clone.
    watermark: Arc<AtomicI64>,
    discard: bool,
}

impl PipelineHandle {
    pub fn ingest(&self, span: Span) -> Result<(), PipelineError> {
        self.ingest_batch(vec![span])
    }

    /// Signs unsigned spans and routes them to their partitions.
    pub fn ingest_batch(&self, spans: Vec<Span>) -> Result<(), PipelineError> {
        self.stats.add(Counter::ReceivedSpans, spans.len() as u64);
        if self.discard {
            return Ok(());
        }

        let mut batches: Vec<Vec<Span>> = vec![Vec::new(); self.partitions.len()];
        let mut batch_watermark = None;
        for mut span in spans {
            if span.operation_hash.is_empty() {
                span.operation_hash = self.signer.sign_span(&span);
            }
            batch_watermark = batch_watermark.max(Some(span.start_time));
            batches[partition_for(&span.window_key(), self.partitions.len())].push(span);
        }

        for (tx, batch) in self.partitions.iter().zip(batches) {
            if batch.is_empty() {
                continue;
            }
            tx.send(PartitionCommand::Ingest(batch))
                .map_err(|_| PipelineError::ChannelClosed)?;
        }

        // Spans go first so they are windowed before event time moves on.
        if let Some(timestamp) = batch_watermark {
            if self.watermark.fetch_max(timestamp, Ordering::AcqRel) < timestamp {
                trace!("Stream watermark advanced to {}", timestamp);
                self.broadcast(|| PartitionCommand::AdvanceWatermark(timestamp))?;
            }
        }
        Ok(())
    }

    /// Moves event time forward on every partition.
    pub fn advance_watermark(&self, timestamp: i64) -> Result<(), PipelineError> {
        self.watermark.fetch_max(timestamp, Ordering::AcqRel);
        self.broadcast(|| PartitionCommand::AdvanceWatermark(timestamp))
    }

    /// Highest event time seen on the whole stream, if any span or
    /// punctuation was routed yet.
    pub fn watermark(&self) -> Option<i64> {
        match self.watermark.load(Ordering::Acquire) {
            i64::MIN => None,
            timestamp => Some(timestamp),
        }
    }

    /// Resolves once every partition has handled all earlier commands,
    /// including persisting the traces those commands closed.
    pub async fn sync(&self) -> Result<Vec<PartitionStatus>, PipelineError> {
        let mut pending = Vec::with_capacity(self.partitions.len());
        for tx in &self.partitions {
            let (response_tx, response_rx) = oneshot::channel();
            tx.send(PartitionCommand::Sync(response_tx))
                .map_err(|_| PipelineError::ChannelClosed)?;
            pending.push(response_rx);
        }

        let mut statuses = Vec::with_capacity(pending.len());
        for response_rx in pending {
            statuses.push(
                response_rx
                    .await
                    .map_err(|_| PipelineError::ResponseDropped)?,
            );
        }
        Ok(statuses)
    }

    /// Stops every worker. Open windows are discarded, not emitted.
    pub fn shutdown(&self) -> Result<(), PipelineError> {
        self.broadcast(|| PartitionCommand::Shutdown)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    fn broadcast(&self, command: impl Fn() -> PartitionCommand) -> Result<(), PipelineError> {
        for tx in &self.partitions {
            tx.send(command())
                .map_err(|_| PipelineError::ChannelClosed)?;
        }
        Ok(())
    }
}

pub struct PipelineService {
    workers: Vec<PartitionWorker>,
}

impl PipelineService {
    pub fn new(
        config: &Config,
        repository: Arc<dyn TraceRepository>,
    ) -> Result<(Self, PipelineHandle), ConfigError> {
        config.validate()?;
        let reducer = TraceReducer::new(config.reduction_depth)?;
        let stats = Arc::new(PipelineStats::new());

        let mut workers = Vec::with_capacity(config.partitions);
        let mut partitions = Vec::with_capacity(config.partitions);
        for partition in 0..config.partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            workers.push(PartitionWorker {
                partition,
                assembler: WindowedTraceAssembler::new(config.window_config(), Arc::clone(&stats))?,
                reducer,
                repository: Arc::clone(&repository),
                stats: Arc::clone(&stats),
                rx,
            });
            partitions.push(tx);
        }

        let handle = PipelineHandle {
            partitions,
            signer: HashSigner::new(config.digest_algorithm),
            stats,
            watermark: Arc::new(AtomicI64::new(i64::MIN)),
            discard: config.discard,
        };

        Ok((Self { workers }, handle))
    }

    pub async fn run(self) {
        debug!("Pipeline service started with {} partitions", self.workers.len());

        let mut tasks = JoinSet::new();
        for worker in self.workers {
            tasks.spawn(worker.run());
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Partition worker failed: {}", e);
            }
        }

        debug!("Pipeline service stopped");
    }
}

struct PartitionWorker {
    partition: usize,
    assembler: WindowedTraceAssembler,
    reducer: TraceReducer,
    repository: Arc<dyn TraceRepository>,
    stats: Arc<PipelineStats>,
    rx: mpsc::UnboundedReceiver<PartitionCommand>,
}

impl PartitionWorker {
    async fn run(mut self) {
        debug!("Partition worker {} started", self.partition);

        while let Some(command) = self.rx.recv().await {
            match command {
                PartitionCommand::Ingest(spans) => {
                    for span in spans {
                        let closed = self.assembler.push(span);
                        self.persist(closed).await;
                    }
                }

                PartitionCommand::AdvanceWatermark(timestamp) => {
                    let closed = self.assembler.advance_watermark(timestamp);
                    self.persist(closed).await;
                }

                PartitionCommand::Sync(response_tx) => {
                    let status = PartitionStatus {
                        partition: self.partition,
                        watermark: self.assembler.watermark(),
                        open_windows: self.assembler.open_windows(),
                        overflowed_windows: self.assembler.overflowed_windows(),
                    };
                    if response_tx.send(status).is_err() {
                        error!("Failed to send sync response - receiver dropped");
                    }
                }

                PartitionCommand::Shutdown => break,
            }
        }

        let discarded = self.assembler.discard();
        debug!(
            "Partition worker {} stopped, discarded {} open windows",
            self.partition, discarded
        );
    }

    async fn persist(&self, traces: Vec<Trace>) {
        for trace in traces {
            let trace = match self.reducer.reduce(trace) {
                ReductionOutcome::Reduced { trace, .. } => {
                    self.stats.incr(Counter::ReducedTraces);
                    trace
                }
                ReductionOutcome::Fallback(trace) => {
                    self.stats.incr(Counter::ReductionFallbacks);
                    trace
                }
            };

            let key = trace.window_key();
            match self.repository.save(trace).await {
                Ok(()) => {
                    trace!("Persisted trace {}", key);
                    self.stats.incr(Counter::PersistedTraces);
                }
                Err(e) => {
                    error!("Failed to persist trace {}: {}", key, e);
                    self.stats.incr(Counter::FailedPersists);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTraceRepository;

    fn span(trace_id: &str, id: &str, parent: &str, start: i64) -> Span {
        Span {
            landscape_token: "token".to_string(),
            trace_id: trace_id.to_string(),
            span_id: id.to_string(),
            parent_span_id: parent.to_string(),
            start_time: start,
            end_time: start + 1,
            fully_qualified_operation_name: format!("app.Service.{id}"),
            ..Default::default()
        }
    }

    fn start(config: Config) -> (PipelineHandle, Arc<InMemoryTraceRepository>) {
        let repository = Arc::new(InMemoryTraceRepository::new());
        let (service, handle) =
            PipelineService::new(&config, repository.clone()).expect("valid config");
        tokio::spawn(service.run());
        (handle, repository)
    }

    #[test]
    fn test_partition_for_is_stable() {
        let a = partition_for("token::trace", 8);
        assert_eq!(a, partition_for("token::trace", 8));
        assert!(a < 8);
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[test]
    fn test_new_rejects_negative_depth() {
        let config = Config {
            reduction_depth: -1,
            ..Default::default()
        };
        let result = PipelineService::new(&config, Arc::new(InMemoryTraceRepository::new()));
        assert!(matches!(result, Err(ConfigError::NegativeDepthLimit(-1))));
    }

    #[tokio::test]
    async fn test_pipeline_persists_closed_traces() {
        let (handle, repository) = start(Config::default());

        handle
            .ingest_batch(vec![
                span("t1", "root", "", 100),
                span("t1", "a", "root", 150),
                span("t2", "root", "", 200),
            ])
            .expect("ingest");
        handle.advance_watermark(12_000).expect("advance");
        let statuses = handle.sync().await.expect("sync");

        assert_eq!(statuses.len(), 4);
        assert!(statuses.iter().all(|s| s.open_windows == 0));
        assert_eq!(repository.len().await, 2);

        let stored = repository.get_by_trace_id("token", "t1").await.expect("query");
        assert_eq!(stored[0].span_list.len(), 2);
        assert!(stored[0]
            .span_list
            .iter()
            .all(|s| !s.operation_hash.is_empty()));

        let stats = handle.stats().snapshot();
        assert_eq!(stats.received_spans, 3);
        assert_eq!(stats.reconstructed_traces, 2);
        assert_eq!(stats.persisted_traces, 2);
        handle.shutdown().expect("shutdown");
    }

    #[tokio::test]
    async fn test_span_of_other_key_closes_window_on_idle_partition() {
        let (handle, repository) = start(Config::default());
        let first = partition_for("token::t1", handle.partitions());
        let other = (0..)
            .map(|i| format!("other-{i}"))
            .find(|id| partition_for(&format!("token::{id}"), handle.partitions()) != first)
            .expect("some key lands on another partition");

        handle.ingest(span("t1", "root", "", 100)).expect("ingest");
        handle.ingest(span(&other, "root", "", 12_100)).expect("ingest");
        let statuses = handle.sync().await.expect("sync");

        assert_eq!(handle.watermark(), Some(12_100));
        assert!(statuses.iter().all(|s| s.watermark == Some(12_100)));
        assert_eq!(statuses[first].open_windows, 0);
        let stored = repository.get_by_trace_id("token", "t1").await.expect("query");
        assert_eq!(stored.len(), 1);
        assert!(repository.get_by_trace_id("token", &other).await.expect("query").is_empty());
        handle.shutdown().expect("shutdown");
    }

    #[tokio::test]
    async fn test_older_batch_does_not_broadcast() {
        let (handle, _) = start(Config::default());
        assert_eq!(handle.watermark(), None);

        handle.ingest(span("t1", "root", "", 5_000)).expect("ingest");
        handle.ingest(span("t2", "root", "", 1_000)).expect("ingest");
        assert_eq!(handle.watermark(), Some(5_000));

        handle.advance_watermark(3_000).expect("advance");
        assert_eq!(handle.watermark(), Some(5_000));
        let statuses = handle.sync().await.expect("sync");
        assert!(statuses.iter().all(|s| s.watermark == Some(5_000)));
        handle.shutdown().expect("shutdown");
    }

    #[tokio::test]
    async fn test_status_reports_oversized_windows_separately() {
        let (handle, repository) = start(Config {
            partitions: 1,
            max_record_size: 600,
            ..Default::default()
        });

        let spans = (0..10)
            .map(|i| span("big", &format!("s{i}"), "root", 100 + i))
            .collect();
        handle.ingest_batch(spans).expect("ingest");
        let statuses = handle.sync().await.expect("sync");
        assert_eq!(statuses[0].open_windows, 0);
        assert_eq!(statuses[0].overflowed_windows, 1);

        handle.advance_watermark(12_000).expect("advance");
        let statuses = handle.sync().await.expect("sync");
        assert_eq!(statuses[0].overflowed_windows, 0);
        assert!(repository.is_empty().await);
        handle.shutdown().expect("shutdown");
    }

    #[tokio::test]
    async fn test_discard_mode_only_counts() {
        let (handle, repository) = start(Config {
            discard: true,
            ..Default::default()
        });

        handle.ingest(span("t1", "root", "", 100)).expect("ingest");
        handle.advance_watermark(50_000).expect("advance");
        handle.sync().await.expect("sync");

        assert!(repository.is_empty().await);
        assert_eq!(handle.stats().get(Counter::ReceivedSpans), 1);
        handle.shutdown().expect("shutdown");
    }

    #[tokio::test]
    async fn test_shutdown_discards_open_windows() {
        let repository = Arc::new(InMemoryTraceRepository::new());
        let (service, handle) =
            PipelineService::new(&Config::default(), repository.clone()).expect("valid config");
        let task = tokio::spawn(service.run());

        handle.ingest(span("t1", "root", "", 100)).expect("ingest");
        handle.shutdown().expect("shutdown");
        task.await.expect("service panicked");

        assert!(repository.is_empty().await);
        assert_eq!(handle.stats().get(Counter::DiscardedWindows), 1);
        assert_eq!(handle.sync().await, Err(PipelineError::ChannelClosed));
    }
}
