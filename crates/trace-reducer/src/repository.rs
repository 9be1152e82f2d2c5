// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::errors::RepositoryError;
use crate::trace::Trace;

/// Storage collaborator that receives reduced traces.
///
/// Implementations own their retry policy; callers never retry.
#[async_trait]
pub trait TraceRepository: Send + Sync {
    async fn save(&self, trace: Trace) -> Result<(), RepositoryError>;

    /// Purges every trace of a landscape.
    async fn delete_by_landscape_token(&self, landscape_token: &str) -> Result<(), RepositoryError>;

    async fn get_all(&self, landscape_token: &str) -> Result<Vec<Trace>, RepositoryError>;

    async fn get_by_trace_id(
        &self,
        landscape_token: &str,
        trace_id: &str,
    ) -> Result<Vec<Trace>, RepositoryError>;

    /// Traces whose start time lies in `[from, to]`.
    async fn get_by_start_time_and_end_time(
        &self,
        landscape_token: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Trace>, RepositoryError>;

    /// Copies every trace of `cloned_token` into `landscape_token` and
    /// returns how many were copied.
    async fn clone_all(
        &self,
        landscape_token: &str,
        cloned_token: &str,
    ) -> Result<usize, RepositoryError> {
        let traces = self.get_all(cloned_token).await?;
        let count = traces.len();
        for trace in traces {
            let trace = trace.with_landscape_token(landscape_token);
            trace!("Cloned trace {} into {}", trace.trace_id, landscape_token);
            self.save(trace).await?;
        }
        Ok(count)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTraceRepository {
    traces: RwLock<HashMap<String, Vec<Trace>>>,
}

impl InMemoryTraceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored traces over all landscapes.
    pub async fn len(&self) -> usize {
        self.traces.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn select(
        &self,
        landscape_token: &str,
        predicate: impl Fn(&Trace) -> bool + Send,
    ) -> Vec<Trace> {
        self.traces
            .read()
            .await
            .get(landscape_token)
            .map(|traces| traces.iter().filter(|t| predicate(*t)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TraceRepository for InMemoryTraceRepository {
    async fn save(&self, trace: Trace) -> Result<(), RepositoryError> {
        self.traces
            .write()
            .await
            .entry(trace.landscape_token.clone())
            .or_default()
            .push(trace);
        Ok(())
    }

    async fn delete_by_landscape_token(&self, landscape_token: &str) -> Result<(), RepositoryError> {
        self.traces.write().await.remove(landscape_token);
        Ok(())
    }

    async fn get_all(&self, landscape_token: &str) -> Result<Vec<Trace>, RepositoryError> {
        Ok(self.select(landscape_token, |_| true).await)
    }

    async fn get_by_trace_id(
        &self,
        landscape_token: &str,
        trace_id: &str,
    ) -> Result<Vec<Trace>, RepositoryError> {
        Ok(self.select(landscape_token, |t| t.trace_id == trace_id).await)
    }

    async fn get_by_start_time_and_end_time(
        &self,
        landscape_token: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Trace>, RepositoryError> {
        Ok(self
            .select(landscape_token, |t| t.start_time >= from && t.start_time <= to)
            .await)
    }
}
