// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Repository doubles

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use trace_reducer::{RepositoryError, Trace, TraceRepository};

/// Rejects every write and counts the attempts.
#[derive(Default)]
pub struct FailingTraceRepository {
    pub save_attempts: AtomicUsize,
}

impl FailingTraceRepository {
    pub fn attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TraceRepository for FailingTraceRepository {
    async fn save(&self, _trace: Trace) -> Result<(), RepositoryError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        Err(RepositoryError::Unavailable("storage offline".to_string()))
    }

    async fn delete_by_landscape_token(&self, _token: &str) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("storage offline".to_string()))
    }

    async fn get_all(&self, _token: &str) -> Result<Vec<Trace>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn get_by_trace_id(
        &self,
        _token: &str,
        _trace_id: &str,
    ) -> Result<Vec<Trace>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn get_by_start_time_and_end_time(
        &self,
        _token: &str,
        _from: i64,
        _to: i64,
    ) -> Result<Vec<Trace>, RepositoryError> {
        Ok(Vec::new())
    }
}
