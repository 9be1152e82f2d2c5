// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The trace record produced by window aggregation and handed to persistence.

use serde::{Deserialize, Serialize};

use crate::span::{self, Span};

/// All spans sharing a landscape token and trace id.
///
/// `span_list` order carries no meaning. `overall_request_count` and
/// `trace_count` are always 1 for a single reconstructed trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub landscape_token: String,
    pub trace_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub span_list: Vec<Span>,
    pub overall_request_count: i32,
    pub trace_count: i32,
}

impl Trace {
    /// An accumulator that has not seen any span yet.
    pub fn is_empty(&self) -> bool {
        self.span_list.is_empty()
    }

    pub fn window_key(&self) -> String {
        span::window_key(&self.landscape_token, &self.trace_id)
    }

    /// Size of the JSON record this trace is shipped as.
    pub fn serialized_size(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| bytes.len())
    }

    /// Moves the trace and every span to another landscape.
    #[must_use]
    pub fn with_landscape_token(mut self, landscape_token: &str) -> Self {
        self.landscape_token = landscape_token.to_string();
        for span in &mut self.span_list {
            span.landscape_token = landscape_token.to_string();
        }
        self
    }
}
