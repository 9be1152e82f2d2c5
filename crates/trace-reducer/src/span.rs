// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The span record consumed from the broker.

use serde::{Deserialize, Serialize};

/// Separator between landscape token and trace id in window keys.
pub const KEY_SEPARATOR: &str = "::";

/// A single recorded operation invocation.
///
/// Timestamps are epoch milliseconds. A span with an empty `parent_span_id`
/// is the root of its trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub landscape_token: String,
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Structural identity of the invoked operation, see [`crate::hash_signer`].
    #[serde(default)]
    pub operation_hash: String,
    #[serde(default)]
    pub host_ip_address: String,
    #[serde(default)]
    pub app_instance_id: String,
    #[serde(default)]
    pub fully_qualified_operation_name: String,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }

    /// Grouping key shared by all spans of one trace.
    pub fn window_key(&self) -> String {
        window_key(&self.landscape_token, &self.trace_id)
    }
}

/// Builds the `landscapeToken::traceId` key used for windowing and partitioning.
pub fn window_key(landscape_token: &str, trace_id: &str) -> String {
    format!("{landscape_token}{KEY_SEPARATOR}{trace_id}")
}
