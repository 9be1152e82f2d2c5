// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Structural problems found while turning a span list into a call tree.
///
/// These are recoverable per trace: the pipeline persists the unreduced
/// trace instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTraceError {
    #[error("Invalid trace: No root")]
    NoRoot,

    #[error("Invalid trace: More than one root span")]
    MultipleRoots,

    #[error("Invalid trace: Not connected ({orphans} orphaned spans)")]
    Disconnected { orphans: usize },

    #[error("Invalid trace: Span {span_id} is its own parent")]
    SelfParent { span_id: String },

    #[error("Invalid trace: Duplicate span id {span_id}")]
    DuplicateSpanId { span_id: String },

    #[error("Invalid trace: Spans form a cycle")]
    Cycle,

    #[error("Can only calculate for nodes on same level (got {left} and {right})")]
    LevelMismatch { left: usize, right: usize },

    #[error("Nodes do not share a common ancestor")]
    NoCommonAncestor,
}

/// Construction-time configuration errors. These are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Depth limit must not be negative, got {0}")]
    NegativeDepthLimit(i64),

    #[error("Unsupported digest algorithm '{0}'. Did you use 'SHA3-256'?")]
    UnsupportedDigest(String),
}

/// Failures reported by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Repository rejected record: {0}")]
    Rejected(String),
}

/// Errors raised by the pipeline handle when talking to partition workers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Partition worker channel closed")]
    ChannelClosed,

    #[error("Partition worker dropped the response")]
    ResponseDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(InvalidTraceError::NoRoot.to_string(), "Invalid trace: No root");
        assert_eq!(
            InvalidTraceError::Disconnected { orphans: 2 }.to_string(),
            "Invalid trace: Not connected (2 orphaned spans)"
        );
        assert_eq!(
            ConfigError::NegativeDepthLimit(-1).to_string(),
            "Depth limit must not be negative, got -1"
        );
    }

    #[test]
    fn test_error_debug() {
        let error = RepositoryError::Unavailable("cassandra down".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("Unavailable"));
    }
}
