// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reconstructs call trees from an out-of-order span stream and shrinks
//! them before persistence.
//!
//! Spans are grouped per `landscapeToken::traceId` into event-time windows
//! ([`window`]). Every closed window yields one [`Trace`], which is rebuilt
//! into a call tree, cut to a maximum depth, stripped of repeated loop and
//! recursion branches ([`reduction`]) and handed to a [`TraceRepository`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod errors;
pub mod hash_signer;
pub mod pipeline;
pub mod reduction;
pub mod repository;
pub mod span;
pub mod stats;
pub mod token_events;
pub mod trace;
pub mod trace_aggregator;
pub mod window;

pub use config::Config;
pub use errors::{ConfigError, InvalidTraceError, PipelineError, RepositoryError};
pub use hash_signer::{DigestAlgorithm, HashSigner};
pub use pipeline::{PipelineHandle, PipelineService};
pub use repository::{InMemoryTraceRepository, TraceRepository};
pub use span::Span;
pub use trace::Trace;
pub use trace_aggregator::TraceAggregator;
pub use window::{WindowConfig, WindowPhase, WindowedTraceAssembler};
