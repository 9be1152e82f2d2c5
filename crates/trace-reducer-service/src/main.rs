// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use trace_reducer::stats::spawn_status_reporter;
use trace_reducer::token_events::{TokenEvent, TokenEventConsumer};
use trace_reducer::{Config, InMemoryTraceRepository, PipelineHandle, PipelineService, Span};

/// One line of the ingress stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum IngressRecord {
    Span(Span),
    TokenEvent(TokenEvent),
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid trace reducer configuration")?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level)
                .map_err(|e| anyhow!("could not parse log level in configuration: {e}"))?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let repository = Arc::new(InMemoryTraceRepository::new());
    let (service, handle) = PipelineService::new(&config, repository.clone())
        .context("failed to create pipeline service")?;
    let service_task = tokio::spawn(service.run());

    let cancel_token = CancellationToken::new();
    let reporter = spawn_status_reporter(
        handle.stats(),
        config.status_interval,
        config.window_size_ms,
        config.discard,
        cancel_token.clone(),
    );

    let consumer = Arc::new(TokenEventConsumer::new(repository));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        "trace-reducer: listening on {} with {} partitions, window {} ms, grace {} ms",
        config.listen_addr, config.partitions, config.window_size_ms, config.grace_ms
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    tokio::spawn(read_records(
                        stream,
                        handle.clone(),
                        Arc::clone(&consumer),
                        cancel_token.clone(),
                    ));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down trace reducer");
                break;
            }
        }
    }

    cancel_token.cancel();
    handle.shutdown()?;
    service_task.await.context("pipeline service task failed")?;
    reporter.await.context("status reporter task failed")?;
    Ok(())
}

async fn read_records(
    stream: TcpStream,
    handle: PipelineHandle,
    consumer: Arc<TokenEventConsumer>,
    cancel_token: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = cancel_token.cancelled() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from connection: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<IngressRecord>(&line) {
            Ok(IngressRecord::Span(span)) => {
                if let Err(e) = handle.ingest(span) {
                    error!("Failed to ingest span: {}", e);
                    break;
                }
            }
            Ok(IngressRecord::TokenEvent(event)) => match consumer.process(event).await {
                Ok(()) => debug!("Applied token event"),
                Err(e) => debug!("Token event was not applied: {}", e),
            },
            Err(e) => warn!("Skipping malformed record: {}", e),
        }
    }
    debug!("Connection closed");
}
