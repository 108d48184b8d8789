//! Tryl activity log sender.
//!
//! Records one event per user id given on the command line:
//!
//! ```text
//! tryl <action> <user_id>...
//! ```
//!
//! Configuration comes from `tryl.toml` and `TRYL_*` environment variables.
//! With `TRYL_BATCHING=true` events go through the background batcher,
//! which is drained before exit.

mod config;

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tryl_core::{Event, MAX_EVENTS_PER_BATCH};
use tryl_delivery::Client;

use crate::config::AppConfig;

const USAGE: &str = "usage: tryl <action> <user_id>...";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let (action, user_ids) = parse_args(std::env::args().skip(1))?;

    let config = AppConfig::load()?;
    info!(
        base_url = %config.base_url,
        api_key = %config.api_key_masked(),
        batching = config.batching,
        "Configuration loaded"
    );

    let client = Client::new(config.api_key.clone(), config.to_client_config())
        .context("Failed to create client")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let events = user_ids.into_iter().map(|user_id| Event::new(user_id, action.clone())).collect();
    let report = send_events(&client, events, &shutdown).await;

    let deadline = deadline_after(config.shutdown_timeout(), &shutdown);
    if let Err(e) = client.close(&deadline).await {
        warn!(error = %e, "Batcher did not drain before the shutdown deadline");
    }

    info!(recorded = report.recorded, failed = report.failed, "Tryl sender finished");
    if report.failed > 0 {
        anyhow::bail!("{} of {} events were not recorded", report.failed, report.total());
    }
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tryl=debug"));

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Splits the command line into the action and the user ids.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<(String, Vec<String>)> {
    let mut args = args.into_iter();
    let action = args.next().context(USAGE)?;
    let user_ids: Vec<String> = args.collect();

    if user_ids.is_empty() {
        anyhow::bail!("at least one user id is required\n{USAGE}");
    }
    Ok((action, user_ids))
}

/// Outcome counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SendReport {
    recorded: usize,
    failed: usize,
}

impl SendReport {
    fn total(self) -> usize {
        self.recorded + self.failed
    }

    fn record<T>(&mut self, user_id: &str, outcome: &tryl_core::Result<T>) {
        match outcome {
            Ok(_) => self.recorded += 1,
            Err(e) => {
                self.failed += 1;
                error!(user_id, error = %e, "Event not recorded");
            },
        }
    }
}

/// Sends every event, through the batcher when one is configured and in
/// batch requests otherwise.
async fn send_events(client: &Client, events: Vec<Event>, cancel: &CancellationToken) -> SendReport {
    let mut report = SendReport::default();

    if client.batcher().is_some() {
        let mut pending = Vec::with_capacity(events.len());
        for event in events {
            let user_id = event.user_id.clone();
            pending.push((user_id, client.log_async(cancel, event).await));
        }
        if let Err(e) = client.flush(cancel).await {
            warn!(error = %e, "Flush reported a failed batch");
        }
        for (user_id, sink) in pending {
            report.record(&user_id, &sink.await);
        }
        return report;
    }

    for chunk in events.chunks(MAX_EVENTS_PER_BATCH) {
        match client.log_batch(cancel, chunk).await {
            Ok(response) => {
                for (event, outcome) in chunk.iter().zip(response.outcomes(chunk.len())) {
                    report.record(&event.user_id, &outcome);
                }
            },
            Err(e) => {
                let failure: tryl_core::Result<()> = Err(e);
                for event in chunk {
                    report.record(&event.user_id, &failure);
                }
            },
        }
    }
    report
}

/// A token cancelled after `timeout` or on shutdown, whichever comes first.
fn deadline_after(timeout: Duration, shutdown: &CancellationToken) -> CancellationToken {
    let deadline = shutdown.child_token();
    tokio::spawn({
        let deadline = deadline.clone();
        async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        }
    });
    deadline
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use tryl_core::codes;
    use tryl_delivery::BatchConfig;
    use tryl_testing::{fixtures, ApiServer};

    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_action_and_user_ids() {
        let (action, users) = parse_args(args(&["user.signed_in", "u1", "u2"])).unwrap();
        assert_eq!(action, "user.signed_in");
        assert_eq!(users, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[test]
    fn rejects_missing_arguments() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["user.signed_in"])).is_err());
    }

    #[tokio::test]
    async fn sends_in_batch_requests_without_batcher() {
        let server = ApiServer::start().await;
        server.mock_batch_echo().await;
        let client = server.client_builder().build().unwrap();

        let report = send_events(&client, fixtures::events(3), &CancellationToken::new()).await;

        assert_eq!(report, SendReport { recorded: 3, failed: 0 });
        server.assert_request_count(1).await;
    }

    #[tokio::test]
    async fn counts_failures_through_batcher() {
        let server = ApiServer::start().await;
        server
            .mock_error("POST", "/v1/events/batch", 400, codes::VALIDATION_ERROR, "rejected", None)
            .await;
        let client = server
            .client_builder()
            .batching(BatchConfig {
                max_batch_size: 2,
                flush_interval: Duration::from_secs(3600),
                max_pending_events: 8,
            })
            .build()
            .unwrap();
        let cancel = CancellationToken::new();

        let report = send_events(&client, fixtures::events(3), &cancel).await;
        client.close(&cancel).await.unwrap();

        assert_eq!(report, SendReport { recorded: 0, failed: 3 });
        assert_eq!(report.total(), 3);
    }
}
