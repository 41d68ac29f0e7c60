//! mailbridge - multi-tenant inbox aggregator over IMAP.
//!
//! Headless service runner: loads account configuration from the
//! environment, starts the aggregation core, logs a stats heartbeat, and
//! shuts down gracefully on SIGTERM/SIGINT. The HTTP surface is a
//! separate collaborator that consumes [`mailbridge_core::InboxService`].

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mailbridge_core::{CatchAll, InboxService, Settings};

/// How long shutdown may take before the process force-exits.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

const STATS_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> mailbridge_core::Result<()> {
    let settings = Settings::from_env()?;
    info!(
        accounts = settings.accounts.len(),
        profile = ?settings.profile,
        "starting mailbridge"
    );

    let service = InboxService::start(&settings, catchall_from_env(&settings))?;

    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stats_tick.tick() => {
                if let Ok(snapshot) = serde_json::to_string(&service.stats()) {
                    info!(stats = %snapshot, "heartbeat");
                }
            }
            () = shutdown_signal() => break,
        }
    }

    info!("signal received; draining");
    if tokio::time::timeout(SHUTDOWN_DEADLINE, service.shutdown())
        .await
        .is_err()
    {
        error!("shutdown deadline exceeded; exiting anyway");
    }
    info!("bye");
    Ok(())
}

/// The catch-all mailbox defaults to the first configured account; the
/// domain list comes from `MAILBRIDGE_DOMAINS` (comma separated) when the
/// deployment serves catch-all domains.
fn catchall_from_env(settings: &Settings) -> Option<CatchAll> {
    let raw = std::env::var("MAILBRIDGE_DOMAINS").ok()?;
    let domains: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    if domains.is_empty() {
        return None;
    }

    let backend = settings.accounts.first()?.address.clone();
    Some(CatchAll::new(backend, &domains))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
