//! Mailroom agent binary entry point.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use mailroom_batcher::{BatcherConfig, ExitReason};
use mailroom_config::{init_logging, AgentConfig};
use mailroom_crypto::MacSigner;
use tracing::{error, info};

/// Mailroom agent: batches database token-insert notifications into
/// signed batches on standard output for a downstream sender.
#[derive(Parser)]
#[command(name = "mailroom-agent")]
#[command(about = "Event-driven batching agent for mailroom token notifications")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

/// Installs SIGINT/SIGTERM handlers that flip `shutdown` to `true`, per
/// spec.md §9 ("model the running flag as an atomic small integer written
/// by the signal handler"). `signal_hook::flag::register` only ever
/// writes `true`; it never clears the flag back to `false`, which matches
/// the one-way "agent is shutting down" semantics the loop expects.
fn install_signal_handlers(shutdown: &Arc<AtomicBool>) -> std::io::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(shutdown))?;
    Ok(())
}

/// Single-threaded cooperative runtime, per spec.md §5: "all work ...
/// happens on one thread." The only other task tokio-postgres spawns is
/// the connection driver, whose job is forwarding bytes and notifications,
/// not application logic.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    let signer = match MacSigner::new(config.secret_key.expose()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialize MAC signer");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handlers(&shutdown) {
        error!(error = %e, "failed to install signal handlers");
        std::process::exit(1);
    }

    let batcher_config = BatcherConfig {
        conn_info: config.database_url.clone(),
        channel: config.channel.clone(),
        queue_name: config.queue_name.clone(),
        batch_limit: config.batch_limit,
        batch_timeout: config.batch_timeout,
        healthcheck_interval: config.healthcheck_interval,
    };

    info!(
        channel = %config.channel,
        queue_name = %config.queue_name,
        batch_limit = config.batch_limit,
        batch_timeout_ms = config.batch_timeout.as_millis() as u64,
        healthcheck_interval_ms = config.healthcheck_interval.as_millis() as u64,
        "mailroom agent starting"
    );

    let stdout = std::io::stdout();
    let result = mailroom_batcher::run(&batcher_config, &signer, &shutdown, stdout.lock()).await;

    // Zeroizes the signer's retained key copy (spec.md §4.1 cleanup).
    drop(signer);

    match result {
        Ok(ExitReason::Shutdown) => {
            info!("shutdown signal received, exiting cleanly");
        }
        Err(e) => {
            error!(error = %e, "agent exited with error");
            std::process::exit(1);
        }
    }
}
