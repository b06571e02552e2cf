//! `plancton`: the daemon binary. Parses its CLI surface, wires up
//! tracing, and drives [`runtime::Daemon`] until drain converges or a
//! termination signal arrives. Daemonization itself (pid-file, fork,
//! detaching from the controlling terminal) is left to whatever
//! supervises it — this binary always runs in the foreground.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use plancton::config::DaemonArgs;
use plancton::runtime::Daemon;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install the global subscriber: stderr with `--foreground`, otherwise a
/// plain file under `logdir` (rotation is an operator's job — point
/// `logrotate` or similar at the file). Verbosity follows `RUST_LOG`,
/// defaulting to `info`.
fn setup_tracing(args: &DaemonArgs) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if args.foreground {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        None
    } else {
        let appender = tracing_appender::rolling::never(&args.logdir, "plancton.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .init();
        Some(guard)
    }
}

/// Flip `shutdown` on SIGTERM or SIGINT. This is the daemon's half of the
/// original's `onexit()`: the sibling control CLI's `onexit` command works
/// purely through sentinel files (`control::mode`) and needs no signal
/// delivery of its own.
fn spawn_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(%e, "could not install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        }
        shutdown.store(true, Ordering::SeqCst);
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = DaemonArgs::parse();
    let _guard = setup_tracing(&args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "plancton starting"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(Arc::clone(&shutdown));

    let mut daemon = match Daemon::init(args, shutdown).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    while daemon.should_continue() {
        daemon.tick().await;
        daemon.sleep_interruptible().await;
    }

    info!("plancton exiting");
    ExitCode::SUCCESS
}
