//! Marid daemon entry point.
//!
//! Startup order matters: the configuration is loaded *before* logging is
//! initialised, because the config file carries the default log level
//! (`RUST_LOG` still wins when set). Configuration errors therefore go to
//! stderr directly and exit non-zero.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use marid::config::{ConfigSource, Configuration, load_from_source};
use marid::queue::FileQueueProvider;
use marid::report::OpsGenieReporter;
use marid::runbook::ScriptExecutor;
use marid::supervisor::{StaticCredentials, Supervisor};

/// Selects the spool directory served by the built-in file transport.
/// Production deployments register a cloud transport instead.
const ENV_LOCAL_QUEUE_DIR: &str = "MARIDLOCALQUEUEDIR";

/// How long shutdown drains in-flight jobs before abandoning them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing(configuration: &Configuration) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("marid={}", configuration.log_level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let source = match ConfigSource::from_env() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("marid: {e}");
            return ExitCode::FAILURE;
        }
    };

    let configuration = match load_from_source(&source).await {
        Ok(configuration) => configuration,
        Err(e) => {
            eprintln!("marid: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&configuration);
    info!(
        actions = configuration.action_mappings.len(),
        "Starting marid"
    );

    let executor = Arc::new(ScriptExecutor::new());
    let poster = Arc::new(OpsGenieReporter::new(
        configuration.base_url.clone(),
        configuration.api_key.clone(),
    ));

    let mut supervisor = Supervisor::new(
        configuration,
        executor,
        poster,
        Arc::new(StaticCredentials),
    );

    match std::env::var(ENV_LOCAL_QUEUE_DIR) {
        Ok(dir) if !dir.is_empty() => match FileQueueProvider::open(&dir) {
            Ok(provider) => {
                info!(dir = %dir, "Serving local file queue");
                supervisor.add_queue(provider, None);
            }
            Err(e) => {
                error!(dir = %dir, error = %e, "Could not open local queue directory");
                return ExitCode::FAILURE;
            }
        },
        _ => {
            warn!(
                "No queue transport registered ({ENV_LOCAL_QUEUE_DIR} is unset); \
                 the daemon will idle until stopped"
            );
        }
    }

    if let Err(e) = supervisor.start() {
        error!(error = %e, "Could not start supervisor");
        return ExitCode::FAILURE;
    }

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, draining");
    supervisor.stop(DRAIN_TIMEOUT).await;
    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Completes on SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
