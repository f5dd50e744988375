use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mail2case::agent::{Agent, AgentDeps, AgentRegistry, classify};
use mail2case::cases::HttpCaseService;
use mail2case::config::AgentConfig;
use mail2case::error::{ConfigError, Error};
use mail2case::notify::{NotificationDispatcher, Notifier, NotifierRegistry};
use mail2case::storage::FsAttachmentStore;

const DEFAULT_CONFIG: &str = "mail2case.toml";
const LOG_FILE_PREFIX: &str = "mail2case.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let path = config_path();
    let loaded = AgentConfig::load(&path);
    let _log_guard = init_tracing(
        loaded
            .as_ref()
            .ok()
            .and_then(|c| c.logging.directory.as_deref()),
    )?;

    info!(config = %path.display(), "mail2case v{}", env!("CARGO_PKG_VERSION"));
    let config = loaded.context("Unable to load configuration")?;

    // ── Notifications ───────────────────────────────────────────────
    let notifier: Option<Arc<dyn Notifier>> = match &config.notify {
        Some(section) => match NotifierRegistry::default().build(section) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                warn!(error = %e, "Notifications disabled");
                None
            }
        },
        None => {
            info!("No [notify] section, notifications disabled");
            None
        }
    };

    // ── Case service and attachments ────────────────────────────────
    let settings = match config.case_service.validate() {
        Ok(settings) => settings,
        Err(e) => return Err(startup_failure(&notifier, e).await),
    };
    let policy = match config.attachment_policy() {
        Ok(policy) => policy,
        Err(e) => return Err(startup_failure(&notifier, e).await),
    };

    let case_service = Arc::new(HttpCaseService::new(
        settings.url.clone(),
        settings.username.clone(),
        settings.password.clone(),
    ));
    let attachments = Arc::new(FsAttachmentStore::new(
        policy.directory.clone().unwrap_or_default(),
    ));

    info!(
        case_service = %settings.url,
        accounts = config.accounts.len(),
        "Starting agent"
    );

    // ── Pollers ─────────────────────────────────────────────────────
    let mut agent = Agent::new(
        &settings,
        policy,
        AgentDeps {
            case_service,
            attachments,
            notifier,
            connector: None,
        },
    );
    agent.start_accounts(&config.accounts).await;

    match agent.run().await {
        Some(state) => info!(reason = %state.reason, at = %state.at, "mail2case agent shut down"),
        None => info!("mail2case agent shut down"),
    }
    Ok(())
}

/// First argument, then `MAIL2CASE_CONFIG`, then the default file name.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MAIL2CASE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
        .into()
}

fn init_tracing(directory: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Unable to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Report a configuration error found before any poller exists.
async fn startup_failure(notifier: &Option<Arc<dyn Notifier>>, e: ConfigError) -> anyhow::Error {
    let error = Error::Config(e);
    let c = classify(&error, false);
    error!(error = %error, "Invalid configuration");
    if c.notifiable {
        NotificationDispatcher::new(notifier.clone(), None, Arc::new(AgentRegistry::new()))
            .notify(c.severity(), &c.subject, &error.to_string())
            .await;
    }
    anyhow::Error::new(error).context("Invalid configuration")
}
