//! Operator notifications.
//!
//! A [`Notifier`] delivers one message. Notifiers are built by key through a
//! [`NotifierRegistry`]; the [`NotificationDispatcher`] decorates every body
//! with agent details and never lets a delivery failure escape.

pub mod smtp;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::agent::registry::AgentRegistry;
use crate::config::{CaseServiceSettings, NotifyConfig};
use crate::error::{ConfigError, ConfigErrorCode, NotifyError};

pub use smtp::SmtpNotifier;

// ── Subjects ────────────────────────────────────────────────────────

pub const SUBJECT_MAIL_CONNECT: &str = "Unable to connect to mail service.";
pub const SUBJECT_MAIL_AUTH: &str = "Unable to connect to mail service, authentication failed.";
pub const SUBJECT_CASE_CONNECT: &str = "Unable to connect to case service.";
pub const SUBJECT_PROCESSING: &str = "Unable to process mail message.";
pub const SUBJECT_UNKNOWN: &str = "Unknown error while processing mail message.";

// ── Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub subject: String,
    pub body: String,
}

/// Delivers notifications somewhere an operator will see them.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

impl LogNotifier {
    pub fn build(_config: &NotifyConfig) -> Result<Arc<dyn Notifier>, ConfigError> {
        Ok(Arc::new(Self))
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        match n.severity {
            Severity::Error => error!(subject = %n.subject, body = %n.body, "Notification"),
            Severity::Warning => warn!(subject = %n.subject, body = %n.body, "Notification"),
            Severity::Info => info!(subject = %n.subject, body = %n.body, "Notification"),
        }
        Ok(())
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Builds a notifier from the `[notify]` section.
pub type NotifierFactory = fn(&NotifyConfig) -> Result<Arc<dyn Notifier>, ConfigError>;

/// Maps `[notify] service` keys to notifier constructors.
pub struct NotifierRegistry {
    factories: HashMap<String, NotifierFactory>,
}

impl NotifierRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: &str, factory: NotifierFactory) {
        self.factories.insert(key.to_ascii_lowercase(), factory);
    }

    pub fn build(&self, config: &NotifyConfig) -> Result<Arc<dyn Notifier>, ConfigError> {
        let key = config.service.trim().to_ascii_lowercase();
        let factory = self.factories.get(&key).ok_or_else(|| {
            ConfigError::with_context(
                ConfigErrorCode::NotificationServiceNotValid,
                format!("Service: {}", config.service),
            )
        })?;
        factory(config)
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("smtp", SmtpNotifier::relay);
        registry.register("smtp-auth", SmtpNotifier::authenticated);
        registry.register("log", LogNotifier::build);
        registry
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Agent details appended to every notification body.
#[derive(Debug, Clone)]
pub struct AgentDetails {
    pub case_url: String,
    pub case_user: String,
    pub login_refresh: Duration,
    pub service_timeout: Duration,
}

impl AgentDetails {
    pub fn from_settings(settings: &CaseServiceSettings) -> Self {
        Self {
            case_url: settings.url.clone(),
            case_user: settings.username.clone(),
            login_refresh: settings.login_refresh(),
            service_timeout: settings.service_timeout(),
        }
    }
}

/// Sends notifications with agent context; failures are logged only.
pub struct NotificationDispatcher {
    notifier: Option<Arc<dyn Notifier>>,
    details: Option<AgentDetails>,
    registry: Arc<AgentRegistry>,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Option<Arc<dyn Notifier>>,
        details: Option<AgentDetails>,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            notifier,
            details,
            registry,
        }
    }

    /// A dispatcher that only logs.
    pub fn disabled(registry: Arc<AgentRegistry>) -> Self {
        Self::new(None, None, registry)
    }

    pub async fn notify(&self, severity: Severity, subject: &str, body: &str) {
        let Some(notifier) = &self.notifier else {
            warn!(%severity, subject, body, "Notifications disabled, not sent");
            return;
        };

        let notification = Notification {
            severity,
            subject: subject.to_string(),
            body: self.compose(severity, body),
        };
        match notifier.send(&notification).await {
            Ok(()) => info!(notifier = notifier.name(), subject, "Notification sent"),
            Err(e) => error!(notifier = notifier.name(), subject, error = %e, "Failed to send notification"),
        }
    }

    fn compose(&self, severity: Severity, body: &str) -> String {
        let mut text = format!("Severity: {severity}\n\n{body}\n");
        if let Some(d) = &self.details {
            text.push_str("\nAgent details:\n");
            text.push_str(&format!("   Case service: {}\n", d.case_url));
            text.push_str(&format!("   User: {}\n", d.case_user));
            text.push_str(&format!(
                "   Login refresh: {} minutes\n",
                d.login_refresh.as_secs() / 60
            ));
            text.push_str(&format!(
                "   Service timeout: {} minutes\n",
                d.service_timeout.as_secs() / 60
            ));
        }
        let services = self.registry.services();
        if !services.is_empty() {
            text.push_str("   Registered services:\n");
            for service in services {
                text.push_str(&format!("      {service}\n"));
            }
        }
        text
    }
}
