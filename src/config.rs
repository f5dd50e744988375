//! Configuration types.
//!
//! The agent reads one TOML file. Raw sections deserialize with every
//! field optional so that a missing value can be reported with its own
//! configuration code; `validate` methods turn them into the typed
//! settings the rest of the crate consumes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ConfigError, ConfigErrorCode};
use crate::mail::{AttachmentPolicy, MailCredentials, Protocol};

/// Default minutes between mandatory case service re-logins.
pub const DEFAULT_LOGIN_REFRESH_MINUTES: i64 = 25;
/// Default case service request timeout in minutes.
pub const DEFAULT_SERVICE_TIMEOUT_MINUTES: i64 = 2;
/// Default mailbox polling interval in minutes.
pub const DEFAULT_POLL_INTERVAL_MINUTES: i64 = 15;
/// Default mailbox polling watchdog in minutes.
pub const DEFAULT_POLL_TIMEOUT_MINUTES: i64 = 10;

const PROBE_FILE: &str = ".mail2case-probe";

/// Whole-file agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub case_service: CaseServiceConfig,
    #[serde(default)]
    pub attachments: Option<AttachmentConfig>,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl AgentConfig {
    /// Read and deserialize a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::with_context(
                ConfigErrorCode::CaseCfgFileLoadFailure,
                format!("{}: {e}", path.display()),
            )
        })?;
        Self::from_toml_str(&content).map_err(|mut e| {
            e.context.insert(0, path.display().to_string());
            e
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| {
            ConfigError::with_context(ConfigErrorCode::CaseCfgFileLoadFailure, e.to_string())
        })
    }

    /// Resolve the attachment policy, validating the section when present.
    ///
    /// Without an `[attachments]` section attachments are never externalized.
    pub fn attachment_policy(&self) -> Result<AttachmentPolicy, ConfigError> {
        match &self.attachments {
            Some(section) => section.validate(),
            None => Ok(AttachmentPolicy::unlimited()),
        }
    }
}

// ── Case service ────────────────────────────────────────────────────

/// `[case_service]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseServiceConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub login_refresh_minutes: Option<i64>,
    pub timeout_minutes: Option<i64>,
    /// Upper bound on the serialized size of one batch.
    pub memory_ceiling_mb: Option<u64>,
}

/// Validated case service settings.
#[derive(Debug, Clone)]
pub struct CaseServiceSettings {
    pub url: String,
    pub username: String,
    pub password: SecretString,
    pub login_refresh_minutes: Option<i64>,
    pub timeout_minutes: Option<i64>,
    pub memory_ceiling_bytes: Option<u64>,
}

impl CaseServiceConfig {
    pub fn validate(&self) -> Result<CaseServiceSettings, ConfigError> {
        let username = non_empty(&self.username)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::CaseMissingUsername))?;
        let password = self
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::CaseMissingPassword))?;
        let url = non_empty(&self.url)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::CaseMissingLoginUrl))?;

        Ok(CaseServiceSettings {
            url,
            username,
            password: SecretString::from(password),
            login_refresh_minutes: self.login_refresh_minutes,
            timeout_minutes: self.timeout_minutes,
            memory_ceiling_bytes: self.memory_ceiling_mb.map(|mb| mb * 1024 * 1024),
        })
    }
}

impl CaseServiceSettings {
    /// Minutes between mandatory re-logins, falling back to the default on
    /// a missing or non-positive value.
    pub fn login_refresh(&self) -> Duration {
        minutes_or_default(
            "login_refresh_minutes",
            self.login_refresh_minutes,
            DEFAULT_LOGIN_REFRESH_MINUTES,
        )
    }

    /// Request timeout, falling back to the default on a missing or
    /// non-positive value.
    pub fn service_timeout(&self) -> Duration {
        minutes_or_default(
            "timeout_minutes",
            self.timeout_minutes,
            DEFAULT_SERVICE_TIMEOUT_MINUTES,
        )
    }
}

fn minutes_or_default(key: &str, value: Option<i64>, default: i64) -> Duration {
    let minutes = match value {
        None => default,
        Some(m) if m > 0 => m,
        Some(m) => {
            warn!(key, value = m, default, "Invalid minutes value, using default");
            default
        }
    };
    Duration::from_secs(minutes as u64 * 60)
}

// ── Attachments ─────────────────────────────────────────────────────

/// `[attachments]` section: where oversized attachments go.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentConfig {
    pub max_size_mb: Option<f64>,
    pub directory: Option<PathBuf>,
    pub url_prefix: Option<String>,
}

impl AttachmentConfig {
    pub fn validate(&self) -> Result<AttachmentPolicy, ConfigError> {
        let max_size_mb = self
            .max_size_mb
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::CaseInvalidLargeAttachmentSize))?;
        if !max_size_mb.is_finite() || max_size_mb < 0.0 {
            return Err(ConfigError::with_context(
                ConfigErrorCode::CaseInvalidLargeAttachmentSize,
                format!("max_size_mb = {max_size_mb}"),
            ));
        }

        let directory = self
            .directory
            .clone()
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::CaseMissingLargeAttachmentDir))?;
        probe_writable(&directory)?;

        let url_prefix = non_empty(&self.url_prefix)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::CaseMissingLargeAttachmentUrl))?;

        Ok(AttachmentPolicy {
            max_size: Some((max_size_mb * 1024.0 * 1024.0) as u64),
            url_prefix,
            directory: Some(directory),
        })
    }
}

/// Create the directory if needed and make sure we can write into it.
fn probe_writable(directory: &Path) -> Result<(), ConfigError> {
    let invalid = |e: std::io::Error| {
        ConfigError::with_context(
            ConfigErrorCode::CaseInvalidLargeAttachmentDir,
            format!("{}: {e}", directory.display()),
        )
    };
    std::fs::create_dir_all(directory).map_err(invalid)?;
    let probe = directory.join(PROBE_FILE);
    std::fs::write(&probe, b"probe").map_err(invalid)?;
    std::fs::remove_file(&probe).map_err(invalid)?;
    Ok(())
}

// ── Notification ────────────────────────────────────────────────────

/// `[notify]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Key into the notifier registry.
    #[serde(default = "default_notify_service")]
    pub service: String,
    pub host: Option<String>,
    #[serde(default = "default_notify_port")]
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

fn default_notify_service() -> String {
    "smtp".to_string()
}

fn default_notify_port() -> u16 {
    25
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            service: default_notify_service(),
            host: None,
            port: default_notify_port(),
            user: None,
            password: None,
            from: None,
            to: None,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// When set, logs also roll daily into this directory.
    pub directory: Option<PathBuf>,
}

// ── Mail accounts ───────────────────────────────────────────────────

/// One `[[accounts]]` entry as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountConfig {
    pub url: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub interval_minutes: Option<toml::Value>,
    pub timeout_minutes: Option<toml::Value>,
    pub inbox: Option<String>,
    pub readbox: Option<String>,
    pub errorbox: Option<String>,
}

/// A validated mail account, ready to be polled.
#[derive(Debug, Clone)]
pub struct MailAccount {
    pub server: String,
    /// 0 selects the protocol's default port.
    pub port: u16,
    pub protocol: Protocol,
    pub username: String,
    pub password: SecretString,
    pub interval: Duration,
    pub timeout: Duration,
    pub inbox: String,
    pub readbox: Option<String>,
    pub errorbox: Option<String>,
}

impl AccountConfig {
    pub fn validate(&self) -> Result<MailAccount, ConfigError> {
        let server = non_empty(&self.url)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::MailUrlNotFound))?;

        let protocol = non_empty(&self.protocol)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::MailProtocolNotFound))?;
        let protocol: Protocol = protocol.parse().map_err(|_| {
            ConfigError::with_context(ConfigErrorCode::MailProtocolNotValid, protocol.clone())
        })?;

        let username = non_empty(&self.username)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::MailUserNotFound))?;

        let inbox = non_empty(&self.inbox)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::MailInboxNotFound))?;
        let errorbox = non_empty(&self.errorbox)
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::MailErrorboxNotFound))?;

        let interval = parse_minutes(
            self.interval_minutes.as_ref(),
            DEFAULT_POLL_INTERVAL_MINUTES,
            ConfigErrorCode::MailIntervalNotValid,
        )?;
        let timeout = parse_minutes(
            self.timeout_minutes.as_ref(),
            DEFAULT_POLL_TIMEOUT_MINUTES,
            ConfigErrorCode::MailTimeoutNotValid,
        )?;

        Ok(MailAccount {
            server,
            port: self.port.unwrap_or(0),
            protocol,
            username,
            password: SecretString::from(self.password.clone().unwrap_or_default()),
            interval,
            timeout,
            inbox,
            readbox: non_empty(&self.readbox),
            errorbox: Some(errorbox),
        })
    }
}

impl MailAccount {
    /// Key under which the account's service is registered with the agent.
    pub fn registry_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.server, self.port, self.username, self.inbox
        )
    }

    /// Key the admission throttle counts cycles under.
    pub fn admission_key(&self) -> String {
        format!("{}:{}", self.server, self.username)
    }

    pub fn credentials(&self) -> MailCredentials {
        MailCredentials {
            server: self.server.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Parse a positive whole number of minutes from an integer or a string.
fn parse_minutes(
    value: Option<&toml::Value>,
    default: i64,
    code: ConfigErrorCode,
) -> Result<Duration, ConfigError> {
    let minutes = match value {
        None => default,
        Some(toml::Value::Integer(m)) => *m,
        Some(toml::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::with_context(code, s.clone()))?,
        Some(other) => return Err(ConfigError::with_context(code, other.to_string())),
    };
    if minutes < 1 {
        return Err(ConfigError::with_context(code, minutes.to_string()));
    }
    Ok(Duration::from_secs(minutes as u64 * 60))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
