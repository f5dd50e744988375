//! Error types for mail2case.

use std::fmt;

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Case service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Resource exhausted: batch of {batch_bytes} bytes exceeds memory ceiling = {ceiling_bytes} bytes")]
    ResourceExhausted { batch_bytes: u64, ceiling_bytes: u64 },

    #[error("Case service returned {actual} results for a batch of {expected}")]
    ResultMismatch { expected: usize, actual: usize },

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// ── Configuration ───────────────────────────────────────────────────

/// Every configuration problem the agent knows how to report.
///
/// Each code carries an operator-facing message and two flags: whether the
/// problem is worth a notification and whether it stops polling for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigErrorCode {
    MailErrorboxNotValid,
    MailErrorboxNotFound,
    MailInboxNotValid,
    MailInboxNotFound,
    MailReadboxNotValid,
    MailUrlNotFound,
    MailProtocolNotFound,
    MailProtocolNotValid,
    MailUserNotFound,
    MailFolderNotFound,
    MailIntervalNotValid,
    MailTimeoutNotValid,

    CaseCfgFileLoadFailure,
    CaseHttpTimeout,
    CaseAuthenticationError,
    CaseMissingUsername,
    CaseMissingPassword,
    CaseMissingLoginUrl,
    CaseMissingLargeAttachmentDir,
    CaseInvalidLargeAttachmentDir,
    CaseMissingLargeAttachmentUrl,
    CaseInvalidLargeAttachmentSize,
    CaseRoutingAddressError,
    CaseNotEnabled,

    AgentOutOfMemory,

    NotificationHostNotFound,
    NotificationServiceNotValid,
    NotificationUserNotFound,

    UnknownConfigError,
}

impl ConfigErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MailErrorboxNotValid => "MAIL_ERRORBOX_NOT_VALID",
            Self::MailErrorboxNotFound => "MAIL_ERRORBOX_NOT_FOUND",
            Self::MailInboxNotValid => "MAIL_INBOX_NOT_VALID",
            Self::MailInboxNotFound => "MAIL_INBOX_NOT_FOUND",
            Self::MailReadboxNotValid => "MAIL_READBOX_NOT_VALID",
            Self::MailUrlNotFound => "MAIL_URL_NOT_FOUND",
            Self::MailProtocolNotFound => "MAIL_PROTOCOL_NOT_FOUND",
            Self::MailProtocolNotValid => "MAIL_PROTOCOL_NOT_VALID",
            Self::MailUserNotFound => "MAIL_USER_NOT_FOUND",
            Self::MailFolderNotFound => "MAIL_FOLDER_NOT_FOUND",
            Self::MailIntervalNotValid => "MAIL_INTERVAL_NOT_VALID",
            Self::MailTimeoutNotValid => "MAIL_TIMEOUT_NOT_VALID",
            Self::CaseCfgFileLoadFailure => "CASE_CFG_FILE_LOAD_FAILURE",
            Self::CaseHttpTimeout => "CASE_HTTP_TIMEOUT",
            Self::CaseAuthenticationError => "CASE_AUTHENTICATION_ERROR",
            Self::CaseMissingUsername => "CASE_MISSING_USERNAME",
            Self::CaseMissingPassword => "CASE_MISSING_PASSWORD",
            Self::CaseMissingLoginUrl => "CASE_MISSING_LOGIN_URL",
            Self::CaseMissingLargeAttachmentDir => "CASE_MISSING_LARGE_ATTACHMENT_DIR",
            Self::CaseInvalidLargeAttachmentDir => "CASE_INVALID_LARGE_ATTACHMENT_DIR",
            Self::CaseMissingLargeAttachmentUrl => "CASE_MISSING_LARGE_ATTACHMENT_URL",
            Self::CaseInvalidLargeAttachmentSize => "CASE_INVALID_LARGE_ATTACHMENT_SIZE",
            Self::CaseRoutingAddressError => "CASE_ROUTING_ADDRESS_ERROR",
            Self::CaseNotEnabled => "CASE_NOT_ENABLED",
            Self::AgentOutOfMemory => "AGENT_OUT_OF_MEMORY",
            Self::NotificationHostNotFound => "NOTIFICATION_HOST_NOT_FOUND",
            Self::NotificationServiceNotValid => "NOTIFICATION_SERVICE_NOT_VALID",
            Self::NotificationUserNotFound => "NOTIFICATION_USER_NOT_FOUND",
            Self::UnknownConfigError => "UNKNOWN_CONFIG_ERROR",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::MailErrorboxNotValid => "The error folder provided is not valid.",
            Self::MailErrorboxNotFound => {
                "No configuration value has been provided for the error folder."
            }
            Self::MailInboxNotValid => "The Inbox provided is not valid.",
            Self::MailInboxNotFound => "No configuration value has been provided for the Inbox.",
            Self::MailReadboxNotValid => "The processed folder provided is not valid.",
            Self::MailUrlNotFound => {
                "No configuration value has been provided for the mail service url."
            }
            Self::MailProtocolNotFound => {
                "No configuration value has been provided for the mail service protocol."
            }
            Self::MailProtocolNotValid => "The mail protocol provided is not valid.",
            Self::MailUserNotFound => {
                "No configuration value has been provided for the mail service User ID."
            }
            Self::MailFolderNotFound => "A mail folder provided is not valid.",
            Self::MailIntervalNotValid => {
                "The mail polling interval is not valid. It must be an integer greater than or equal to 1."
            }
            Self::MailTimeoutNotValid => {
                "The mail polling timeout is not valid. It must be an integer greater than or equal to 1."
            }
            Self::CaseCfgFileLoadFailure => "Failed to load the agent configuration file.",
            Self::CaseHttpTimeout => {
                "Connection timed out prior to receipt of response, increase timeout increment."
            }
            Self::CaseAuthenticationError => {
                "Invalid or locked out case service user ID or password in configuration."
            }
            Self::CaseMissingUsername => {
                "No configuration value was found for the case service User Id."
            }
            Self::CaseMissingPassword => {
                "No configuration value was found for the case service Password."
            }
            Self::CaseMissingLoginUrl => {
                "No configuration value was found for the case service Login URL."
            }
            Self::CaseMissingLargeAttachmentDir => {
                "No configuration value was found for the large attachment directory."
            }
            Self::CaseInvalidLargeAttachmentDir => "Invalid directory specified for large attachments.",
            Self::CaseMissingLargeAttachmentUrl => {
                "No configuration value was found for the large attachment URL."
            }
            Self::CaseInvalidLargeAttachmentSize => {
                "Invalid maximum size specified for large attachments. It must be a number (size in MB) greater than or equal to 0."
            }
            Self::CaseRoutingAddressError => "Routing addresses are not setup correctly.",
            Self::CaseNotEnabled => "Email-to-case is not enabled for this organization.",
            Self::AgentOutOfMemory => "The agent is configured with too low a memory ceiling.",
            Self::NotificationHostNotFound => {
                "No configuration value has been provided for the notification host."
            }
            Self::NotificationServiceNotValid => "The notification service is invalid.",
            Self::NotificationUserNotFound => {
                "No configuration value has been provided for the notification service userID."
            }
            Self::UnknownConfigError => "Configuration Error.",
        }
    }

    pub fn is_notifiable(&self) -> bool {
        !matches!(
            self,
            Self::NotificationHostNotFound
                | Self::NotificationServiceNotValid
                | Self::NotificationUserNotFound
                | Self::UnknownConfigError
        )
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MailIntervalNotValid | Self::MailTimeoutNotValid => true,
            Self::CaseHttpTimeout => false,
            Self::CaseCfgFileLoadFailure
            | Self::CaseAuthenticationError
            | Self::CaseMissingUsername
            | Self::CaseMissingPassword
            | Self::CaseMissingLoginUrl
            | Self::CaseMissingLargeAttachmentDir
            | Self::CaseInvalidLargeAttachmentDir
            | Self::CaseMissingLargeAttachmentUrl
            | Self::CaseInvalidLargeAttachmentSize
            | Self::CaseRoutingAddressError
            | Self::CaseNotEnabled
            | Self::AgentOutOfMemory => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConfigErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration problem, identified by code with optional context lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.code, .context))]
pub struct ConfigError {
    pub code: ConfigErrorCode,
    pub context: Vec<String>,
}

fn describe(code: &ConfigErrorCode, context: &[String]) -> String {
    let mut msg = code.message().to_string();
    for line in context {
        msg.push_str("\n   ");
        msg.push_str(line);
    }
    msg
}

impl ConfigError {
    pub fn new(code: ConfigErrorCode) -> Self {
        Self {
            code,
            context: Vec::new(),
        }
    }

    pub fn with_context(code: ConfigErrorCode, line: impl Into<String>) -> Self {
        Self {
            code,
            context: vec![line.into()],
        }
    }

    /// Notification subject for this problem.
    pub fn subject(&self) -> String {
        format!("Configuration Problem. Error Code - {}", self.code)
    }

    pub fn is_notifiable(&self) -> bool {
        self.code.is_notifiable()
    }

    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }
}

impl From<ConfigErrorCode> for ConfigError {
    fn from(code: ConfigErrorCode) -> Self {
        Self::new(code)
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Mailbox transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Authentication failed for {user} on {server}: {reason}")]
    Auth {
        server: String,
        user: String,
        reason: String,
    },

    #[error("Mail server {server} unreachable: {reason}")]
    Connect { server: String, reason: String },

    #[error("Mail server rejected {command}: {reason}")]
    Rejected { command: String, reason: String },

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("{protocol} does not support {operation}")]
    Unsupported {
        protocol: &'static str,
        operation: &'static str,
    },

    #[error("Mail connection closed")]
    Closed,

    #[error("Mail task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Message-level parse errors. These quarantine one message only.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Message {0} has no retrievable body")]
    MissingBody(u32),
}

// ── Case service ────────────────────────────────────────────────────

/// Fault codes the case service can raise against a whole request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCode {
    FeatureDisabled,
    InvalidRouting,
    ExpiredPassword,
    Other(String),
}

impl FaultCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "EMAIL_TO_CASE_NOT_ENABLED" => Self::FeatureDisabled,
            "EMAIL_TO_CASE_INVALID_ROUTING" => Self::InvalidRouting,
            "INVALID_OPERATION_WITH_EXPIRED_PASSWORD" => Self::ExpiredPassword,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::FeatureDisabled => "EMAIL_TO_CASE_NOT_ENABLED",
            Self::InvalidRouting => "EMAIL_TO_CASE_INVALID_ROUTING",
            Self::ExpiredPassword => "INVALID_OPERATION_WITH_EXPIRED_PASSWORD",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service-side rejection of a whole request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RemoteFault {
    pub code: FaultCode,
    pub message: String,
}

/// Case service call failures.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Remote fault {0}")]
    Fault(#[from] RemoteFault),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Session manager errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to case service after {attempts} tries: {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("Case service rejected credentials: {0}")]
    LoginRejected(String),
}

// ── Collaborators ───────────────────────────────────────────────────

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notifier {service} failed to send: {reason}")]
    SendFailed { service: String, reason: String },

    #[error("Invalid notification address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Oversized attachment storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing path outside the attachment directory: {0}")]
    InvalidPath(String),
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
