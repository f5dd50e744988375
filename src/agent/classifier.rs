//! Failure taxonomy: what to tell the operator and whether to stop.

use super::registry::ShutdownReason;
use crate::error::{ConfigError, ConfigErrorCode, Error, ServiceError, SessionError};
use crate::notify::{
    SUBJECT_CASE_CONNECT, SUBJECT_MAIL_AUTH, SUBJECT_PROCESSING, SUBJECT_UNKNOWN, Severity,
};

/// Decision derived from one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub notifiable: bool,
    pub fatal: bool,
    pub subject: String,
    /// Set exactly when `fatal` is.
    pub shutdown_reason: Option<ShutdownReason>,
    pub invalidate_session: bool,
}

impl Classification {
    fn new(notifiable: bool, fatal: bool, subject: impl Into<String>) -> Self {
        Self {
            notifiable,
            fatal,
            subject: subject.into(),
            shutdown_reason: fatal.then_some(ShutdownReason::NotConfigured),
            invalidate_session: false,
        }
    }

    fn because(mut self, reason: ShutdownReason) -> Self {
        if self.fatal {
            self.shutdown_reason = Some(reason);
        }
        self
    }

    fn invalidating(mut self) -> Self {
        self.invalidate_session = true;
        self
    }

    pub fn severity(&self) -> Severity {
        match (self.fatal, self.notifiable) {
            (true, _) => Severity::Error,
            (false, true) => Severity::Warning,
            (false, false) => Severity::Info,
        }
    }
}

/// Classify `error`. Unrecognized transport failures stop the agent only
/// when `shutdown_on_transport_error` is set.
pub fn classify(error: &Error, shutdown_on_transport_error: bool) -> Classification {
    match error {
        Error::Config(e) => config(e),

        Error::Transport(e) if e.is_auth() => {
            Classification::new(true, true, SUBJECT_MAIL_AUTH)
        }
        Error::Transport(_) => {
            Classification::new(true, shutdown_on_transport_error, SUBJECT_PROCESSING)
                .because(ShutdownReason::MessagingError)
        }

        Error::Parse(_) => Classification::new(false, false, SUBJECT_PROCESSING),

        Error::Session(SessionError::ConnectionFailed { .. }) => {
            Classification::new(true, false, SUBJECT_CASE_CONNECT).invalidating()
        }
        Error::Session(SessionError::LoginRejected(_))
        | Error::Service(ServiceError::LoginRejected(_)) => {
            config(&ConfigError::new(ConfigErrorCode::CaseAuthenticationError))
        }

        Error::Service(ServiceError::Connection(_)) => {
            Classification::new(true, false, SUBJECT_CASE_CONNECT).invalidating()
        }
        Error::Service(ServiceError::Timeout(_)) => {
            config(&ConfigError::new(ConfigErrorCode::CaseHttpTimeout))
        }
        Error::Service(ServiceError::Fault(_) | ServiceError::Unexpected(_)) => {
            Classification::new(true, false, SUBJECT_UNKNOWN).invalidating()
        }

        Error::ResourceExhausted { .. } => {
            config(&ConfigError::new(ConfigErrorCode::AgentOutOfMemory))
        }
        Error::ResultMismatch { .. } => Classification::new(true, false, SUBJECT_UNKNOWN),

        Error::Notify(_) | Error::Storage(_) => {
            Classification::new(false, false, SUBJECT_PROCESSING)
        }
    }
}

fn config(e: &ConfigError) -> Classification {
    let reason = match e.code {
        ConfigErrorCode::CaseNotEnabled => ShutdownReason::NotEnabled,
        _ => ShutdownReason::NotConfigured,
    };
    Classification::new(e.is_notifiable(), e.is_fatal(), e.subject()).because(reason)
}
