//! Authenticated session lifecycle for the case service.
//!
//! The manager keeps at most one live connection. It logs in lazily, again
//! once the re-login deadline passes, and retries failed logins a bounded
//! number of times with a linearly growing pause.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::service::{CaseConnection, CaseService};
use crate::config::{CaseServiceSettings, DEFAULT_LOGIN_REFRESH_MINUTES};
use crate::error::{ServiceError, SessionError};

/// Login attempts before giving up.
pub const LOGIN_ATTEMPTS: u32 = 3;

/// Pause unit between login attempts in production.
pub const RETRY_BASE: Duration = Duration::from_secs(60);

/// Timing knobs for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub refresh: Duration,
    pub timeout: Duration,
    pub retry_base: Duration,
}

impl SessionSettings {
    pub fn from_settings(settings: &CaseServiceSettings) -> Self {
        Self {
            refresh: settings.login_refresh(),
            timeout: settings.service_timeout(),
            retry_base: RETRY_BASE,
        }
    }
}

struct Session {
    connection: CaseConnection,
    next_login: DateTime<Utc>,
}

/// Owns the connection to the case service for one mail client.
pub struct SessionManager {
    service: Arc<dyn CaseService>,
    settings: SessionSettings,
    session: Option<Session>,
    backoff: u32,
}

impl SessionManager {
    pub fn new(service: Arc<dyn CaseService>, settings: SessionSettings) -> Self {
        Self {
            service,
            settings,
            session: None,
            backoff: 0,
        }
    }

    pub fn service(&self) -> &Arc<dyn CaseService> {
        &self.service
    }

    /// A usable connection, logging in first when there is none or the
    /// re-login deadline has passed.
    pub async fn acquire(&mut self) -> Result<CaseConnection, SessionError> {
        if let Some(session) = &self.session {
            if Utc::now() < session.next_login {
                return Ok(session.connection.clone());
            }
            debug!("Case service session due for refresh");
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.service.login(self.settings.timeout).await {
                Ok(connection) => {
                    let refresh = TimeDelta::from_std(self.settings.refresh)
                        .unwrap_or_else(|_| TimeDelta::minutes(DEFAULT_LOGIN_REFRESH_MINUTES));
                    self.session = Some(Session {
                        connection: connection.clone(),
                        next_login: Utc::now() + refresh,
                    });
                    self.backoff = 0;
                    info!(endpoint = %connection.endpoint, attempt, "Logged in to case service");
                    return Ok(connection);
                }
                Err(ServiceError::LoginRejected(reason)) => {
                    self.invalidate();
                    return Err(SessionError::LoginRejected(reason));
                }
                Err(e) if attempt >= LOGIN_ATTEMPTS => {
                    self.invalidate();
                    return Err(SessionError::ConnectionFailed {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    self.backoff = attempt;
                    let pause = self.settings.retry_base * attempt;
                    warn!(attempt, error = %e, pause_secs = pause.as_secs(), "Case service login failed, retrying");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    /// Drop the session so the next `acquire` logs in from scratch.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!("Case service session invalidated");
        }
        self.backoff = 0;
    }

    pub fn relogin_deadline(&self) -> Option<DateTime<Utc>> {
        self.session.as_ref().map(|s| s.next_login)
    }

    /// Failed login attempts since the last success or invalidation.
    pub fn backoff(&self) -> u32 {
        self.backoff
    }
}
