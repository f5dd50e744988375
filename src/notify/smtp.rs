//! SMTP notifier via lettre.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::debug;

use super::{Notification, Notifier};
use crate::config::NotifyConfig;
use crate::error::{ConfigError, ConfigErrorCode, NotifyError};

/// Sends notifications by mail, either through an open relay or with
/// STARTTLS and credentials.
pub struct SmtpNotifier {
    name: &'static str,
    transport: SmtpTransport,
    from: String,
    to: String,
}

impl SmtpNotifier {
    /// Unauthenticated relay on `host:port`.
    pub fn relay(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, ConfigError> {
        let host = required_host(config)?;
        let transport = SmtpTransport::builder_dangerous(host)
            .port(config.port)
            .build();
        Ok(Arc::new(Self::with_transport("smtp", config, transport)?))
    }

    /// STARTTLS relay with the configured user and password.
    pub fn authenticated(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, ConfigError> {
        let host = required_host(config)?;
        let user = config
            .user
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::new(ConfigErrorCode::NotificationUserNotFound))?;
        let creds = Credentials::new(user, config.password.clone().unwrap_or_default());

        let transport = SmtpTransport::starttls_relay(host)
            .map_err(|e| {
                ConfigError::with_context(
                    ConfigErrorCode::NotificationHostNotFound,
                    format!("SMTP relay error: {e}"),
                )
            })?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Arc::new(Self::with_transport("smtp-auth", config, transport)?))
    }

    fn with_transport(
        name: &'static str,
        config: &NotifyConfig,
        transport: SmtpTransport,
    ) -> Result<Self, ConfigError> {
        let to = config
            .to
            .clone()
            .or_else(|| config.user.clone().filter(|u| u.contains('@')))
            .ok_or_else(|| {
                ConfigError::with_context(ConfigErrorCode::NotificationUserNotFound, "Recipient")
            })?;
        let from = config.from.clone().unwrap_or_else(|| to.clone());
        Ok(Self {
            name,
            transport,
            from,
            to,
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let address = |raw: &str| -> Result<Mailbox, NotifyError> {
            raw.parse().map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
                address: raw.to_string(),
                reason: e.to_string(),
            })
        };

        Message::builder()
            .from(address(&self.from)?)
            .to(address(&self.to)?)
            .subject(notification.subject.clone())
            .body(notification.body.clone())
            .map_err(|e| NotifyError::SendFailed {
                service: self.name.to_string(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

fn required_host(config: &NotifyConfig) -> Result<&str, ConfigError> {
    config
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::new(ConfigErrorCode::NotificationHostNotFound))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = self.build_message(notification)?;
        let transport = self.transport.clone();
        let service = self.name;

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| NotifyError::SendFailed {
                service: service.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| NotifyError::SendFailed {
                service: service.to_string(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        debug!(to = %self.to, subject = %notification.subject, "Notification mailed");
        Ok(())
    }
}
