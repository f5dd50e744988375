//! JSON-over-HTTP case service client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{CaseRecord, SubmissionResult, SubmitRequest};
use super::service::{CaseConnection, CaseService};
use crate::error::{FaultCode, RemoteFault, ServiceError};

/// Client name reported at login.
const CLIENT_NAME: &str = concat!("mail2case/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    client: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    session_id: String,
    server_url: String,
}

/// Error body the service sends with a non-2xx status.
#[derive(Deserialize)]
struct FaultBody {
    fault_code: String,
    #[serde(default)]
    message: String,
}

/// [`CaseService`] backed by the case service's HTTP API.
pub struct HttpCaseService {
    http: reqwest::Client,
    login_url: String,
    username: String,
    password: SecretString,
}

impl HttpCaseService {
    pub fn new(login_url: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            login_url: login_url.into(),
            username: username.into(),
            password,
        }
    }

    fn submit_url(connection: &CaseConnection) -> String {
        format!("{}/cases/email", connection.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl CaseService for HttpCaseService {
    async fn login(&self, timeout: Duration) -> Result<CaseConnection, ServiceError> {
        debug!(url = %self.login_url, user = %self.username, "Logging in to case service");

        let response = self
            .http
            .post(&self.login_url)
            .timeout(timeout)
            .json(&LoginRequest {
                username: &self.username,
                password: self.password.expose_secret(),
                client: CLIENT_NAME,
            })
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ServiceError::LoginRejected(body));
            }
            if let Some(fault) = parse_fault(&body) {
                return Err(ServiceError::LoginRejected(fault.to_string()));
            }
            return Err(ServiceError::Unexpected(format!("HTTP {status}: {body}")));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("failed to parse login response: {e}")))?;

        Ok(CaseConnection {
            session_id: SecretString::from(login.session_id),
            endpoint: login.server_url,
            timeout,
        })
    }

    async fn submit_batch(
        &self,
        connection: &CaseConnection,
        records: &[CaseRecord],
    ) -> Result<Vec<SubmissionResult>, ServiceError> {
        debug!(records = records.len(), "Submitting cases");

        let response = self
            .http
            .post(Self::submit_url(connection))
            .timeout(connection.timeout)
            .bearer_auth(connection.session_id.expose_secret())
            .json(&SubmitRequest {
                records,
                use_default_assignment_rule: true,
            })
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match parse_fault(&body) {
                Some(fault) => ServiceError::Fault(fault),
                None => ServiceError::Unexpected(format!("HTTP {status}: {body}")),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("failed to parse submit response: {e}")))
    }

    async fn submit_one(
        &self,
        connection: &CaseConnection,
        record: &CaseRecord,
    ) -> Result<SubmissionResult, ServiceError> {
        self.submit_batch(connection, std::slice::from_ref(record))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Unexpected("empty submit response".into()))
    }
}

fn parse_fault(body: &str) -> Option<RemoteFault> {
    let fault: FaultBody = serde_json::from_str(body).ok()?;
    Some(RemoteFault {
        code: FaultCode::parse(&fault.fault_code),
        message: fault.message,
    })
}

fn request_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout(e.to_string())
    } else if e.is_decode() {
        ServiceError::Unexpected(e.to_string())
    } else {
        ServiceError::Connection(e.to_string())
    }
}
