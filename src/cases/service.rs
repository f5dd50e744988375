//! Case creation RPC seam.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use super::model::{CaseRecord, SubmissionResult};
use crate::error::ServiceError;

/// An authenticated connection to the case service.
#[derive(Debug, Clone)]
pub struct CaseConnection {
    pub session_id: SecretString,
    /// Base URL requests are sent to after login.
    pub endpoint: String,
    pub timeout: Duration,
}

/// Remote case-creation service.
#[async_trait]
pub trait CaseService: Send + Sync {
    /// Authenticate and open a connection whose requests time out after `timeout`.
    async fn login(&self, timeout: Duration) -> Result<CaseConnection, ServiceError>;

    /// Create one case per record. Results are aligned with `records`.
    async fn submit_batch(
        &self,
        connection: &CaseConnection,
        records: &[CaseRecord],
    ) -> Result<Vec<SubmissionResult>, ServiceError>;

    async fn submit_one(
        &self,
        connection: &CaseConnection,
        record: &CaseRecord,
    ) -> Result<SubmissionResult, ServiceError>;
}
