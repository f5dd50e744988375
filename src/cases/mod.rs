//! Case service client: wire model, RPC trait, HTTP implementation and
//! session management.

pub mod http;
pub mod model;
pub mod service;
pub mod session;

pub use http::HttpCaseService;
pub use model::{CaseRecord, RecordAttachment, RecordError, SubmissionResult};
pub use service::{CaseConnection, CaseService};
pub use session::{SessionManager, SessionSettings};
