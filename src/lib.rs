//! mail2case: polls mailboxes and turns every message into a case.

pub mod agent;
pub mod cases;
pub mod config;
pub mod error;
pub mod mail;
pub mod notify;
pub mod pipeline;
pub mod storage;

pub use error::{Error, Result};
