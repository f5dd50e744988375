//! Mail to case pipeline.
//!
//! Every account runs the same cycle on its own poller:
//! 1. `MailClient::receive()`: connect, resolve folders, fetch messages
//! 2. `make_batches()`: parse and group messages five at a time
//! 3. `BatchSubmitter::submit()`: create cases and file each message by outcome
//!
//! A message leaves the inbox only after the case service has answered for it.

pub mod batch;
pub mod client;
pub mod poller;
pub mod submitter;

pub use batch::{BATCH_SIZE, Batch, BatchItem, make_batches, make_batches_at};
pub use client::{ClientContext, MailClient};
pub use poller::spawn_account_poller;
pub use submitter::{BatchSubmitter, MailboxFolders};
