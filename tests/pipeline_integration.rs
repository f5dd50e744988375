//! Batch submission against in-memory mailbox and case service stubs.
//!
//! Each test parses real RFC 822 text into batches, submits them through
//! `BatchSubmitter`, and checks what happened to the mailbox.

mod common;

use std::sync::Arc;

use mail2case::agent::{AgentRegistry, ShutdownReason};
use mail2case::cases::SubmissionResult;
use mail2case::error::{ConfigErrorCode, Error, FaultCode, RemoteFault, ServiceError};
use mail2case::mail::{AttachmentPolicy, MessageHandle};
use mail2case::pipeline::{BatchSubmitter, MailboxFolders, make_batches};

use common::*;

fn folders() -> MailboxFolders {
    MailboxFolders {
        inbox: inbox(),
        readbox: Some(folder("Processed")),
        errorbox: Some(folder("Errors")),
    }
}

struct Fixture {
    mailbox: SharedMailbox,
    store: MemoryStore,
    service: Arc<StubCaseService>,
    attachments: Arc<MemoryAttachments>,
    registry: Arc<AgentRegistry>,
    submitter: BatchSubmitter,
}

impl Fixture {
    fn new(messages: Vec<MessageHandle>) -> Self {
        Self::with_ceiling(messages, None)
    }

    fn with_ceiling(messages: Vec<MessageHandle>, ceiling: Option<u64>) -> Self {
        let mailbox = mailbox(messages);
        let attachments = MemoryAttachments::new();
        let registry = Arc::new(AgentRegistry::new());
        let submitter = BatchSubmitter::new(attachments.clone(), registry.clone(), ceiling);
        Self {
            store: MemoryStore {
                state: mailbox.clone(),
            },
            mailbox,
            service: StubCaseService::new(),
            attachments,
            registry,
            submitter,
        }
    }

    /// Batch everything in the mailbox and submit batch by batch, stopping
    /// at the first failure.
    async fn run(&mut self, policy: &AttachmentPolicy) -> mail2case::Result<Vec<u32>> {
        let messages = self.mailbox.lock().unwrap().messages.clone();
        let mut session = session(&self.service);
        let mut processed = Vec::new();
        for batch in make_batches(messages, policy) {
            processed.extend(
                self.submitter
                    .submit(&mut self.store, &folders(), &mut session, batch)
                    .await?,
            );
        }
        Ok(processed)
    }

    fn untouched(&self) -> bool {
        let state = self.mailbox.lock().unwrap();
        state.copies.is_empty() && state.deleted.is_empty()
    }
}

#[tokio::test]
async fn mixed_results_are_filed_by_outcome() {
    let mut fx = Fixture::new(handles(&["printer jam", "refund", "login help"]));
    fx.service.script_batch(Ok(vec![
        SubmissionResult::created("5001"),
        SubmissionResult::failed("INVALID_FIELD", "Subject too long"),
        SubmissionResult::created("5003"),
    ]));

    let processed = fx.run(&AttachmentPolicy::unlimited()).await.unwrap();

    assert_eq!(processed, vec![1, 2, 3]);
    let state = fx.mailbox.lock().unwrap();
    assert_eq!(state.copied_to("Processed"), vec![1, 3]);
    assert_eq!(state.copied_to("Errors"), vec![2]);
    assert_eq!(state.deleted, vec![1, 2, 3]);
    assert_eq!(fx.service.logins(), 1);
}

#[tokio::test]
async fn seven_messages_go_out_as_five_and_two() {
    let subjects = ["a", "b", "c", "d", "e", "f", "g"];
    let mut fx = Fixture::new(handles(&subjects));

    let processed = fx.run(&AttachmentPolicy::unlimited()).await.unwrap();

    assert_eq!(processed, vec![1, 2, 3, 4, 5, 6, 7]);
    let batches = fx.service.batch_subjects();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], vec!["a", "b", "c", "d", "e"]);
    assert_eq!(batches[1], vec!["f", "g"]);
    // One login serves both batches.
    assert_eq!(fx.service.logins(), 1);
    assert_eq!(
        fx.mailbox.lock().unwrap().copied_to("Processed"),
        vec![1, 2, 3, 4, 5, 6, 7]
    );
}

#[tokio::test]
async fn feature_disabled_latches_shutdown_and_leaves_mail() {
    let mut fx = Fixture::new(handles(&["one", "two"]));
    fx.service
        .script_batch(Err(ServiceError::Fault(RemoteFault {
            code: FaultCode::FeatureDisabled,
            message: "Email to case is not enabled".into(),
        })));

    let err = fx.run(&AttachmentPolicy::unlimited()).await.unwrap_err();

    match err {
        Error::Config(e) => assert_eq!(e.code, ConfigErrorCode::CaseNotEnabled),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        fx.registry.shutdown_state().map(|s| s.reason),
        Some(ShutdownReason::NotEnabled)
    );
    assert!(fx.untouched());
}

#[tokio::test]
async fn invalid_routing_is_a_configuration_error_without_shutdown() {
    let mut fx = Fixture::new(handles(&["one"]));
    fx.service
        .script_batch(Err(ServiceError::Fault(RemoteFault {
            code: FaultCode::InvalidRouting,
            message: "No routing address".into(),
        })));

    let err = fx.run(&AttachmentPolicy::unlimited()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Config(ref e) if e.code == ConfigErrorCode::CaseRoutingAddressError
    ));
    assert!(!fx.registry.is_shutdown());
    assert!(fx.untouched());
}

#[tokio::test]
async fn fallback_quarantines_first_single_failure_and_reraises() {
    let mut fx = Fixture::new(handles(&["first", "second", "third"]));
    fx.service
        .script_batch(Err(ServiceError::Unexpected("HTTP 500: boom".into())));
    fx.service.script_single(Ok(SubmissionResult::created("6001")));
    fx.service
        .script_single(Err(ServiceError::Unexpected("HTTP 500: still boom".into())));

    let err = fx.run(&AttachmentPolicy::unlimited()).await.unwrap_err();

    // The batch-level error comes back, not the single-record one.
    match err {
        Error::Service(ServiceError::Unexpected(reason)) => assert_eq!(reason, "HTTP 500: boom"),
        other => panic!("unexpected error: {other}"),
    }
    // The loop stops at the first failing record.
    assert_eq!(fx.service.single_subjects(), vec!["first", "second"]);

    let state = fx.mailbox.lock().unwrap();
    assert_eq!(state.copied_to("Errors"), vec![2]);
    assert_eq!(state.deleted, vec![2]);
    // Records that succeeded on their own stay in the inbox.
    assert!(state.copied_to("Processed").is_empty());
}

#[tokio::test]
async fn other_faults_also_fall_back_to_single_submission() {
    let mut fx = Fixture::new(handles(&["first", "second"]));
    fx.service
        .script_batch(Err(ServiceError::Fault(RemoteFault {
            code: FaultCode::Other("STORAGE_LIMIT_EXCEEDED".into()),
            message: "full".into(),
        })));

    let err = fx.run(&AttachmentPolicy::unlimited()).await.unwrap_err();

    assert!(matches!(err, Error::Service(ServiceError::Fault(_))));
    assert_eq!(fx.service.single_subjects(), vec!["first", "second"]);
    assert!(fx.untouched());
}

#[tokio::test]
async fn timeout_maps_to_configuration_error() {
    let mut fx = Fixture::new(handles(&["slow"]));
    fx.service
        .script_batch(Err(ServiceError::Timeout("operation timed out".into())));

    let err = fx.run(&AttachmentPolicy::unlimited()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Config(ref e) if e.code == ConfigErrorCode::CaseHttpTimeout
    ));
    assert!(fx.untouched());
}

#[tokio::test]
async fn result_count_mismatch_leaves_mail_alone() {
    let mut fx = Fixture::new(handles(&["one", "two"]));
    fx.service
        .script_batch(Ok(vec![SubmissionResult::created("5001")]));

    let err = fx.run(&AttachmentPolicy::unlimited()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::ResultMismatch {
            expected: 2,
            actual: 1
        }
    ));
    assert!(fx.untouched());
}

#[tokio::test]
async fn unreadable_messages_are_quarantined_before_submission() {
    let mut messages = handles(&["one", "two", "three"]);
    messages[1].body = None;
    let mut fx = Fixture::new(messages);

    let processed = fx.run(&AttachmentPolicy::unlimited()).await.unwrap();

    assert_eq!(processed, vec![2, 1, 3]);
    assert_eq!(fx.service.batch_subjects(), vec![vec!["one", "three"]]);
    let state = fx.mailbox.lock().unwrap();
    assert_eq!(state.copied_to("Errors"), vec![2]);
    assert_eq!(state.copied_to("Processed"), vec![1, 3]);
    assert_eq!(state.deleted, vec![2, 1, 3]);
}

#[tokio::test]
async fn batch_above_memory_ceiling_is_not_sent() {
    let mut fx = Fixture::with_ceiling(handles(&["one", "two"]), Some(16));

    let err = fx.run(&AttachmentPolicy::unlimited()).await.unwrap_err();

    match err {
        Error::ResourceExhausted {
            batch_bytes,
            ceiling_bytes,
        } => {
            assert!(batch_bytes > 16);
            assert_eq!(ceiling_bytes, 16);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.service.logins(), 0);
    assert!(fx.service.batch_subjects().is_empty());
    assert!(fx.untouched());
}

#[tokio::test]
async fn oversized_attachments_are_stored_for_created_cases() {
    let raw = concat!(
        "From: Alice Example <alice@example.com>\r\n",
        "Subject: site photos\r\n",
        "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
        "\r\n",
        "--b\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "See attached.\r\n",
        "--b\r\n",
        "Content-Type: image/png\r\n",
        "Content-Disposition: attachment; filename=\"photo.png\"\r\n",
        "\r\n",
        "0123456789abcdef0123456789abcdef\r\n",
        "--b--\r\n",
    );
    let messages = vec![MessageHandle {
        id: 1,
        body: Some(raw.as_bytes().to_vec()),
    }];
    let policy = AttachmentPolicy {
        max_size: Some(8),
        url_prefix: "https://files.example.com/large/".into(),
        directory: None,
    };
    let mut fx = Fixture::new(messages);

    fx.run(&policy).await.unwrap();

    let paths = fx.attachments.paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].ends_with("_photo.png"), "path: {}", paths[0]);
}

#[tokio::test]
async fn failed_cases_do_not_store_attachments() {
    let raw = concat!(
        "Subject: rejected photos\r\n",
        "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
        "\r\n",
        "--b\r\n",
        "Content-Type: image/png\r\n",
        "Content-Disposition: attachment; filename=\"photo.png\"\r\n",
        "\r\n",
        "0123456789abcdef0123456789abcdef\r\n",
        "--b--\r\n",
    );
    let messages = vec![MessageHandle {
        id: 1,
        body: Some(raw.as_bytes().to_vec()),
    }];
    let policy = AttachmentPolicy {
        max_size: Some(8),
        url_prefix: "https://files.example.com/large/".into(),
        directory: None,
    };
    let mut fx = Fixture::new(messages);
    fx.service
        .script_batch(Ok(vec![SubmissionResult::failed("INVALID_FIELD", "bad")]));

    fx.run(&policy).await.unwrap();

    assert!(fx.attachments.paths().is_empty());
    assert_eq!(fx.mailbox.lock().unwrap().copied_to("Errors"), vec![1]);
}
