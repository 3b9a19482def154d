//! End-to-end scenarios of the receiver-side transaction against in-memory
//! collaborators.

use std::sync::Arc;

use serde_json::json;

use reportex_core::fhir::{
    Bundle, BundleEntry, BundleResponse, BundleType, Identifier, ParameterValue, Reference, Task,
    TaskParameter, TaskStatus,
};
use reportex_core::status::StatusCode;
use reportex_notifications::MemoryMailbox;
use reportex_protocol::codec::StatusCodec;
use reportex_protocol::constants::{
    CODESYSTEM_REPORT, CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE,
    NAMINGSYSTEM_ORGANIZATION_IDENTIFIER, NAMINGSYSTEM_REPORT_IDENTIFIER,
};
use reportex_protocol::receive::{
    ReceiveCollaborators, ReceiveSettings, ReceiveState, ReceiveTransaction,
};
use reportex_store::memory::{
    InMemoryStore, RecordingMessenger, StaticDirectory, StaticStoreProvider,
};
use reportex_store::retry::RetryPolicy;
use reportex_store::traits::FhirStore;

const DIC_URL: &str = "https://dic.example.com/fhir";
const HRP_URL: &str = "https://hrp.example.com/fhir";

struct Fixture {
    dic_store: Arc<InMemoryStore>,
    hrp_store: Arc<InMemoryStore>,
    messenger: Arc<RecordingMessenger>,
    mailbox: Arc<MemoryMailbox>,
}

fn settings() -> ReceiveSettings {
    ReceiveSettings {
        local_organization: "Test_HRP".to_string(),
        consortium_identifier: "Consortium".to_string(),
        retry: RetryPolicy::once(),
    }
}

fn fixture() -> Fixture {
    Fixture {
        dic_store: Arc::new(InMemoryStore::new(DIC_URL)),
        hrp_store: Arc::new(InMemoryStore::new(HRP_URL)),
        messenger: Arc::new(RecordingMessenger::new()),
        mailbox: Arc::new(MemoryMailbox::new()),
    }
}

fn make_collaborators(fixture: &Fixture) -> ReceiveCollaborators {
    let directory = Arc::new(StaticDirectory::new().with_entry(
        "Consortium",
        "DIC",
        "Test_DIC1",
        "Test_DIC1_Endpoint",
        DIC_URL,
    ));
    let stores = Arc::new(
        StaticStoreProvider::new(fixture.hrp_store.clone())
            .with_remote(DIC_URL, fixture.dic_store.clone()),
    );
    ReceiveCollaborators {
        stores,
        directory,
        messenger: fixture.messenger.clone(),
        mail: fixture.mailbox.clone(),
    }
}

fn report_bundle() -> Bundle {
    let mut report = Bundle::new(BundleType::BatchResponse);
    report.add_entry(BundleEntry {
        resource: Some(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 42,
            "link": [{"relation": "self", "url": "Observation?_summary=count"}]
        })),
        request: None,
        response: Some(BundleResponse {
            status: "200".to_string(),
            outcome: None,
        }),
    });
    report
}

/// Seed the DIC store with a report and return its absolute reference.
async fn seed_report(fixture: &Fixture) -> String {
    let reference = fixture
        .dic_store
        .update_bundle_by_identifier(
            &report_bundle(),
            &Identifier::new(NAMINGSYSTEM_REPORT_IDENTIFIER, "Test_DIC1"),
        )
        .await
        .unwrap();
    reference.absolute()
}

fn receive_task(reference: Option<&str>) -> Task {
    let mut task = Task::new("receive-task-1").with_requester(Reference::logical(
        Identifier::new(NAMINGSYSTEM_ORGANIZATION_IDENTIFIER, "Test_DIC1"),
    ));
    if let Some(reference) = reference {
        task.add_input(TaskParameter::new(
            CODESYSTEM_REPORT,
            CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE,
            ParameterValue::Reference(Reference {
                reference: Some(reference.to_string()),
                resource_type: Some("Bundle".to_string()),
                identifier: None,
            }),
        ));
    }
    task
}

#[tokio::test]
async fn report_is_downloaded_stored_and_acknowledged() {
    let fixture = fixture();
    let reference = seed_report(&fixture).await;

    let mut transaction = ReceiveTransaction::new(
        settings(),
        make_collaborators(&fixture),
        receive_task(Some(&reference)),
    );
    let status = transaction.run().await;

    assert_eq!(status.code, StatusCode::ReceiveOk);
    assert_eq!(transaction.state(), &ReceiveState::Closed);

    // Stored under the sending organization's report identifier
    assert_eq!(fixture.hrp_store.bundle_count().await, 1);
    let stored_reference = transaction.stored_reference().unwrap();
    assert_eq!(stored_reference.base_url, HRP_URL);

    // Receipt went back to the DIC with receipt-ok
    let sent = fixture.messenger.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, DIC_URL);
    let receipt_statuses = StatusCodec::decode_all(&sent[0].1.input);
    assert_eq!(receipt_statuses.len(), 1);
    assert_eq!(receipt_statuses[0].code, StatusCode::ReceiptOk);

    // Operator learned about the stored report
    let mails = fixture.mailbox.mails().await;
    assert!(mails[0].subject.contains("New report stored"));
    assert!(mails[0].body.contains("Test_DIC1"));
}

#[tokio::test]
async fn re_receiving_the_same_report_updates_in_place() {
    let fixture = fixture();
    let reference = seed_report(&fixture).await;

    let mut first = ReceiveTransaction::new(
        settings(),
        make_collaborators(&fixture),
        receive_task(Some(&reference)),
    );
    assert_eq!(first.run().await.code, StatusCode::ReceiveOk);
    let first_id = first.stored_reference().unwrap().id.clone();

    let mut second = ReceiveTransaction::new(
        settings(),
        make_collaborators(&fixture),
        receive_task(Some(&reference)),
    );
    assert_eq!(second.run().await.code, StatusCode::ReceiveOk);

    assert_eq!(fixture.hrp_store.bundle_count().await, 1);
    assert_eq!(fixture.hrp_store.version_count(&first_id).await, 2);
    assert_eq!(
        second.stored_reference().unwrap().version.as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn insert_failure_is_acknowledged_as_receipt_error() {
    let fixture = fixture();
    let reference = seed_report(&fixture).await;
    fixture.hrp_store.fail_updates("backend down").await;

    let mut transaction = ReceiveTransaction::new(
        settings(),
        make_collaborators(&fixture),
        receive_task(Some(&reference)),
    );
    let status = transaction.run().await;

    assert_eq!(status.code, StatusCode::ReceiveError);
    assert_eq!(status.error_detail.as_deref(), Some("Insert report failed"));
    assert_eq!(
        transaction.state(),
        &ReceiveState::Failed(StatusCode::ReceiveError)
    );

    // The receipt relays the failure remapped into the sender-facing space
    let sent = fixture.messenger.sent().await;
    assert_eq!(sent.len(), 1);
    let receipt_statuses = StatusCodec::decode_all(&sent[0].1.input);
    assert_eq!(receipt_statuses[0].code, StatusCode::ReceiptError);
    assert_eq!(
        receipt_statuses[0].error_detail.as_deref(),
        Some("Insert report failed")
    );

    // Task record failed and the operator was notified with the detail
    let persisted = fixture.hrp_store.task("receive-task-1").await.unwrap();
    assert_eq!(persisted.status, TaskStatus::Failed);
    let mails = fixture.mailbox.mails().await;
    assert!(mails.last().unwrap().subject.contains("Error in process"));
    assert!(mails.last().unwrap().body.contains("Insert report failed"));
}

#[tokio::test]
async fn missing_reference_is_acknowledged_as_receipt_error() {
    let fixture = fixture();

    let mut transaction = ReceiveTransaction::new(
        settings(),
        make_collaborators(&fixture),
        receive_task(None),
    );
    let status = transaction.run().await;

    assert_eq!(status.code, StatusCode::ReceiveError);
    assert!(status.error_detail.as_deref().unwrap().contains("Download report"));

    let sent = fixture.messenger.sent().await;
    assert_eq!(sent.len(), 1);
    let receipt_statuses = StatusCodec::decode_all(&sent[0].1.input);
    assert_eq!(receipt_statuses[0].code, StatusCode::ReceiptError);
}

#[tokio::test]
async fn unknown_report_reference_fails_receive() {
    let fixture = fixture();
    let reference = format!("{DIC_URL}/Bundle/no-such-report/_history/1");

    let mut transaction = ReceiveTransaction::new(
        settings(),
        make_collaborators(&fixture),
        receive_task(Some(&reference)),
    );
    let status = transaction.run().await;

    assert_eq!(status.code, StatusCode::ReceiveError);
    assert!(status.error_detail.as_deref().unwrap().contains("Download report"));
}

#[tokio::test]
async fn missing_requester_cannot_be_acknowledged() {
    let fixture = fixture();
    let reference = seed_report(&fixture).await;

    let mut task = receive_task(Some(&reference));
    task.requester = None;

    let mut transaction =
        ReceiveTransaction::new(settings(), make_collaborators(&fixture), task);
    let status = transaction.run().await;

    assert_eq!(status.code, StatusCode::ReceiveError);
    // No target was resolved, so no receipt could go out
    assert!(fixture.messenger.sent().await.is_empty());
    // But the failure is still recorded and reported
    let mails = fixture.mailbox.mails().await;
    assert!(mails.last().unwrap().subject.contains("Error in process"));
}

#[tokio::test]
async fn versioned_reference_reads_the_pinned_version() {
    let fixture = fixture();
    // Store two versions; reference version 1 explicitly
    let identifier = Identifier::new(NAMINGSYSTEM_REPORT_IDENTIFIER, "Test_DIC1");
    let v1 = fixture
        .dic_store
        .update_bundle_by_identifier(&report_bundle(), &identifier)
        .await
        .unwrap();
    let mut updated = report_bundle();
    updated.total = Some(1);
    fixture
        .dic_store
        .update_bundle_by_identifier(&updated, &identifier)
        .await
        .unwrap();

    let mut transaction = ReceiveTransaction::new(
        settings(),
        make_collaborators(&fixture),
        receive_task(Some(&v1.absolute())),
    );
    let status = transaction.run().await;

    assert_eq!(status.code, StatusCode::ReceiveOk);
    let stored = fixture
        .hrp_store
        .read_bundle(&transaction.stored_reference().unwrap().id, None)
        .await
        .unwrap();
    // Version 1 had no top-level total
    assert_eq!(stored.total, None);
}
