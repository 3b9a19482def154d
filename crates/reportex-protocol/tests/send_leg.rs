//! End-to-end scenarios of the sender-side transaction against in-memory
//! collaborators.

use std::sync::Arc;

use serde_json::json;

use reportex_core::fhir::{
    Bundle, BundleEntry, BundleRequest, BundleType, Identifier, ParameterValue, Reference, Task,
    TaskParameter, TaskStatus,
};
use reportex_core::status::{ReportStatus, StatusCode};
use reportex_notifications::MemoryMailbox;
use reportex_policy::PolicyVersion;
use reportex_protocol::codec::StatusCodec;
use reportex_protocol::constants::{
    CODESYSTEM_REPORT, CODESYSTEM_REPORT_VALUE_HRP_IDENTIFIER,
    CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE, NAMINGSYSTEM_ORGANIZATION_IDENTIFIER,
};
use reportex_protocol::execute::ExecutionMode;
use reportex_protocol::send::{SendCollaborators, SendSettings, SendState, SendTransaction};
use reportex_store::memory::{
    InMemoryStore, RecordingMessenger, ScriptedClinicalStore, StaticDirectory, StaticStoreProvider,
};
use reportex_store::retry::RetryPolicy;
use reportex_store::traits::FhirStore;

const DIC_URL: &str = "https://dic.example.com/fhir";
const HRP_URL: &str = "https://hrp.example.com/fhir";
const QUERY: &str = "Observation?code=http://loinc.org|&date=eq2023&_summary=count";

struct Fixture {
    dic_store: Arc<InMemoryStore>,
    hrp_store: Arc<InMemoryStore>,
    clinical: Arc<ScriptedClinicalStore>,
    messenger: Arc<RecordingMessenger>,
    mailbox: Arc<MemoryMailbox>,
}

fn settings() -> SendSettings {
    SendSettings {
        local_organization: "Test_DIC1".to_string(),
        local_endpoint_identifier: "Test_DIC1_Endpoint".to_string(),
        local_endpoint_address: DIC_URL.to_string(),
        consortium_identifier: "Consortium".to_string(),
        default_hrp_identifier: None,
        process_version: "1.1".to_string(),
        policy_version: PolicyVersion::V1_1,
        execution_mode: ExecutionMode::Lenient,
        retry: RetryPolicy::once(),
    }
}

fn fixture() -> (Fixture, SendCollaborators) {
    let fixture = Fixture {
        dic_store: Arc::new(InMemoryStore::new(DIC_URL)),
        hrp_store: Arc::new(InMemoryStore::new(HRP_URL)),
        clinical: Arc::new(ScriptedClinicalStore::new("https://cds.example.com/fhir")),
        messenger: Arc::new(RecordingMessenger::new()),
        mailbox: Arc::new(MemoryMailbox::new()),
    };
    let collaborators = make_collaborators(&fixture);
    (fixture, collaborators)
}

fn make_collaborators(fixture: &Fixture) -> SendCollaborators {
    let directory = Arc::new(StaticDirectory::new().with_entry(
        "Consortium",
        "HRP",
        "Test_HRP",
        "Test_HRP_Endpoint",
        HRP_URL,
    ));
    let stores = Arc::new(
        StaticStoreProvider::new(fixture.dic_store.clone())
            .with_remote(HRP_URL, fixture.hrp_store.clone()),
    );
    SendCollaborators {
        stores,
        clinical: fixture.clinical.clone(),
        directory,
        messenger: fixture.messenger.clone(),
        mail: fixture.mailbox.clone(),
    }
}

fn search_bundle(urls: &[&str]) -> Bundle {
    let mut bundle = Bundle::new(BundleType::Batch).with_identifier(Identifier::new(
        CODESYSTEM_REPORT,
        "search-bundle1.1",
    ));
    for url in urls {
        bundle.add_entry(BundleEntry::request(BundleRequest::get(*url)));
    }
    bundle
}

async fn seed_valid_exchange(fixture: &Fixture) {
    fixture.hrp_store.put_bundle(search_bundle(&[QUERY])).await;
    fixture
        .clinical
        .respond(
            QUERY,
            json!({"resourceType": "Bundle", "type": "searchset", "total": 42}),
        )
        .await;
}

fn start_task() -> Task {
    Task::new("start-task-1")
}

#[tokio::test]
async fn valid_bundle_is_executed_stored_and_sent() {
    let (fixture, collaborators) = fixture();
    seed_valid_exchange(&fixture).await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    transaction.run_to_sent().await.unwrap();

    assert_eq!(transaction.state(), &SendState::Sent);
    assert_eq!(
        transaction.target().unwrap().organization_identifier,
        "Test_HRP"
    );

    // Report stored locally, payload reduced to counts
    assert_eq!(fixture.dic_store.bundle_count().await, 1);
    let reference = transaction.report_reference().unwrap().clone();
    let stored = fixture
        .dic_store
        .read_bundle(&reference.id, None)
        .await
        .unwrap();
    let stub = stored.entry[0].resource.as_ref().unwrap();
    assert_eq!(stub["total"], 42);
    assert!(stub.get("entry").is_none());

    // Message carries the absolute versioned reference
    let sent = fixture.messenger.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, HRP_URL);
    let reference_input = sent[0]
        .1
        .first_input(
            CODESYSTEM_REPORT,
            CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE,
        )
        .unwrap();
    match &reference_input.value {
        ParameterValue::Reference(r) => {
            assert_eq!(r.reference.as_deref(), Some(reference.absolute().as_str()));
        }
        other => panic!("expected reference input, got {other:?}"),
    }
}

#[tokio::test]
async fn receipt_ok_closes_the_transaction() {
    let (fixture, collaborators) = fixture();
    seed_valid_exchange(&fixture).await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    transaction.run_to_sent().await.unwrap();

    let mut acknowledgement = Task::new("ack-task-1");
    acknowledgement.add_input(StatusCodec::encode(&ReportStatus::new(StatusCode::ReceiptOk)));

    let status = transaction.record_receipt(&acknowledgement).await.unwrap();
    assert_eq!(status.code, StatusCode::ReceiptOk);
    assert_eq!(transaction.state(), &SendState::Closed);

    let persisted = fixture.dic_store.task("start-task-1").await.unwrap();
    assert_eq!(
        StatusCodec::decode_all(&persisted.output)[0].code,
        StatusCode::ReceiptOk
    );
    assert_ne!(persisted.status, TaskStatus::Failed);

    let mails = fixture.mailbox.mails().await;
    assert!(mails.last().unwrap().subject.contains("New successful report"));
}

#[tokio::test]
async fn acknowledgement_on_same_task_closes_receipt_missing() {
    let (fixture, collaborators) = fixture();
    seed_valid_exchange(&fixture).await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    transaction.run_to_sent().await.unwrap();

    // No distinct receipt message was produced; the acknowledging task is
    // the initiating task itself.
    let same_task = transaction.task().clone();
    let status = transaction.record_receipt(&same_task).await.unwrap();

    assert_eq!(status.code, StatusCode::ReceiptMissing);
    assert_eq!(
        transaction.state(),
        &SendState::Failed(StatusCode::ReceiptMissing)
    );

    let persisted = fixture.dic_store.task("start-task-1").await.unwrap();
    assert_eq!(persisted.status, TaskStatus::Failed);
    assert!(
        StatusCodec::decode_all(&persisted.output)
            .iter()
            .any(|s| s.code == StatusCode::ReceiptMissing)
    );

    let mails = fixture.mailbox.mails().await;
    assert!(mails.last().unwrap().subject.contains("Error in process"));
}

#[tokio::test]
async fn receipt_error_is_adopted_verbatim() {
    let (fixture, collaborators) = fixture();
    seed_valid_exchange(&fixture).await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    transaction.run_to_sent().await.unwrap();

    let mut acknowledgement = Task::new("ack-task-2");
    acknowledgement.add_input(StatusCodec::encode(&ReportStatus::with_detail(
        StatusCode::ReceiptError,
        "Insert report failed",
    )));

    let status = transaction.record_receipt(&acknowledgement).await.unwrap();
    assert_eq!(status.code, StatusCode::ReceiptError);
    assert_eq!(status.error_detail.as_deref(), Some("Insert report failed"));
    assert_eq!(
        transaction.state(),
        &SendState::Failed(StatusCode::ReceiptError)
    );

    let mails = fixture.mailbox.mails().await;
    assert!(mails.last().unwrap().body.contains("Insert report failed"));
}

#[tokio::test]
async fn forbidden_download_fails_not_allowed() {
    let (fixture, collaborators) = fixture();
    seed_valid_exchange(&fixture).await;
    fixture.hrp_store.fail_searches_forbidden("403").await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    let error = transaction.run_to_sent().await.unwrap_err();
    assert!(error.to_string().contains("Not allowed"));
    assert_eq!(
        transaction.state(),
        &SendState::Failed(StatusCode::NotAllowed)
    );

    let persisted = fixture.dic_store.task("start-task-1").await.unwrap();
    let statuses = StatusCodec::decode_all(&persisted.output);
    assert_eq!(statuses[0].code, StatusCode::NotAllowed);
    assert_eq!(
        statuses[0].error_detail.as_deref(),
        Some("Download search bundle failed")
    );
}

#[tokio::test]
async fn unreachable_download_fails_not_reachable() {
    let (fixture, collaborators) = fixture();
    seed_valid_exchange(&fixture).await;
    fixture
        .hrp_store
        .fail_searches_unreachable("connection refused")
        .await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    transaction.run_to_sent().await.unwrap_err();
    assert_eq!(
        transaction.state(),
        &SendState::Failed(StatusCode::NotReachable)
    );
}

#[tokio::test]
async fn policy_rejection_is_terminal_with_reason() {
    let (fixture, collaborators) = fixture();
    // Two _summary parameters on the same entry
    fixture
        .hrp_store
        .put_bundle(search_bundle(&["Patient?_summary=count&_summary=count"]))
        .await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    let error = transaction.run_to_sent().await.unwrap_err();
    assert!(error.to_string().contains("more than one _summary parameter"));
    assert_eq!(
        transaction.state(),
        &SendState::Failed(StatusCode::NotAllowed)
    );

    // The rejection reason is recorded verbatim as the status detail
    let persisted = fixture.dic_store.task("start-task-1").await.unwrap();
    let statuses = StatusCodec::decode_all(&persisted.output);
    assert!(
        statuses[0]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("more than one _summary parameter")
    );
}

#[tokio::test]
async fn missing_search_bundle_is_a_protocol_violation() {
    let (_fixture, collaborators) = fixture();
    // HRP store is empty: the searchset reports zero matches

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    let error = transaction.run_to_sent().await.unwrap_err();
    assert!(error.to_string().contains("Expected exactly one search bundle"));
    assert_eq!(
        transaction.state(),
        &SendState::Failed(StatusCode::NotReachable)
    );
}

#[tokio::test]
async fn repeat_transactions_update_the_stored_report_in_place() {
    let (fixture, collaborators) = fixture();
    seed_valid_exchange(&fixture).await;

    let mut first = SendTransaction::new(settings(), collaborators, start_task());
    first.run_to_sent().await.unwrap();
    let first_reference = first.report_reference().unwrap().clone();

    // Second cycle against the same stores
    let mut second =
        SendTransaction::new(settings(), make_collaborators(&fixture), Task::new("start-task-2"));
    second.run_to_sent().await.unwrap();
    let second_reference = second.report_reference().unwrap().clone();

    assert_eq!(first_reference.id, second_reference.id);
    assert_eq!(fixture.dic_store.bundle_count().await, 1);
    assert_eq!(fixture.dic_store.version_count(&first_reference.id).await, 2);
    assert_eq!(second_reference.version.as_deref(), Some("2"));
}

#[tokio::test]
async fn strict_mode_fails_when_every_query_errors() {
    let (fixture, collaborators) = fixture();
    fixture.hrp_store.put_bundle(search_bundle(&[QUERY])).await;
    fixture.clinical.fail(QUERY, "store down").await;

    let mut settings = settings();
    settings.execution_mode = ExecutionMode::Strict;

    let mut transaction = SendTransaction::new(settings, collaborators, start_task());
    let error = transaction.run_to_sent().await.unwrap_err();
    assert!(error.to_string().contains("only contains error status codes"));
}

#[tokio::test]
async fn lenient_mode_sends_partial_results() {
    let (fixture, collaborators) = fixture();
    fixture.hrp_store.put_bundle(search_bundle(&[QUERY])).await;
    fixture.clinical.fail(QUERY, "store down").await;

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    transaction.run_to_sent().await.unwrap();

    assert_eq!(transaction.state(), &SendState::Sent);
    let reference = transaction.report_reference().unwrap().clone();
    let stored = fixture
        .dic_store
        .read_bundle(&reference.id, None)
        .await
        .unwrap();
    assert_eq!(stored.entry[0].response.as_ref().unwrap().status, "500");
}

#[tokio::test]
async fn explicit_task_input_overrides_configured_default() {
    let (fixture, _) = fixture();
    seed_valid_exchange(&fixture).await;

    // Directory knows two HRPs; the task pins the second one explicitly.
    let second_hrp_store = Arc::new(InMemoryStore::new("https://hrp2.example.com/fhir"));
    second_hrp_store.put_bundle(search_bundle(&[QUERY])).await;
    let directory = Arc::new(
        StaticDirectory::new()
            .with_entry("Consortium", "HRP", "Test_HRP", "Test_HRP_Endpoint", HRP_URL)
            .with_entry(
                "Consortium",
                "HRP",
                "Test_HRP2",
                "Test_HRP2_Endpoint",
                "https://hrp2.example.com/fhir",
            ),
    );
    let stores = Arc::new(
        StaticStoreProvider::new(fixture.dic_store.clone())
            .with_remote(HRP_URL, fixture.hrp_store.clone())
            .with_remote("https://hrp2.example.com/fhir", second_hrp_store),
    );
    let collaborators = SendCollaborators {
        stores,
        clinical: fixture.clinical.clone(),
        directory,
        messenger: fixture.messenger.clone(),
        mail: fixture.mailbox.clone(),
    };

    let mut task = start_task();
    task.add_input(TaskParameter::new(
        CODESYSTEM_REPORT,
        CODESYSTEM_REPORT_VALUE_HRP_IDENTIFIER,
        ParameterValue::Reference(Reference::logical(Identifier::new(
            NAMINGSYSTEM_ORGANIZATION_IDENTIFIER,
            "Test_HRP2",
        ))),
    ));

    let mut settings = settings();
    settings.default_hrp_identifier = Some("Test_HRP".to_string());

    let mut transaction = SendTransaction::new(settings, collaborators, task);
    transaction.select_target().await.unwrap();
    assert_eq!(
        transaction.target().unwrap().organization_identifier,
        "Test_HRP2"
    );
}

#[tokio::test]
async fn directory_lookup_takes_the_first_match() {
    let (fixture, _) = fixture();
    seed_valid_exchange(&fixture).await;

    let directory = Arc::new(
        StaticDirectory::new()
            .with_entry("Consortium", "HRP", "Test_HRP", "Test_HRP_Endpoint", HRP_URL)
            .with_entry(
                "Consortium",
                "HRP",
                "Test_HRP2",
                "Test_HRP2_Endpoint",
                "https://hrp2.example.com/fhir",
            ),
    );
    let stores = Arc::new(
        StaticStoreProvider::new(fixture.dic_store.clone())
            .with_remote(HRP_URL, fixture.hrp_store.clone()),
    );
    let collaborators = SendCollaborators {
        stores,
        clinical: fixture.clinical.clone(),
        directory,
        messenger: fixture.messenger.clone(),
        mail: fixture.mailbox.clone(),
    };

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    transaction.select_target().await.unwrap();
    assert_eq!(
        transaction.target().unwrap().organization_identifier,
        "Test_HRP"
    );
}

#[tokio::test]
async fn unresolvable_target_is_a_configuration_failure() {
    let (fixture, _) = fixture();
    let directory = Arc::new(StaticDirectory::new());
    let stores = Arc::new(StaticStoreProvider::new(fixture.dic_store.clone()));
    let collaborators = SendCollaborators {
        stores,
        clinical: fixture.clinical.clone(),
        directory,
        messenger: fixture.messenger.clone(),
        mail: fixture.mailbox.clone(),
    };

    let mut transaction = SendTransaction::new(settings(), collaborators, start_task());
    let error = transaction.select_target().await.unwrap_err();
    assert!(!error.is_retryable());
    assert!(error.to_string().contains("Could not find any organization"));
    assert_eq!(
        transaction.state(),
        &SendState::Failed(StatusCode::NotReachable)
    );
}
