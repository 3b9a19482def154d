//! Receiver-side report transaction (HRP side).
//!
//! Downloads the referenced report from the sending DIC, stores it under the
//! sender's report identifier, and acknowledges with a receipt message. An
//! ingestion failure still produces a receipt: the recorded `receive-error`
//! is relayed back remapped to the sender-facing `receipt-error`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use reportex_config::ReportConfig;
use reportex_core::error::{ExchangeError, Result};
use reportex_core::fhir::{Bundle, Identifier, Reference, Task, TaskStatus};
use reportex_core::reference::ReportReference;
use reportex_core::status::{ReportStatus, StatusCode};
use reportex_notifications::MailService;
use reportex_store::retry::{RetryPolicy, with_retry};
use reportex_store::traits::{FhirStoreProvider, OrganizationDirectory, TaskMessenger};

use crate::codec::StatusCodec;
use crate::constants::{
    CODESYSTEM_REPORT, CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE,
    NAMINGSYSTEM_ORGANIZATION_IDENTIFIER, NAMINGSYSTEM_REPORT_IDENTIFIER, ORGANIZATION_ROLE_DIC,
    PROCESS_NAME_REPORT_RECEIVE,
};
use crate::target::Target;

/// Static settings of the receiver side.
#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    pub local_organization: String,
    pub consortium_identifier: String,
    pub retry: RetryPolicy,
}

impl ReceiveSettings {
    pub fn from_config(config: &ReportConfig) -> Self {
        Self {
            local_organization: config.organization.identifier.clone(),
            consortium_identifier: config.target.consortium_identifier.clone(),
            retry: RetryPolicy::new(
                config.retry.attempts,
                Duration::from_secs(config.retry.interval_secs),
            ),
        }
    }
}

/// Collaborator handles the receiver drives.
pub struct ReceiveCollaborators {
    pub stores: Arc<dyn FhirStoreProvider>,
    pub directory: Arc<dyn OrganizationDirectory>,
    pub messenger: Arc<dyn TaskMessenger>,
    pub mail: Arc<dyn MailService>,
}

/// Protocol position of a receive transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveState {
    Initiated,
    TargetSelected,
    Downloaded,
    Inserted,
    ReceiptSent,
    Closed,
    Failed(StatusCode),
}

/// One receiver-side report transaction.
pub struct ReceiveTransaction {
    settings: ReceiveSettings,
    collaborators: ReceiveCollaborators,
    task: Task,
    state: ReceiveState,
    target: Option<Target>,
    report: Option<Bundle>,
    stored_reference: Option<ReportReference>,
    receive_error: Option<String>,
}

impl ReceiveTransaction {
    /// Begin a transaction for the task message received from a DIC.
    pub fn new(settings: ReceiveSettings, collaborators: ReceiveCollaborators, task: Task) -> Self {
        Self {
            settings,
            collaborators,
            task,
            state: ReceiveState::Initiated,
            target: None,
            report: None,
            stored_reference: None,
            receive_error: None,
        }
    }

    pub fn state(&self) -> &ReceiveState {
        &self.state
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn stored_reference(&self) -> Option<&ReportReference> {
        self.stored_reference.as_ref()
    }

    /// Drive the whole receive leg. Step failures are recorded on the task
    /// and, when a target is known, still acknowledged with an error
    /// receipt; the returned status is the transaction's final word.
    pub async fn run(&mut self) -> ReportStatus {
        let outcome = async {
            self.select_target().await?;
            self.download_report().await?;
            self.insert_report().await
        }
        .await;

        if let Err(error) = &outcome {
            warn!(task_id = %self.task.id, error = %error, "Receive leg failed");
        }

        if self.target.is_some() {
            if let Err(error) = self.send_receipt().await {
                warn!(task_id = %self.task.id, error = %error, "Could not send receipt");
            }
        }

        self.close().await
    }

    /// Resolve the sending DIC's endpoint from the task's requester.
    pub async fn select_target(&mut self) -> Result<()> {
        self.require(&ReceiveState::Initiated)?;

        let result = self.resolve_target().await;
        match result {
            Ok(target) => {
                info!(
                    task_id = %self.task.id,
                    dic = %target.organization_identifier,
                    "Selected target DIC"
                );
                self.target = Some(target);
                self.state = ReceiveState::TargetSelected;
                Ok(())
            }
            Err(error) => {
                self.fail(format!("Select target - {error}")).await;
                Err(error)
            }
        }
    }

    async fn resolve_target(&self) -> Result<Target> {
        let organization = self
            .task
            .requester_identifier()
            .ok_or_else(|| {
                ExchangeError::protocol(format!(
                    "Task with id '{}' carries no requester identifier",
                    self.task.id
                ))
            })?
            .to_string();

        let endpoint = self
            .collaborators
            .directory
            .endpoint(
                &self.settings.consortium_identifier,
                &organization,
                ORGANIZATION_ROLE_DIC,
            )
            .await
            .map_err(|e| ExchangeError::configuration(e.to_string()))?
            .ok_or_else(|| {
                ExchangeError::configuration(format!(
                    "Could not find default endpoint of organization '{organization}'"
                ))
            })?;

        Ok(Target::new(organization, endpoint.identifier, endpoint.address))
    }

    /// Versioned read of the report referenced on the task.
    pub async fn download_report(&mut self) -> Result<()> {
        self.require(&ReceiveState::TargetSelected)?;

        match self.fetch_report().await {
            Ok(report) => {
                self.report = Some(report);
                self.state = ReceiveState::Downloaded;
                Ok(())
            }
            Err(error) => {
                warn!(task_id = %self.task.id, error = %error, "Downloading report failed");
                self.fail(format!("Download report - {error}")).await;
                Err(error)
            }
        }
    }

    async fn fetch_report(&self) -> Result<Bundle> {
        let references: Vec<&str> = self
            .task
            .inputs(
                CODESYSTEM_REPORT,
                CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE,
            )
            .filter_map(|parameter| parameter.value.as_reference())
            .filter_map(|reference| reference.reference.as_deref())
            .collect();

        if references.is_empty() {
            return Err(ExchangeError::protocol(format!(
                "No report reference present in Task with id '{}'",
                self.task.id
            )));
        }
        if references.len() > 1 {
            warn!(
                count = references.len(),
                task_id = %self.task.id,
                "Found more than one report reference, using only the first"
            );
        }

        let reference: ReportReference = references[0].parse()?;
        info!(report = %reference, task_id = %self.task.id, "Downloading report");

        let store = self
            .collaborators
            .stores
            .remote(&reference.base_url)
            .ok_or_else(|| {
                ExchangeError::not_reachable(format!(
                    "No client for endpoint '{}'",
                    reference.base_url
                ))
            })?;

        let report = with_retry(self.settings.retry, "download-report", || {
            store.read_bundle(&reference.id, reference.version.as_deref())
        })
        .await
        .map_err(|e| ExchangeError::not_reachable(e.to_string()))?;

        Ok(report)
    }

    /// Store the report under the sender's report identifier. Idempotent:
    /// re-receiving the same report updates the stored copy in place.
    pub async fn insert_report(&mut self) -> Result<()> {
        self.require(&ReceiveState::Downloaded)?;
        let Some(report) = self.report.clone() else {
            return Err(ExchangeError::protocol("No downloaded report"));
        };
        let Some(sending_organization) = self.task.requester_identifier().map(str::to_string)
        else {
            return Err(ExchangeError::protocol("Task carries no requester identifier"));
        };

        let mut local_copy = report;
        local_copy.id = None;
        if let Some(meta) = &mut local_copy.meta {
            meta.version_id = None;
        }
        let identifier =
            Identifier::new(NAMINGSYSTEM_REPORT_IDENTIFIER, &sending_organization);
        local_copy.identifier = Some(identifier.clone());

        let local = self.collaborators.stores.local();
        let stored = with_retry(self.settings.retry, "insert-report", || {
            local.update_bundle_by_identifier(&local_copy, &identifier)
        })
        .await;

        match stored {
            Ok(reference) => {
                info!(
                    report = %reference,
                    organization = %sending_organization,
                    task_id = %self.task.id,
                    "Stored report"
                );
                self.task
                    .add_output(StatusCodec::encode(&ReportStatus::new(StatusCode::ReceiveOk)));
                self.stored_reference = Some(reference.clone());
                self.persist_task().await;
                self.notify_stored(&sending_organization, &reference).await;
                self.state = ReceiveState::Inserted;
                Ok(())
            }
            Err(error) => {
                warn!(
                    organization = %sending_organization,
                    task_id = %self.task.id,
                    error = %error,
                    "Storing report failed"
                );
                self.fail("Insert report failed".to_string()).await;
                Err(ExchangeError::storage(error.to_string()))
            }
        }
    }

    /// Acknowledge towards the DIC: a fresh `receipt-ok`, or the recorded
    /// receive statuses relayed with `receive-error` remapped to
    /// `receipt-error`.
    pub async fn send_receipt(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ReceiveState::Inserted | ReceiveState::Failed(_)
        ) {
            return Err(ExchangeError::protocol(format!(
                "Transaction for task '{}' is in state {:?}, receipt not due",
                self.task.id, self.state
            )));
        }
        let Some(target) = self.target.clone() else {
            return Err(ExchangeError::protocol("No target DIC resolved"));
        };

        let inputs = if self.receive_error.is_some() {
            StatusCodec::transform_output_to_input(&self.task, true)
        } else {
            vec![StatusCodec::encode(&ReportStatus::new(StatusCode::ReceiptOk))]
        };

        let mut receipt = Task::new(Uuid::new_v4().to_string()).with_requester(
            Reference::logical(Identifier::new(
                NAMINGSYSTEM_ORGANIZATION_IDENTIFIER,
                &self.settings.local_organization,
            )),
        );
        for input in inputs {
            receipt.add_input(input);
        }

        with_retry(self.settings.retry, "send-receipt", || {
            self.collaborators
                .messenger
                .send_task(&target.endpoint_address, &receipt)
        })
        .await
        .map_err(|e| ExchangeError::not_reachable(e.to_string()))?;

        info!(
            dic = %target.organization_identifier,
            task_id = %self.task.id,
            "Sent receipt"
        );
        if self.state == ReceiveState::Inserted {
            self.state = ReceiveState::ReceiptSent;
        }
        Ok(())
    }

    /// Final bookkeeping: persist the task, notify the operator on failure,
    /// and report the transaction's final status.
    pub async fn close(&mut self) -> ReportStatus {
        if self.task.status == TaskStatus::Failed {
            self.notify_failed().await;
            self.persist_task().await;
        }

        let status = StatusCodec::decode_all(&self.task.output)
            .into_iter()
            .next_back()
            .unwrap_or_else(|| {
                ReportStatus::with_detail(StatusCode::ReceiveError, "No status recorded")
            });

        if !matches!(self.state, ReceiveState::Failed(_)) {
            self.state = ReceiveState::Closed;
        }
        status
    }

    fn require(&self, expected: &ReceiveState) -> Result<()> {
        if &self.state != expected {
            return Err(ExchangeError::protocol(format!(
                "Transaction for task '{}' is in state {:?}, expected {expected:?}",
                self.task.id, self.state
            )));
        }
        Ok(())
    }

    /// Record a `receive-error` with the given detail and move to the
    /// failure track.
    async fn fail(&mut self, detail: String) {
        let status = ReportStatus::with_detail(StatusCode::ReceiveError, detail.clone());
        self.task.add_output(StatusCodec::encode(&status));
        self.task.status = TaskStatus::Failed;
        self.receive_error = Some(detail);
        self.persist_task().await;
        self.state = ReceiveState::Failed(StatusCode::ReceiveError);
    }

    async fn persist_task(&self) {
        let local = self.collaborators.stores.local();
        let task = self.task.clone();
        let persisted = with_retry(self.settings.retry, "update-task", || {
            local.update_task(&task)
        })
        .await;
        if let Err(error) = persisted {
            warn!(task_id = %self.task.id, error = %error, "Could not persist task state");
        }
    }

    async fn notify_stored(&self, sending_organization: &str, reference: &ReportReference) {
        let subject = format!("New report stored in process '{PROCESS_NAME_REPORT_RECEIVE}'");
        let body = format!(
            "A new report has been stored in process '{PROCESS_NAME_REPORT_RECEIVE}' from \
             organization '{sending_organization}' and can be accessed using the following \
             link:\n- {reference}"
        );
        if let Err(error) = self.collaborators.mail.send(&subject, &body).await {
            warn!(task_id = %self.task.id, error = %error, "Could not send notification");
        }
    }

    async fn notify_failed(&self) {
        let organization = self.task.requester_identifier().unwrap_or("unknown");
        let reference = self
            .stored_reference
            .as_ref()
            .map(ReportReference::absolute)
            .unwrap_or_else(|| "none".to_string());
        let error = self.receive_error.as_deref().unwrap_or("none");

        let subject = format!("Error in process '{PROCESS_NAME_REPORT_RECEIVE}'");
        let body = format!(
            "Could not download or insert new report with reference '{reference}' in process \
             '{PROCESS_NAME_REPORT_RECEIVE}' from organization '{organization}' in Task with id \
             '{}':\n- status code: {}\n- error: {error}",
            self.task.id,
            StatusCode::ReceiveError
        );
        if let Err(error) = self.collaborators.mail.send(&subject, &body).await {
            warn!(task_id = %self.task.id, error = %error, "Could not send notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = reportex_config::ReportConfig::from_toml(
            r#"
                [organization]
                identifier = "Test_HRP"
                endpoint_identifier = "Test_HRP_Endpoint"
                endpoint_address = "https://hrp.example.com/fhir"

                [target]
                consortium_identifier = "Consortium"
            "#,
        )
        .unwrap();

        let settings = ReceiveSettings::from_config(&config);
        assert_eq!(settings.local_organization, "Test_HRP");
        assert_eq!(settings.consortium_identifier, "Consortium");
        assert_eq!(settings.retry.attempts, 6);
    }
}
