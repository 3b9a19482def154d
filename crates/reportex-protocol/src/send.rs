//! Sender-side report transaction (DIC to HRP).
//!
//! Drives one report from initiation to its final status:
//! `Initiated → TargetSelected → BundleValidated → Executed → Stored → Sent
//! → {ReceiptRecorded | ReceiptMissing} → Closed`, with a failure track from
//! any state. Every exit path records exactly one status on the initiating
//! task and persists it before the error surfaces, so a transaction is never
//! left in an ambiguous state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use reportex_config::ReportConfig;
use reportex_core::error::{ExchangeError, Result};
use reportex_core::fhir::{
    Bundle, Identifier, ParameterValue, Reference, Task, TaskParameter, TaskStatus,
};
use reportex_core::reference::ReportReference;
use reportex_core::status::{ReportStatus, StatusCode};
use reportex_policy::{PolicyVersion, QueryPolicy, SearchBundleValidator};
use reportex_notifications::MailService;
use reportex_store::retry::{RetryPolicy, with_retry};
use reportex_store::traits::{
    ClinicalStore, FhirStoreProvider, OrganizationDirectory, TaskMessenger,
};

use crate::codec::StatusCodec;
use crate::constants::{
    CODESYSTEM_REPORT, CODESYSTEM_REPORT_VALUE_HRP_IDENTIFIER,
    CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE, NAMINGSYSTEM_ORGANIZATION_IDENTIFIER,
    NAMINGSYSTEM_REPORT_IDENTIFIER, ORGANIZATION_ROLE_HRP, PROCESS_NAME_REPORT_SEND,
    search_bundle_identifier_token,
};
use crate::execute::{ExecutionMode, check_report, execute_search_bundle, package_report};
use crate::target::Target;

/// Static settings of the sender side.
#[derive(Debug, Clone)]
pub struct SendSettings {
    pub local_organization: String,
    pub local_endpoint_identifier: String,
    pub local_endpoint_address: String,
    pub consortium_identifier: String,
    pub default_hrp_identifier: Option<String>,
    /// Selects the versioned well-known search bundle at the HRP
    pub process_version: String,
    pub policy_version: PolicyVersion,
    pub execution_mode: ExecutionMode,
    pub retry: RetryPolicy,
}

impl SendSettings {
    pub fn from_config(config: &ReportConfig) -> Result<Self> {
        let policy_version: PolicyVersion = config
            .policy
            .version
            .parse()
            .map_err(ExchangeError::configuration)?;

        Ok(Self {
            local_organization: config.organization.identifier.clone(),
            local_endpoint_identifier: config.organization.endpoint_identifier.clone(),
            local_endpoint_address: config.organization.endpoint_address.clone(),
            consortium_identifier: config.target.consortium_identifier.clone(),
            default_hrp_identifier: config.target.default_hrp_identifier.clone(),
            process_version: config.policy.version.clone(),
            policy_version,
            execution_mode: if config.policy.strict_execution {
                ExecutionMode::Strict
            } else {
                ExecutionMode::Lenient
            },
            retry: RetryPolicy::new(
                config.retry.attempts,
                Duration::from_secs(config.retry.interval_secs),
            ),
        })
    }
}

/// Collaborator handles the sender drives.
pub struct SendCollaborators {
    pub stores: Arc<dyn FhirStoreProvider>,
    pub clinical: Arc<dyn ClinicalStore>,
    pub directory: Arc<dyn OrganizationDirectory>,
    pub messenger: Arc<dyn TaskMessenger>,
    pub mail: Arc<dyn MailService>,
}

/// Protocol position of a send transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendState {
    Initiated,
    TargetSelected,
    BundleValidated,
    Executed,
    Stored,
    Sent,
    ReceiptRecorded,
    ReceiptMissing,
    Closed,
    Failed(StatusCode),
}

/// One sender-side report transaction, single-threaded end to end.
pub struct SendTransaction {
    settings: SendSettings,
    collaborators: SendCollaborators,
    validator: SearchBundleValidator,
    task: Task,
    state: SendState,
    target: Option<Target>,
    search_bundle: Option<Bundle>,
    report: Option<Bundle>,
    report_reference: Option<ReportReference>,
}

impl SendTransaction {
    /// Begin a transaction for the initiating task.
    pub fn new(settings: SendSettings, collaborators: SendCollaborators, task: Task) -> Self {
        let validator = SearchBundleValidator::new(QueryPolicy::new(settings.policy_version));
        Self {
            settings,
            collaborators,
            validator,
            task,
            state: SendState::Initiated,
            target: None,
            search_bundle: None,
            report: None,
            report_reference: None,
        }
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn report_reference(&self) -> Option<&ReportReference> {
        self.report_reference.as_ref()
    }

    /// Drive the forward path up to the sent message. The receipt arrives
    /// asynchronously and is recorded via [`Self::record_receipt`].
    pub async fn run_to_sent(&mut self) -> Result<()> {
        self.select_target().await?;
        self.download_search_bundle().await?;
        self.execute().await?;
        self.store_report().await?;
        self.send_report().await
    }

    /// Resolve the counterpart HRP.
    ///
    /// Precedence: explicit identifier on the initiating task, then the
    /// configured default, then directory lookup by consortium and role
    /// (first match, with a warning when the directory is ambiguous).
    pub async fn select_target(&mut self) -> Result<()> {
        self.require(&SendState::Initiated)?;

        match self.resolve_target().await {
            Ok(target) => {
                info!(
                    task_id = %self.task.id,
                    hrp = %target.organization_identifier,
                    endpoint = %target.endpoint_address,
                    "Selected target HRP"
                );
                self.target = Some(target);
                self.state = SendState::TargetSelected;
                Ok(())
            }
            Err(error) => {
                self.fail(&error, "Select target failed").await;
                Err(error)
            }
        }
    }

    async fn resolve_target(&self) -> Result<Target> {
        let explicit = self
            .task
            .first_input(CODESYSTEM_REPORT, CODESYSTEM_REPORT_VALUE_HRP_IDENTIFIER)
            .and_then(|parameter| match &parameter.value {
                ParameterValue::Reference(reference) => reference
                    .identifier
                    .as_ref()
                    .and_then(|identifier| identifier.value.clone()),
                ParameterValue::String(value) => Some(value.clone()),
                _ => None,
            });

        let organization = match explicit.or_else(|| self.settings.default_hrp_identifier.clone())
        {
            Some(identifier) => identifier,
            None => self.lookup_hrp_organization().await?,
        };

        let endpoint = self
            .collaborators
            .directory
            .endpoint(
                &self.settings.consortium_identifier,
                &organization,
                ORGANIZATION_ROLE_HRP,
            )
            .await
            .map_err(|e| ExchangeError::configuration(e.to_string()))?
            .ok_or_else(|| {
                ExchangeError::configuration(format!(
                    "Could not find endpoint of '{ORGANIZATION_ROLE_HRP}' organization \
                     '{organization}'"
                ))
            })?;

        Ok(Target::new(organization, endpoint.identifier, endpoint.address))
    }

    async fn lookup_hrp_organization(&self) -> Result<String> {
        let hrps = self
            .collaborators
            .directory
            .organizations(&self.settings.consortium_identifier, ORGANIZATION_ROLE_HRP)
            .await
            .map_err(|e| ExchangeError::configuration(e.to_string()))?;

        if hrps.is_empty() {
            return Err(ExchangeError::configuration(format!(
                "Could not find any organization with role '{ORGANIZATION_ROLE_HRP}' and parent \
                 organization '{}'",
                self.settings.consortium_identifier
            )));
        }
        if hrps.len() > 1 {
            warn!(
                count = hrps.len(),
                using = %hrps[0].organization_identifier,
                "Found more than one organization with role 'HRP', using the first"
            );
        }
        Ok(hrps[0].organization_identifier.clone())
    }

    /// Fetch the versioned well-known search bundle from the HRP and check
    /// it against the policy. Exactly one matching bundle must exist.
    pub async fn download_search_bundle(&mut self) -> Result<()> {
        self.require(&SendState::TargetSelected)?;
        let Some(target) = self.target.clone() else {
            return Err(ExchangeError::protocol("No target selected"));
        };
        let token = search_bundle_identifier_token(&self.settings.process_version);

        info!(
            identifier = %token,
            hrp = %target.organization_identifier,
            task_id = %self.task.id,
            "Downloading search bundle"
        );

        match self.fetch_and_validate(&target, &token).await {
            Ok(bundle) => {
                info!(
                    hrp = %target.organization_identifier,
                    task_id = %self.task.id,
                    "Search bundle contains only valid requests"
                );
                self.search_bundle = Some(bundle);
                self.state = SendState::BundleValidated;
                Ok(())
            }
            Err(error) => {
                warn!(
                    identifier = %token,
                    hrp = %target.organization_identifier,
                    task_id = %self.task.id,
                    error = %error,
                    "Error while checking search bundle"
                );
                self.fail(&error, "Download search bundle failed").await;
                Err(error)
            }
        }
    }

    async fn fetch_and_validate(&self, target: &Target, token: &str) -> Result<Bundle> {
        let store = self
            .collaborators
            .stores
            .remote(&target.endpoint_address)
            .ok_or_else(|| {
                ExchangeError::not_reachable(format!(
                    "No client for endpoint '{}'",
                    target.endpoint_address
                ))
            })?;

        let searchset = with_retry(self.settings.retry, "search-bundle-download", || {
            store.search_bundles_by_identifier(token)
        })
        .await
        .map_err(|error| {
            if error.is_forbidden() {
                ExchangeError::not_allowed(error.to_string())
            } else {
                ExchangeError::not_reachable(error.to_string())
            }
        })?;

        let total = searchset.total.unwrap_or(0);
        if total != 1 || searchset.entry.is_empty() {
            return Err(ExchangeError::protocol(format!(
                "Expected exactly one search bundle with identifier '{token}' from HRP '{}' but \
                 found {total}",
                target.organization_identifier
            )));
        }

        let resource = searchset.entry[0]
            .resource
            .as_ref()
            .ok_or_else(|| ExchangeError::protocol("Search result entry carries no resource"))?;
        let bundle: Bundle = serde_json::from_value(resource.clone())
            .map_err(|e| ExchangeError::protocol(format!("Search result is not a bundle: {e}")))?;

        self.validator
            .validate(&bundle)
            .map_err(|rejection| ExchangeError::validation(rejection.reason))?;

        Ok(bundle)
    }

    /// Run every validated query and package the result, counts only.
    pub async fn execute(&mut self) -> Result<()> {
        self.require(&SendState::BundleValidated)?;
        let Some(search_bundle) = self.search_bundle.clone() else {
            return Err(ExchangeError::protocol("No validated search bundle"));
        };

        let response =
            execute_search_bundle(self.collaborators.clinical.as_ref(), &search_bundle).await;
        let report = package_report(
            &search_bundle,
            &response,
            &self.settings.local_organization,
        );

        if self.settings.execution_mode == ExecutionMode::Strict {
            let counterpart = self
                .target
                .as_ref()
                .map(|t| t.organization_identifier.clone())
                .unwrap_or_default();
            if let Err(error) = check_report(&report, &counterpart) {
                self.fail(&error, "Execute search bundle failed").await;
                return Err(error);
            }
        }

        self.report = Some(report);
        self.state = SendState::Executed;
        Ok(())
    }

    /// Persist the packaged report under the organization's report
    /// identifier. A repeat store updates in place, making the whole
    /// transaction safe to re-run.
    pub async fn store_report(&mut self) -> Result<()> {
        self.require(&SendState::Executed)?;
        let Some(report) = self.report.clone() else {
            return Err(ExchangeError::protocol("No packaged report"));
        };

        let identifier = Identifier::new(
            NAMINGSYSTEM_REPORT_IDENTIFIER,
            &self.settings.local_organization,
        );
        let local = self.collaborators.stores.local();

        let stored = with_retry(self.settings.retry, "store-report", || {
            local.update_bundle_by_identifier(&report, &identifier)
        })
        .await
        .map_err(|e| ExchangeError::storage(e.to_string()));

        match stored {
            Ok(reference) => {
                info!(
                    report = %reference,
                    task_id = %self.task.id,
                    "Stored report bundle"
                );
                self.report_reference = Some(reference);
                self.state = SendState::Stored;
                Ok(())
            }
            Err(error) => {
                self.fail(&error, "Store report failed").await;
                Err(error)
            }
        }
    }

    /// Deliver the report reference to the HRP as a task message.
    pub async fn send_report(&mut self) -> Result<()> {
        self.require(&SendState::Stored)?;
        let (Some(target), Some(reference)) = (self.target.clone(), self.report_reference.clone())
        else {
            return Err(ExchangeError::protocol("No stored report to send"));
        };

        let mut message = Task::new(Uuid::new_v4().to_string()).with_requester(
            Reference::logical(Identifier::new(
                NAMINGSYSTEM_ORGANIZATION_IDENTIFIER,
                &self.settings.local_organization,
            )),
        );
        message.add_input(TaskParameter::new(
            CODESYSTEM_REPORT,
            CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE,
            ParameterValue::Reference(Reference {
                reference: Some(reference.absolute()),
                resource_type: Some("Bundle".to_string()),
                identifier: None,
            }),
        ));

        let sent = with_retry(self.settings.retry, "send-report", || {
            self.collaborators
                .messenger
                .send_task(&target.endpoint_address, &message)
        })
        .await
        .map_err(|error| {
            if error.is_forbidden() {
                ExchangeError::not_allowed(error.to_string())
            } else {
                ExchangeError::not_reachable(error.to_string())
            }
        });

        match sent {
            Ok(()) => {
                info!(
                    hrp = %target.organization_identifier,
                    report = %reference,
                    task_id = %self.task.id,
                    "Sent report reference"
                );
                self.state = SendState::Sent;
                Ok(())
            }
            Err(error) => {
                self.fail(&error, "Send report failed").await;
                Err(error)
            }
        }
    }

    /// Record the counterpart's acknowledgement and close the transaction.
    ///
    /// An acknowledgement arriving on the same task instance that initiated
    /// the send means no distinct receipt was produced: the transaction
    /// closes `receipt-missing`. Otherwise the reported status is adopted
    /// verbatim; `receipt-ok` closes successfully, everything else closes
    /// failed.
    pub async fn record_receipt(&mut self, acknowledgement: &Task) -> Result<ReportStatus> {
        self.require(&SendState::Sent)?;

        let status = if acknowledgement.id == self.task.id {
            let status = ReportStatus::new(StatusCode::ReceiptMissing);
            self.task.add_output(StatusCodec::encode(&status));
            self.task.status = TaskStatus::Failed;
            self.state = SendState::ReceiptMissing;
            status
        } else {
            StatusCodec::transform_input_to_output(acknowledgement, &mut self.task);
            if StatusCodec::has_error_output(&self.task) {
                self.task.status = TaskStatus::Failed;
            }
            let status = StatusCodec::decode_all(&self.task.output)
                .into_iter()
                .next_back()
                .unwrap_or_else(|| {
                    ReportStatus::with_detail(
                        StatusCode::ReceiptError,
                        "Acknowledgement carries no report status",
                    )
                });
            if !status.is_ok() {
                self.task.status = TaskStatus::Failed;
            }
            self.state = SendState::ReceiptRecorded;
            status
        };

        self.persist_task().await;
        self.notify_final(&status).await;
        self.state = if status.code == StatusCode::ReceiptOk {
            SendState::Closed
        } else {
            SendState::Failed(status.code.clone())
        };
        Ok(status)
    }

    fn require(&self, expected: &SendState) -> Result<()> {
        if &self.state != expected {
            return Err(ExchangeError::protocol(format!(
                "Transaction for task '{}' is in state {:?}, expected {expected:?}",
                self.task.id, self.state
            )));
        }
        Ok(())
    }

    /// Record the failure status on the task, persist, notify, and move to
    /// the failure track. The original error keeps propagating afterwards.
    async fn fail(&mut self, error: &ExchangeError, fallback_detail: &str) {
        let code = error.send_status();
        let detail = match error {
            ExchangeError::Validation(reason) => reason.clone(),
            _ => fallback_detail.to_string(),
        };
        let status = ReportStatus::with_detail(code.clone(), detail);

        self.task.add_output(StatusCodec::encode(&status));
        self.task.status = TaskStatus::Failed;
        self.persist_task().await;
        self.notify_final(&status).await;
        self.state = SendState::Failed(code);
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

    async fn notify_final(&self, status: &ReportStatus) {
        let hrp = self
            .target
            .as_ref()
            .map(|t| t.organization_identifier.as_str())
            .unwrap_or("unknown");
        let location = self
            .report_reference
            .as_ref()
            .map(ReportReference::absolute)
            .unwrap_or_else(|| "none".to_string());

        let result = if status.code == StatusCode::ReceiptOk {
            info!(
                task_id = %self.task.id,
                code = %status.code,
                hrp,
                "Report transaction closed"
            );
            let subject =
                format!("New successful report in process '{PROCESS_NAME_REPORT_SEND}'");
            let body = format!(
                "A new report has been successfully created and retrieved by the HRP '{hrp}' \
                 with status code '{}' in process '{PROCESS_NAME_REPORT_SEND}' and can be \
                 accessed using the following link:\n- {location}",
                status.code
            );
            self.collaborators.mail.send(&subject, &body).await
        } else {
            warn!(
                task_id = %self.task.id,
                code = %status.code,
                detail = status.detail_or_none(),
                hrp,
                "Report transaction failed"
            );
            let subject = format!("Error in process '{PROCESS_NAME_REPORT_SEND}'");
            let body = format!(
                "HRP '{hrp}' could not download or insert new report with reference \
                 '{location}' in process '{PROCESS_NAME_REPORT_SEND}' in Task with id '{}':\n\
                 - status code: {}\n- error: {}",
                self.task.id,
                status.code,
                status.detail_or_none()
            );
            self.collaborators.mail.send(&subject, &body).await
        };

        if let Err(error) = result {
            warn!(task_id = %self.task.id, error = %error, "Could not send notification");
        }
    }
}
