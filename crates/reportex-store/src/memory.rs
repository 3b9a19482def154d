//! In-memory collaborator implementations.
//!
//! Back the protocol test suites and local tooling. The bundle store gives
//! the same conditional-update-by-identifier semantics a production FHIR
//! store provides: a repeat store under the same identifier produces a new
//! version of the same resource instead of a duplicate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use reportex_core::fhir::{Bundle, BundleType, Identifier, Task};
use reportex_core::reference::ReportReference;

use crate::error::StoreError;
use crate::traits::{
    ClinicalStore, DirectoryEntry, EndpointInfo, FhirStore, FhirStoreProvider,
    OrganizationDirectory, TaskMessenger,
};

#[derive(Debug, Clone)]
enum FailureMode {
    Forbidden(String),
    Unreachable(String),
}

impl FailureMode {
    fn to_error(&self) -> StoreError {
        match self {
            Self::Forbidden(message) => StoreError::forbidden(message.clone()),
            Self::Unreachable(message) => StoreError::unreachable(message.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    /// id -> all stored versions, oldest first
    bundles: HashMap<String, Vec<Bundle>>,
    /// identifier token (`system|value`) -> id
    identifier_index: HashMap<String, String>,
    tasks: HashMap<String, Task>,
}

/// In-memory FHIR store bound to one endpoint address.
#[derive(Debug)]
pub struct InMemoryStore {
    base_url: String,
    state: RwLock<StoreState>,
    search_failure: Mutex<Option<FailureMode>>,
    update_failure: Mutex<Option<String>>,
}

impl InMemoryStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: RwLock::new(StoreState::default()),
            search_failure: Mutex::new(None),
            update_failure: Mutex::new(None),
        }
    }

    /// Seed a bundle, indexing it by its identifier when present.
    pub async fn put_bundle(&self, bundle: Bundle) -> String {
        let mut state = self.state.write().await;
        let id = bundle
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(identifier) = &bundle.identifier {
            state.identifier_index.insert(identifier.as_token(), id.clone());
        }
        state.bundles.entry(id.clone()).or_default().push(bundle);
        id
    }

    /// Make every subsequent search fail with an authorization rejection.
    pub async fn fail_searches_forbidden(&self, message: impl Into<String>) {
        *self.search_failure.lock().await = Some(FailureMode::Forbidden(message.into()));
    }

    /// Make every subsequent search fail as unreachable.
    pub async fn fail_searches_unreachable(&self, message: impl Into<String>) {
        *self.search_failure.lock().await = Some(FailureMode::Unreachable(message.into()));
    }

    /// Make every subsequent bundle update fail with a backend error.
    pub async fn fail_updates(&self, message: impl Into<String>) {
        *self.update_failure.lock().await = Some(message.into());
    }

    /// Number of stored versions of the bundle with the given id.
    pub async fn version_count(&self, id: &str) -> usize {
        self.state
            .read()
            .await
            .bundles
            .get(id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of distinct bundle resources in the store.
    pub async fn bundle_count(&self) -> usize {
        self.state.read().await.bundles.len()
    }

    /// The persisted state of a task record.
    pub async fn task(&self, id: &str) -> Option<Task> {
        self.state.read().await.tasks.get(id).cloned()
    }
}

#[async_trait]
impl FhirStore for InMemoryStore {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn search_bundles_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Bundle, StoreError> {
        if let Some(failure) = self.search_failure.lock().await.as_ref() {
            return Err(failure.to_error());
        }

        let state = self.state.read().await;
        let matches: Vec<&Bundle> = state
            .identifier_index
            .get(identifier)
            .and_then(|id| state.bundles.get(id))
            .and_then(|versions| versions.last())
            .into_iter()
            .collect();

        let mut searchset = Bundle::new(BundleType::Searchset);
        searchset.total = Some(matches.len() as u32);
        for bundle in matches {
            searchset.add_entry(reportex_core::fhir::BundleEntry {
                resource: Some(serde_json::to_value(bundle).map_err(|e| {
                    StoreError::backend(format!("Bundle serialization failed: {e}"))
                })?),
                request: None,
                response: None,
            });
        }
        Ok(searchset)
    }

    async fn read_bundle(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Bundle, StoreError> {
        let state = self.state.read().await;
        let versions = state
            .bundles
            .get(id)
            .ok_or_else(|| StoreError::not_found("Bundle", id))?;

        match version {
            None => versions
                .last()
                .cloned()
                .ok_or_else(|| StoreError::not_found("Bundle", id)),
            Some(v) => {
                let index: usize = v
                    .parse::<usize>()
                    .map_err(|_| StoreError::invalid_resource(format!("Bad version id: {v}")))?;
                versions
                    .get(index.saturating_sub(1))
                    .cloned()
                    .ok_or_else(|| StoreError::not_found("Bundle", format!("{id}/_history/{v}")))
            }
        }
    }

    async fn update_bundle_by_identifier(
        &self,
        bundle: &Bundle,
        identifier: &Identifier,
    ) -> Result<ReportReference, StoreError> {
        if let Some(message) = self.update_failure.lock().await.as_ref() {
            return Err(StoreError::backend(message.clone()));
        }

        let token = identifier.as_token();
        let mut state = self.state.write().await;

        let id = match state.identifier_index.get(&token) {
            Some(existing) => existing.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                state.identifier_index.insert(token, id.clone());
                id
            }
        };

        let mut stored = bundle.clone();
        stored.id = Some(id.clone());
        let versions = state.bundles.entry(id.clone()).or_default();
        versions.push(stored);
        let version = versions.len().to_string();

        Ok(ReportReference::new(&self.base_url, "Bundle", id).with_version(version))
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }
}

/// Clinical store answering planned search requests from a scripted table.
#[derive(Debug, Default)]
pub struct ScriptedClinicalStore {
    base_url: String,
    responses: RwLock<HashMap<String, Value>>,
    failures: RwLock<HashMap<String, String>>,
}

impl ScriptedClinicalStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            responses: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
        }
    }

    pub async fn respond(&self, url: impl Into<String>, resource: Value) {
        self.responses.write().await.insert(url.into(), resource);
    }

    pub async fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        self.failures.write().await.insert(url.into(), message.into());
    }
}

#[async_trait]
impl ClinicalStore for ScriptedClinicalStore {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn search_by_url(&self, url: &str) -> Result<Value, StoreError> {
        if let Some(message) = self.failures.read().await.get(url) {
            return Err(StoreError::backend(message.clone()));
        }
        if let Some(resource) = self.responses.read().await.get(url) {
            return Ok(resource.clone());
        }
        // Unscripted queries answer like an empty store
        Ok(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 0
        }))
    }
}

/// Fixed directory contents for tests and local wiring.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: Vec<(String, String, DirectoryEntry, EndpointInfo)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(
        mut self,
        parent: impl Into<String>,
        role: impl Into<String>,
        organization_identifier: impl Into<String>,
        endpoint_identifier: impl Into<String>,
        endpoint_address: impl Into<String>,
    ) -> Self {
        self.entries.push((
            parent.into(),
            role.into(),
            DirectoryEntry {
                organization_identifier: organization_identifier.into(),
            },
            EndpointInfo {
                identifier: endpoint_identifier.into(),
                address: endpoint_address.into(),
            },
        ));
        self
    }
}

#[async_trait]
impl OrganizationDirectory for StaticDirectory {
    async fn organizations(
        &self,
        parent: &str,
        role: &str,
    ) -> Result<Vec<DirectoryEntry>, StoreError> {
        Ok(self
            .entries
            .iter()
            .filter(|(p, r, _, _)| p == parent && r == role)
            .map(|(_, _, entry, _)| entry.clone())
            .collect())
    }

    async fn endpoint(
        &self,
        parent: &str,
        organization: &str,
        role: &str,
    ) -> Result<Option<EndpointInfo>, StoreError> {
        Ok(self
            .entries
            .iter()
            .find(|(p, r, entry, _)| {
                p == parent && r == role && entry.organization_identifier == organization
            })
            .map(|(_, _, _, endpoint)| endpoint.clone()))
    }
}

/// Store provider with a fixed address table.
#[derive(Clone)]
pub struct StaticStoreProvider {
    local: Arc<dyn FhirStore>,
    remotes: HashMap<String, Arc<dyn FhirStore>>,
}

impl StaticStoreProvider {
    pub fn new(local: Arc<dyn FhirStore>) -> Self {
        Self {
            local,
            remotes: HashMap::new(),
        }
    }

    pub fn with_remote(mut self, address: impl Into<String>, store: Arc<dyn FhirStore>) -> Self {
        self.remotes.insert(address.into(), store);
        self
    }
}

impl FhirStoreProvider for StaticStoreProvider {
    fn local(&self) -> Arc<dyn FhirStore> {
        Arc::clone(&self.local)
    }

    fn remote(&self, endpoint_address: &str) -> Option<Arc<dyn FhirStore>> {
        self.remotes.get(endpoint_address).map(Arc::clone)
    }
}

/// Messenger recording every sent task, optionally failing first.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, Task)>>,
    failure: Mutex<Option<FailureMode>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_sends_forbidden(&self, message: impl Into<String>) {
        *self.failure.lock().await = Some(FailureMode::Forbidden(message.into()));
    }

    pub async fn fail_sends_unreachable(&self, message: impl Into<String>) {
        *self.failure.lock().await = Some(FailureMode::Unreachable(message.into()));
    }

    pub async fn sent(&self) -> Vec<(String, Task)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl TaskMessenger for RecordingMessenger {
    async fn send_task(&self, endpoint_address: &str, task: &Task) -> Result<(), StoreError> {
        if let Some(failure) = self.failure.lock().await.as_ref() {
            return Err(failure.to_error());
        }
        self.sent
            .lock()
            .await
            .push((endpoint_address.to_string(), task.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportex_core::fhir::BundleType;

    #[tokio::test]
    async fn test_conditional_update_is_idempotent() {
        let store = InMemoryStore::new("https://dic.example.com/fhir");
        let identifier = Identifier::new("http://example.com/sid/report-identifier", "Test_DIC1");

        let report = Bundle::new(BundleType::BatchResponse);
        let first = store
            .update_bundle_by_identifier(&report, &identifier)
            .await
            .unwrap();
        let second = store
            .update_bundle_by_identifier(&report, &identifier)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.version.as_deref(), Some("1"));
        assert_eq!(second.version.as_deref(), Some("2"));
        assert_eq!(store.bundle_count().await, 1);
        assert_eq!(store.version_count(&first.id).await, 2);
    }

    #[tokio::test]
    async fn test_different_identifiers_store_separately() {
        let store = InMemoryStore::new("https://hrp.example.com/fhir");
        let report = Bundle::new(BundleType::BatchResponse);

        let a = store
            .update_bundle_by_identifier(
                &report,
                &Identifier::new("http://example.com/sid/report-identifier", "DIC_A"),
            )
            .await
            .unwrap();
        let b = store
            .update_bundle_by_identifier(
                &report,
                &Identifier::new("http://example.com/sid/report-identifier", "DIC_B"),
            )
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.bundle_count().await, 2);
    }

    #[tokio::test]
    async fn test_search_by_identifier_finds_seeded_bundle() {
        let store = InMemoryStore::new("https://hrp.example.com/fhir");
        let bundle = Bundle::new(BundleType::Batch).with_identifier(Identifier::new(
            "http://example.com/fhir/CodeSystem/report",
            "search-bundle|1.1",
        ));
        store.put_bundle(bundle).await;

        let searchset = store
            .search_bundles_by_identifier(
                "http://example.com/fhir/CodeSystem/report|search-bundle|1.1",
            )
            .await
            .unwrap();
        assert_eq!(searchset.total, Some(1));
        assert_eq!(searchset.entry.len(), 1);

        let missing = store
            .search_bundles_by_identifier("http://example.com/fhir/CodeSystem/report|other")
            .await
            .unwrap();
        assert_eq!(missing.total, Some(0));
    }

    #[tokio::test]
    async fn test_injected_search_failures() {
        let store = InMemoryStore::new("https://hrp.example.com/fhir");
        store.fail_searches_forbidden("403").await;
        let err = store
            .search_bundles_by_identifier("any")
            .await
            .unwrap_err();
        assert!(err.is_forbidden());

        store.fail_searches_unreachable("connection refused").await;
        let err = store
            .search_bundles_by_identifier("any")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_versioned_read() {
        let store = InMemoryStore::new("https://dic.example.com/fhir");
        let identifier = Identifier::new("http://example.com/sid/report-identifier", "Test_DIC1");

        let mut report = Bundle::new(BundleType::BatchResponse);
        store
            .update_bundle_by_identifier(&report, &identifier)
            .await
            .unwrap();
        report.total = Some(5);
        let reference = store
            .update_bundle_by_identifier(&report, &identifier)
            .await
            .unwrap();

        let v1 = store.read_bundle(&reference.id, Some("1")).await.unwrap();
        assert_eq!(v1.total, None);
        let v2 = store.read_bundle(&reference.id, Some("2")).await.unwrap();
        assert_eq!(v2.total, Some(5));
        let latest = store.read_bundle(&reference.id, None).await.unwrap();
        assert_eq!(latest.total, Some(5));

        assert!(store.read_bundle("missing", None).await.is_err());
    }

    #[tokio::test]
    async fn test_recording_messenger() {
        let messenger = RecordingMessenger::new();
        let task = Task::new("task-1");
        messenger
            .send_task("https://hrp.example.com/fhir", &task)
            .await
            .unwrap();
        let sent = messenger.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://hrp.example.com/fhir");
        assert_eq!(sent[0].1.id, "task-1");
    }

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let directory = StaticDirectory::new()
            .with_entry("Consortium", "HRP", "Test_HRP", "Test_HRP_Endpoint", "https://hrp.example.com/fhir")
            .with_entry("Consortium", "DIC", "Test_DIC1", "Test_DIC1_Endpoint", "https://dic.example.com/fhir");

        let hrps = directory.organizations("Consortium", "HRP").await.unwrap();
        assert_eq!(hrps.len(), 1);
        assert_eq!(hrps[0].organization_identifier, "Test_HRP");

        let endpoint = directory
            .endpoint("Consortium", "Test_DIC1", "DIC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(endpoint.address, "https://dic.example.com/fhir");

        assert!(
            directory
                .endpoint("Consortium", "Test_DIC2", "DIC")
                .await
                .unwrap()
                .is_none()
        );
    }
}
