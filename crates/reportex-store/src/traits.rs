//! Collaborator interfaces the protocol core consumes.
//!
//! The exchange never talks to the network itself; it drives these traits.
//! Production adapters (HTTP FHIR client, directory client, process-engine
//! messenger) live outside this repository, the in-memory implementations in
//! [`crate::memory`] back the test suites.

use async_trait::async_trait;
use serde_json::Value;

use reportex_core::fhir::{Bundle, Identifier, Task};
use reportex_core::reference::ReportReference;

use crate::error::StoreError;

/// A FHIR resource store holding report bundles and task records.
///
/// One instance is bound to one store endpoint; the sender side uses its
/// local store plus the counterpart's remote store. Implementations must be
/// thread-safe (`Send + Sync`).
#[async_trait]
pub trait FhirStore: Send + Sync {
    /// Base URL of this store, used to build absolute report references.
    fn base_url(&self) -> &str;

    /// Searches for bundles carrying the given identifier token
    /// (`system|value`), returning a searchset with the total match count.
    async fn search_bundles_by_identifier(&self, identifier: &str)
    -> Result<Bundle, StoreError>;

    /// Reads a bundle, optionally at a specific version.
    async fn read_bundle(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Bundle, StoreError>;

    /// Creates or updates the bundle identified by `identifier`.
    ///
    /// This is the conditional update the exchange's idempotency rests on:
    /// a repeat store under the same identifier updates the existing resource
    /// in place (new version, same id) instead of creating a duplicate.
    async fn update_bundle_by_identifier(
        &self,
        bundle: &Bundle,
        identifier: &Identifier,
    ) -> Result<ReportReference, StoreError>;

    /// Persists the current state of a task record.
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;
}

/// The local clinical data store queries are executed against.
#[async_trait]
pub trait ClinicalStore: Send + Sync {
    /// Base URL, for log output only.
    fn base_url(&self) -> &str;

    /// Executes one planned search request (path + query string) and returns
    /// the resulting resource.
    async fn search_by_url(&self, url: &str) -> Result<Value, StoreError>;
}

/// Resolves store handles for the local endpoint and for counterpart
/// endpoints by address.
pub trait FhirStoreProvider: Send + Sync {
    /// The store of the local organization.
    fn local(&self) -> std::sync::Arc<dyn FhirStore>;

    /// The store behind a counterpart's endpoint address, `None` when no
    /// client can be built for it.
    fn remote(&self, endpoint_address: &str) -> Option<std::sync::Arc<dyn FhirStore>>;
}

/// An organization entry in the federation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub organization_identifier: String,
}

/// A resolved network endpoint of an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub identifier: String,
    pub address: String,
}

/// Directory resolving organizations and endpoints within a consortium.
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    /// All organizations below `parent` holding `role`, in directory order.
    async fn organizations(
        &self,
        parent: &str,
        role: &str,
    ) -> Result<Vec<DirectoryEntry>, StoreError>;

    /// The endpoint of `organization` below `parent` for `role`.
    async fn endpoint(
        &self,
        parent: &str,
        organization: &str,
        role: &str,
    ) -> Result<Option<EndpointInfo>, StoreError>;
}

/// Asynchronous task-message transport between organizations.
///
/// Delivery is at-least-once; the caller's bounded retry policy wraps the
/// send, not the implementation.
#[async_trait]
pub trait TaskMessenger: Send + Sync {
    async fn send_task(&self, endpoint_address: &str, task: &Task) -> Result<(), StoreError>;
}
