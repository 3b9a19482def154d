pub mod error;
pub mod memory;
pub mod retry;
pub mod traits;

pub use error::StoreError;
pub use memory::{
    InMemoryStore, RecordingMessenger, ScriptedClinicalStore, StaticDirectory, StaticStoreProvider,
};
pub use retry::{RetryPolicy, with_retry};
pub use traits::{
    ClinicalStore, DirectoryEntry, EndpointInfo, FhirStore, FhirStoreProvider,
    OrganizationDirectory, TaskMessenger,
};
