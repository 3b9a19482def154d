pub mod error;
pub mod fhir;
pub mod reference;
pub mod status;
pub mod time;

pub use error::{ErrorCategory, ExchangeError, Result};
pub use fhir::{
    Bundle, BundleEntry, BundleLink, BundleRequest, BundleResponse, BundleType, CodeableConcept,
    Coding, Extension, HttpVerb, Identifier, Meta, ParameterValue, Reference, Task, TaskParameter,
    TaskStatus,
};
pub use reference::ReportReference;
pub use status::{ReportStatus, StatusCode};
pub use time::{format_rfc3339, now_utc};
