//! Wire constants of the report exchange.
//!
//! Both parties must agree on these systems and codes; they are versioned
//! with the protocol, not with this implementation.

/// Code system typing the report task parameters
pub const CODESYSTEM_REPORT: &str = "http://reportex.org/fhir/CodeSystem/report";
pub const CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE: &str = "search-bundle";
pub const CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE_RESPONSE_REFERENCE: &str =
    "search-bundle-response-reference";
pub const CODESYSTEM_REPORT_VALUE_REPORT_STATUS: &str = "report-status";
pub const CODESYSTEM_REPORT_VALUE_TIMER_INTERVAL: &str = "timer-interval";
pub const CODESYSTEM_REPORT_VALUE_FIRST_EXECUTION: &str = "first-execution";
pub const CODESYSTEM_REPORT_VALUE_HRP_IDENTIFIER: &str = "hrp-identifier";

/// Code system of the shared status vocabulary
pub const CODESYSTEM_REPORT_STATUS: &str = "http://reportex.org/fhir/CodeSystem/report-status";

/// Extension carrying the free-text error detail of a status
pub const EXTENSION_REPORT_STATUS_ERROR_URL: &str =
    "http://reportex.org/fhir/StructureDefinition/extension-report-status-error";

/// Naming system of the report idempotency identifier
pub const NAMINGSYSTEM_REPORT_IDENTIFIER: &str = "http://reportex.org/sid/report-identifier";

/// Naming system of organization identifiers in the federation
pub const NAMINGSYSTEM_ORGANIZATION_IDENTIFIER: &str =
    "http://reportex.org/sid/organization-identifier";

/// Profile claimed by packaged report bundles
pub const PROFILE_REPORT_SEARCH_BUNDLE_RESPONSE: &str =
    "http://reportex.org/fhir/Bundle/search-bundle-response";

/// Directory roles of the two organization classes
pub const ORGANIZATION_ROLE_HRP: &str = "HRP";
pub const ORGANIZATION_ROLE_DIC: &str = "DIC";

/// Process names, used in operator notifications
pub const PROCESS_NAME_REPORT_SEND: &str = "report-send";
pub const PROCESS_NAME_REPORT_RECEIVE: &str = "report-receive";

/// Default report cadence
pub const REPORT_TIMER_INTERVAL_DEFAULT: &str = "P7D";

/// Identifier token (`system|value`) of the well-known search bundle for a
/// protocol version, e.g. `…/CodeSystem/report|search-bundle1.1`.
pub fn search_bundle_identifier_token(process_version: &str) -> String {
    format!("{CODESYSTEM_REPORT}|{CODESYSTEM_REPORT_VALUE_SEARCH_BUNDLE}{process_version}")
}
