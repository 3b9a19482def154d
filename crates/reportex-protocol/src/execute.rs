//! Execution of a validated search bundle and packaging of the report.
//!
//! Every planned query runs against the local clinical store; each entry's
//! outcome is captured on its own, so one failing query does not abort the
//! batch. Packaging strips result payloads down to counts before anything
//! leaves the organization: searchsets are replaced by total-only stubs and
//! capability statements lose everything but software and search metadata.

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use reportex_core::error::{ExchangeError, Result};
use reportex_core::fhir::{Bundle, BundleEntry, BundleResponse, BundleType, HttpVerb, Identifier};
use reportex_core::time::{format_rfc3339, now_utc};

use reportex_store::error::StoreError;
use reportex_store::traits::ClinicalStore;

use crate::constants::{NAMINGSYSTEM_REPORT_IDENTIFIER, PROFILE_REPORT_SEARCH_BUNDLE_RESPONSE};

const RESPONSE_OK: &str = "200";

/// Whether a report whose every query failed may still be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Continue on per-query errors; partial results are packaged and sent.
    #[default]
    Lenient,
    /// Fail the transaction when no query produced a result.
    Strict,
}

/// Run every planned query, collecting one response entry per request.
pub async fn execute_search_bundle(
    store: &dyn ClinicalStore,
    search_bundle: &Bundle,
) -> Bundle {
    info!(
        base_url = store.base_url(),
        requests = search_bundle.entry.len(),
        "Executing search bundle against clinical store - this could take a while"
    );

    let mut response_bundle = Bundle::new(BundleType::BatchResponse);

    for entry in &search_bundle.entry {
        let Some(request) = &entry.request else {
            continue;
        };
        if request.method != Some(HttpVerb::Get) {
            continue;
        }
        let Some(url) = request.url.as_deref() else {
            continue;
        };
        response_bundle.add_entry(execute_request(store, url).await);
    }

    response_bundle
}

async fn execute_request(store: &dyn ClinicalStore, url: &str) -> BundleEntry {
    debug!(url, "Executing report search request");

    match store.search_by_url(url).await {
        Ok(resource) => BundleEntry {
            resource: Some(resource),
            request: None,
            response: Some(BundleResponse {
                status: RESPONSE_OK.to_string(),
                outcome: None,
            }),
        },
        Err(error) => {
            warn!(url, error = %error, "Could not execute report search request");
            BundleEntry {
                resource: None,
                request: None,
                response: Some(BundleResponse {
                    status: http_status(&error).to_string(),
                    outcome: Some(operation_outcome(&error.to_string())),
                }),
            }
        }
    }
}

fn http_status(error: &StoreError) -> &'static str {
    match error {
        StoreError::Forbidden(_) => "403",
        StoreError::NotFound { .. } => "404",
        StoreError::Conflict(_) => "409",
        StoreError::InvalidResource(_) => "400",
        StoreError::Unreachable(_) => "503",
        StoreError::Backend(_) => "500",
    }
}

fn operation_outcome(diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": "exception",
            "diagnostics": diagnostics
        }]
    })
}

/// Package response entries into the report bundle delivered to the
/// counterpart, owned by the local organization's report identifier.
pub fn package_report(
    search_bundle: &Bundle,
    response_bundle: &Bundle,
    local_organization_identifier: &str,
) -> Bundle {
    let mut report = Bundle::new(BundleType::BatchResponse);
    {
        let meta = report.meta_mut();
        meta.profile = vec![PROFILE_REPORT_SEARCH_BUNDLE_RESPONSE.to_string()];
        meta.last_updated = Some(format_rfc3339(now_utc()));
    }
    report.identifier = Some(Identifier::new(
        NAMINGSYSTEM_REPORT_IDENTIFIER,
        local_organization_identifier,
    ));

    for (index, response_entry) in response_bundle.entry.iter().enumerate() {
        let request_url = search_bundle
            .entry
            .get(index)
            .and_then(|entry| entry.request.as_ref())
            .and_then(|request| request.url.as_deref())
            .unwrap_or_default();

        let mut report_entry = BundleEntry::default();

        match &response_entry.resource {
            Some(resource) if resource_type(resource) == Some("CapabilityStatement") => {
                report_entry.resource = Some(slim_capability_statement(resource));
            }
            resource => {
                report_entry.resource = Some(searchset_stub(resource.as_ref(), request_url));
            }
        }

        report_entry.response = response_entry.response.clone();
        report.add_entry(report_entry);
    }

    report
}

/// Fail the batch when every entry errored. Only consulted in
/// [`ExecutionMode::Strict`].
pub fn check_report(report: &Bundle, counterpart_identifier: &str) -> Result<()> {
    let requests = report.entry.len();
    let error_count = report
        .entry
        .iter()
        .filter_map(|entry| entry.response.as_ref())
        .filter(|response| !response.status.contains(RESPONSE_OK))
        .count();

    if requests > 0 && error_count >= requests {
        return Err(ExchangeError::protocol(format!(
            "Report bundle for '{counterpart_identifier}' only contains error status codes"
        )));
    }
    Ok(())
}

fn resource_type(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// Replace a searchset result by a stub carrying only its total and the
/// executed query as self link.
fn searchset_stub(resource: Option<&Value>, request_url: &str) -> Value {
    let total = resource
        .and_then(|r| r.get("total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let last_updated = resource
        .and_then(|r| r.pointer("/meta/lastUpdated"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format_rfc3339(now_utc()));

    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "meta": {"lastUpdated": last_updated},
        "link": [{"relation": "self", "url": request_url}],
        "total": total
    })
}

/// Reduce a capability statement to software identity, supported formats,
/// and search parameter names.
fn slim_capability_statement(resource: &Value) -> Value {
    let mut slim = Map::new();
    slim.insert("resourceType".into(), json!("CapabilityStatement"));
    slim.insert("kind".into(), json!("capability"));
    slim.insert("name".into(), json!("Server"));

    for field in ["status", "date", "fhirVersion"] {
        if let Some(value) = resource.get(field) {
            slim.insert(field.into(), value.clone());
        }
    }

    if let Some(software) = resource.get("software") {
        let mut slim_software = Map::new();
        for field in ["name", "version"] {
            if let Some(value) = software.get(field) {
                slim_software.insert(field.into(), value.clone());
            }
        }
        slim.insert("software".into(), Value::Object(slim_software));
    }

    if let Some(formats) = resource.get("format").and_then(Value::as_array) {
        let kept: Vec<Value> = formats
            .iter()
            .filter(|format| {
                matches!(
                    format.as_str(),
                    Some("application/fhir+xml") | Some("application/fhir+json")
                )
            })
            .cloned()
            .collect();
        slim.insert("format".into(), Value::Array(kept));
    }

    if let Some(rest) = resource.get("rest").and_then(Value::as_array) {
        let slim_rest: Vec<Value> = rest.iter().map(slim_rest_component).collect();
        slim.insert("rest".into(), Value::Array(slim_rest));
    }

    Value::Object(slim)
}

fn slim_rest_component(rest: &Value) -> Value {
    let mut slim = Map::new();
    if let Some(mode) = rest.get("mode") {
        slim.insert("mode".into(), mode.clone());
    }
    if let Some(params) = rest.get("searchParam").and_then(Value::as_array) {
        slim.insert(
            "searchParam".into(),
            Value::Array(params.iter().map(strip_documentation).collect()),
        );
    }
    if let Some(resources) = rest.get("resource").and_then(Value::as_array) {
        let slim_resources: Vec<Value> = resources
            .iter()
            .map(|resource| {
                let mut entry = Map::new();
                if let Some(resource_type) = resource.get("type") {
                    entry.insert("type".into(), resource_type.clone());
                }
                if let Some(params) = resource.get("searchParam").and_then(Value::as_array) {
                    entry.insert(
                        "searchParam".into(),
                        Value::Array(params.iter().map(strip_documentation).collect()),
                    );
                }
                Value::Object(entry)
            })
            .collect();
        slim.insert("resource".into(), Value::Array(slim_resources));
    }
    Value::Object(slim)
}

fn strip_documentation(param: &Value) -> Value {
    match param {
        Value::Object(map) => {
            let mut stripped = map.clone();
            stripped.remove("documentation");
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}
