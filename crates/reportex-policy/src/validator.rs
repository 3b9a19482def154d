//! Rule engine checking an inbound search bundle against the query policy.
//!
//! The rules run in a fixed order and short-circuit on the first failure, so
//! a rejection always names the first violated rule. Rules never mutate the
//! bundle; a rejected bundle must not be executed.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use reportex_core::fhir::{Bundle, HttpVerb};

use crate::parser::{ParsedQuery, base_name};
use crate::policy::QueryPolicy;

static YEAR_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^20\d{2}$").expect("valid pattern"));

const DATE_EQUALITY_FILTER: &str = "eq";
const SUMMARY_SEARCH_PARAM: &str = "_summary";
const SUMMARY_SEARCH_PARAM_VALUE_COUNT: &str = "count";

/// A policy violation with the reason reported to the counterpart.
///
/// Rejections are validation failures, never transient conditions; callers
/// must treat them as non-retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validates search bundles against a [`QueryPolicy`].
#[derive(Debug, Clone)]
pub struct SearchBundleValidator {
    policy: QueryPolicy,
}

impl SearchBundleValidator {
    pub fn new(policy: QueryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    /// Check every rule in order, returning the first violation.
    pub fn validate(&self, bundle: &Bundle) -> Result<(), Rejection> {
        self.check_no_resources(bundle)?;
        self.check_request_method(bundle)?;
        self.check_request_urls_present(bundle)?;

        let queries: Vec<ParsedQuery> = bundle
            .entry
            .iter()
            .filter_map(|entry| entry.request.as_ref())
            .filter_map(|request| request.url.as_deref())
            .map(ParsedQuery::parse)
            .collect();

        self.check_path_ids(&queries)?;
        self.check_summary_count(&queries)?;
        self.check_param_names(&queries)?;
        self.check_date_values(&queries)?;
        self.check_token_values(&queries)?;

        Ok(())
    }

    fn check_no_resources(&self, bundle: &Bundle) -> Result<(), Rejection> {
        if bundle.entry.iter().any(|entry| entry.resource.is_some()) {
            return Err(Rejection::new("Search Bundle contains resources"));
        }
        Ok(())
    }

    fn check_request_method(&self, bundle: &Bundle) -> Result<(), Rejection> {
        let get_count = bundle
            .entry
            .iter()
            .filter_map(|entry| entry.request.as_ref())
            .filter(|request| request.method == Some(HttpVerb::Get))
            .count();

        if get_count != bundle.entry.len() {
            return Err(Rejection::new(
                "Search Bundle contains HTTP method other than GET",
            ));
        }
        Ok(())
    }

    fn check_request_urls_present(&self, bundle: &Bundle) -> Result<(), Rejection> {
        let url_count = bundle
            .entry
            .iter()
            .filter_map(|entry| entry.request.as_ref())
            .filter(|request| request.url.as_deref().is_some_and(|url| !url.is_empty()))
            .count();

        if url_count != bundle.entry.len() {
            return Err(Rejection::new("Search Bundle contains request without url"));
        }
        Ok(())
    }

    fn check_path_ids(&self, queries: &[ParsedQuery]) -> Result<(), Rejection> {
        let paths_with_id: Vec<&str> = queries
            .iter()
            .filter_map(|query| query.resource_id_path())
            .collect();

        if !paths_with_id.is_empty() {
            return Err(Rejection::new(format!(
                "Search Bundle contains request url with resource id - [{}]",
                paths_with_id.join(",")
            )));
        }
        Ok(())
    }

    fn check_summary_count(&self, queries: &[ParsedQuery]) -> Result<(), Rejection> {
        for query in checked_queries(queries) {
            let summary_values = query.values(SUMMARY_SEARCH_PARAM);

            if summary_values.is_empty() {
                return Err(Rejection::new(
                    "Search Bundle contains request url without _summary parameter",
                ));
            }

            if summary_values.len() > 1 {
                return Err(Rejection::new(
                    "Search Bundle contains request url with more than one _summary parameter",
                ));
            }

            if summary_values[0] != SUMMARY_SEARCH_PARAM_VALUE_COUNT {
                return Err(Rejection::new(format!(
                    "Search Bundle contains request url with unexpected _summary parameter value \
                     (expected: count, actual: {})",
                    summary_values[0]
                )));
            }
        }
        Ok(())
    }

    fn check_param_names(&self, queries: &[ParsedQuery]) -> Result<(), Rejection> {
        let invalid = checked_queries(queries)
            .flat_map(|query| query.params.keys())
            .any(|name| !self.policy.allows(&base_name(name)));

        if invalid {
            return Err(Rejection::new(format!(
                "Search Bundle contains invalid search params, only allowed search params are {}",
                self.policy.allow_list_display()
            )));
        }
        Ok(())
    }

    fn check_date_values(&self, queries: &[ParsedQuery]) -> Result<(), Rejection> {
        let date_entries: Vec<(&str, &str)> = checked_queries(queries)
            .flat_map(|query| query.entries_where(|base| self.policy.is_date_param(base)))
            .collect();

        let erroneous_filters: Vec<&(&str, &str)> = date_entries
            .iter()
            .filter(|(_, value)| !value.starts_with(DATE_EQUALITY_FILTER))
            .collect();

        if !erroneous_filters.is_empty() {
            return Err(Rejection::new(format!(
                "Search Bundle contains date search params not starting with 'eq' - [{}]",
                join_entries(&erroneous_filters)
            )));
        }

        let erroneous_values: Vec<&(&str, &str)> = date_entries
            .iter()
            .filter(|(_, value)| {
                let year = value.strip_prefix(DATE_EQUALITY_FILTER).unwrap_or(value);
                !YEAR_ONLY.is_match(year)
            })
            .collect();

        if !erroneous_values.is_empty() {
            return Err(Rejection::new(format!(
                "Search Bundle contains date search params not limited to a year - [{}]",
                join_entries(&erroneous_values)
            )));
        }

        Ok(())
    }

    fn check_token_values(&self, queries: &[ParsedQuery]) -> Result<(), Rejection> {
        if !self.policy.enforces_token_systems() {
            return Ok(());
        }

        let erroneous_values: Vec<(&str, &str)> = checked_queries(queries)
            .flat_map(|query| {
                query
                    .entries_where(|base| self.policy.is_token_param(base))
                    .filter(move |(name, value)| {
                        !value.ends_with('|')
                            && !self
                                .policy
                                .is_encounter_type_exempt(&query.path, &base_name(name))
                    })
            })
            .collect();

        if !erroneous_values.is_empty() {
            let joined: Vec<&(&str, &str)> = erroneous_values.iter().collect();
            return Err(Rejection::new(format!(
                "Search Bundle contains code search params not limited to system - [{}]",
                join_entries(&joined)
            )));
        }

        Ok(())
    }
}

/// Queries subject to the parameter-level rules; the capability-statement
/// path is exempt.
fn checked_queries(queries: &[ParsedQuery]) -> impl Iterator<Item = &ParsedQuery> {
    queries.iter().filter(|query| !query.is_capability_statement())
}

fn join_entries(entries: &[&(&str, &str)]) -> String {
    entries
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join(",")
}
