//! Decomposition of planned search-request URLs.
//!
//! A search-bundle entry URL is split into its path and an insertion-ordered
//! multimap of query parameters. Parameter names keep their `:modifier`
//! suffix so policy violations can be reported verbatim; [`base_name`] strips
//! the modifier for allow-list lookup.

use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;
use url::form_urlencoded;

static MODIFIERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(":.*").expect("valid pattern"));

/// Strip a trailing `:modifier` suffix from a query parameter name.
pub fn base_name(name: &str) -> String {
    MODIFIERS.replace(name, "").into_owned()
}

/// A search-bundle entry URL decomposed into path and query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Path part: a resource-type collection (`Observation`) or the
    /// capability-statement path (`metadata`)
    pub path: String,
    /// Query parameters keyed by their raw (modifier-carrying) name, in
    /// document order, each with all its values
    pub params: IndexMap<String, Vec<String>>,
}

impl ParsedQuery {
    /// Parse a planned request URL, e.g.
    /// `Observation?code=http://loinc.org|&date=eq2023&_summary=count`.
    pub fn parse(url: &str) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };

        let mut params: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        Self {
            path: path.to_string(),
            params,
        }
    }

    /// Whether this is a request to the capability-statement path, which is
    /// exempt from the query-level policy checks.
    pub fn is_capability_statement(&self) -> bool {
        self.path == "metadata"
    }

    /// The offending path when it addresses a concrete resource instance
    /// (`Type/id` rather than a bare collection search), `None` otherwise.
    pub fn resource_id_path(&self) -> Option<&str> {
        let segments = self
            .path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .count();
        (segments >= 2).then_some(self.path.as_str())
    }

    /// All values of the given raw parameter name.
    pub fn values(&self, name: &str) -> &[String] {
        self.params.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(raw_name, value)` pairs of every parameter whose base name satisfies
    /// the predicate, in document order.
    pub fn entries_where<'a>(
        &'a self,
        mut predicate: impl FnMut(&str) -> bool + 'a,
    ) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.params
            .iter()
            .filter(move |(name, _)| predicate(&base_name(name)))
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }
}
