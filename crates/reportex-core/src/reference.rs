//! Parsing and rendering of absolute, versioned report locators.
//!
//! A stored report is addressed as `<base>/Bundle/<id>[/_history/<version>]`;
//! the store step produces this form and the download step consumes it.

use std::fmt;
use std::str::FromStr;

use crate::error::ExchangeError;

/// An absolute, optionally versioned locator of a stored report bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportReference {
    /// Base URL of the owning store, without trailing slash
    pub base_url: String,
    /// The resource type segment, `Bundle` for reports
    pub resource_type: String,
    /// The resource ID
    pub id: String,
    /// Optional version ID from the `_history` suffix
    pub version: Option<String>,
}

impl ReportReference {
    pub fn new(
        base_url: impl Into<String>,
        resource_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// The absolute URL of this reference.
    pub fn absolute(&self) -> String {
        match &self.version {
            Some(version) => format!(
                "{}/{}/{}/_history/{version}",
                self.base_url, self.resource_type, self.id
            ),
            None => format!("{}/{}/{}", self.base_url, self.resource_type, self.id),
        }
    }
}

impl fmt::Display for ReportReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.absolute())
    }
}

impl FromStr for ReportReference {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || ExchangeError::protocol(format!("Not an absolute versioned resource locator: {s}"));

        let (head, version) = match s.split_once("/_history/") {
            Some((head, version)) if !version.is_empty() && !version.contains('/') => {
                (head, Some(version.to_string()))
            }
            Some(_) => return Err(invalid()),
            None => (s, None),
        };

        let mut segments = head.rsplitn(3, '/');
        let id = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let resource_type = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(invalid)?;
        let base_url = segments
            .next()
            .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
            .ok_or_else(invalid)?;

        Ok(Self {
            base_url: base_url.to_string(),
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_round_trip() {
        let reference = ReportReference::new("https://dic.example.com/fhir", "Bundle", "b-1")
            .with_version("3");
        let rendered = reference.absolute();
        assert_eq!(rendered, "https://dic.example.com/fhir/Bundle/b-1/_history/3");
        assert_eq!(rendered.parse::<ReportReference>().unwrap(), reference);
    }

    #[test]
    fn test_unversioned_parse() {
        let reference: ReportReference = "https://dic.example.com/fhir/Bundle/b-1".parse().unwrap();
        assert_eq!(reference.base_url, "https://dic.example.com/fhir");
        assert_eq!(reference.resource_type, "Bundle");
        assert_eq!(reference.id, "b-1");
        assert!(reference.version.is_none());
    }

    #[test]
    fn test_relative_reference_is_rejected() {
        assert!("Bundle/b-1".parse::<ReportReference>().is_err());
        assert!("b-1".parse::<ReportReference>().is_err());
        assert!("https://dic.example.com/fhir/Bundle/b-1/_history/".parse::<ReportReference>().is_err());
    }

    #[test]
    fn test_trailing_slash_normalized() {
        let reference = ReportReference::new("https://dic.example.com/fhir/", "Bundle", "b-2");
        assert_eq!(reference.absolute(), "https://dic.example.com/fhir/Bundle/b-2");
    }
}
