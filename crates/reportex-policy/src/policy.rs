//! The allow-list policy a search bundle is checked against.
//!
//! Parameters are organized by semantic class: date-valued parameters must be
//! equality-filtered to a single year, token-valued parameters must be
//! system-qualified, and the small `other` class carries the mandatory
//! reporting parameters. The union of the three classes is the allow-list.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Date-class search parameters
pub const DATE_SEARCH_PARAMS: [&str; 11] = [
    "date",
    "recorded-date",
    "onset-date",
    "effective",
    "effective-time",
    "authored",
    "collected",
    "issued",
    "period",
    "location-period",
    "occurrence",
];

/// Token-class search parameters
pub const TOKEN_SEARCH_PARAMS: [&str; 3] = ["code", "ingredient-code", "type"];

/// Remaining permitted search parameters
pub const OTHER_SEARCH_PARAMS: [&str; 2] = ["_profile", "_summary"];

/// Published revisions of the query policy.
///
/// v1.0 predates the token-class rule; v1.1 requires token values to be
/// system-qualified and introduces the Encounter `type` exemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolicyVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[default]
    #[serde(rename = "1.1")]
    V1_1,
}

impl fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1_0 => write!(f, "1.0"),
            Self::V1_1 => write!(f, "1.1"),
        }
    }
}

impl FromStr for PolicyVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" | "v1.0" => Ok(Self::V1_0),
            "1.1" | "v1.1" => Ok(Self::V1_1),
            other => Err(format!("Unknown policy version: {other}")),
        }
    }
}

/// Immutable allow-list of permitted query parameters, selected by version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPolicy {
    version: PolicyVersion,
}

impl QueryPolicy {
    pub fn new(version: PolicyVersion) -> Self {
        Self { version }
    }

    pub fn v1_0() -> Self {
        Self::new(PolicyVersion::V1_0)
    }

    pub fn v1_1() -> Self {
        Self::new(PolicyVersion::V1_1)
    }

    pub fn version(&self) -> PolicyVersion {
        self.version
    }

    /// All permitted parameter base names.
    pub fn allow_list(&self) -> impl Iterator<Item = &'static str> {
        DATE_SEARCH_PARAMS
            .into_iter()
            .chain(TOKEN_SEARCH_PARAMS)
            .chain(OTHER_SEARCH_PARAMS)
    }

    pub fn allows(&self, param: &str) -> bool {
        self.allow_list().any(|allowed| allowed == param)
    }

    pub fn is_date_param(&self, param: &str) -> bool {
        DATE_SEARCH_PARAMS.contains(&param)
    }

    pub fn is_token_param(&self, param: &str) -> bool {
        TOKEN_SEARCH_PARAMS.contains(&param)
    }

    /// Whether token values must carry an explicit system qualification.
    pub fn enforces_token_systems(&self) -> bool {
        matches!(self.version, PolicyVersion::V1_1)
    }

    /// Carve-out: `type` on the Encounter collection is accepted without
    /// system qualification. Applies to exactly this parameter on exactly
    /// this path; other token parameters and other resource types are not
    /// covered.
    pub fn is_encounter_type_exempt(&self, path: &str, param: &str) -> bool {
        param == "type" && path == "Encounter"
    }

    /// The allow-list rendered for rejection messages.
    pub fn allow_list_display(&self) -> String {
        let mut out = String::from("[");
        for (i, param) in self.allow_list().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(param);
        }
        out.push(']');
        out
    }
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self::v1_1()
    }
}
