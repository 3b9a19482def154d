use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed outcome vocabulary shared by both legs of the report exchange.
///
/// `receive-*` codes describe the receiver's view of its own ingestion,
/// `receipt-*` codes the sender's view of the delivery outcome. Codes received
/// from a future counterpart version that are not part of this vocabulary are
/// preserved as [`StatusCode::Unspecified`] instead of failing decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    NotAllowed,
    NotReachable,
    ReceiptMissing,
    ReceiptOk,
    ReceiptError,
    ReceiveOk,
    ReceiveError,
    #[serde(untagged)]
    Unspecified(String),
}

impl StatusCode {
    /// The wire representation of this code.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotAllowed => "not-allowed",
            Self::NotReachable => "not-reachable",
            Self::ReceiptMissing => "receipt-missing",
            Self::ReceiptOk => "receipt-ok",
            Self::ReceiptError => "receipt-error",
            Self::ReceiveOk => "receive-ok",
            Self::ReceiveError => "receive-error",
            Self::Unspecified(code) => code,
        }
    }

    /// Whether this code closes a transaction successfully.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::ReceiptOk | Self::ReceiveOk)
    }

    /// Parse a wire code; never fails, unknown codes become
    /// [`StatusCode::Unspecified`].
    pub fn parse(s: &str) -> Self {
        match s {
            "not-allowed" => Self::NotAllowed,
            "not-reachable" => Self::NotReachable,
            "receipt-missing" => Self::ReceiptMissing,
            "receipt-ok" => Self::ReceiptOk,
            "receipt-error" => Self::ReceiptError,
            "receive-ok" => Self::ReceiveOk,
            "receive-error" => Self::ReceiveError,
            other => Self::Unspecified(other.to_string()),
        }
    }

    /// Translate the receiver's self-reported ingestion status into the
    /// sender-facing receipt vocabulary. Only `receive-error` is bridged;
    /// every other code passes through unchanged.
    pub fn receive_to_receipt(self) -> Self {
        match self {
            Self::ReceiveError => Self::ReceiptError,
            other => other,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StatusCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// A status code with its optional free-text error detail.
///
/// Instances are created once per terminal event and never mutated; a new
/// status replaces a prior one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStatus {
    pub code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ReportStatus {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            error_detail: None,
        }
    }

    pub fn with_detail(code: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// The detail string for operator-facing output, `"none"` when absent.
    pub fn detail_or_none(&self) -> &str {
        self.error_detail.as_deref().unwrap_or("none")
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_detail {
            Some(detail) => write!(f, "{} - {detail}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}
