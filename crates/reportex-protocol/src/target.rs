//! The counterpart a transaction talks to.

/// A resolved counterpart organization and its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub organization_identifier: String,
    pub endpoint_identifier: String,
    pub endpoint_address: String,
}

impl Target {
    pub fn new(
        organization_identifier: impl Into<String>,
        endpoint_identifier: impl Into<String>,
        endpoint_address: impl Into<String>,
    ) -> Self {
        Self {
            organization_identifier: organization_identifier.into(),
            endpoint_identifier: endpoint_identifier.into(),
            endpoint_address: endpoint_address.into(),
        }
    }
}
