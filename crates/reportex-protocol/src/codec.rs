//! Translation between [`ReportStatus`] values and the task parameters that
//! carry them on the wire.
//!
//! A status travels as a coded task output (producer side) or input
//! (receiver side): the parameter is typed `report-status`, its value is a
//! coding from the status code system, and the optional error detail rides
//! in a string extension. Decoding is tolerant — a missing extension means
//! no detail, an unknown code is preserved as-is.

use reportex_core::fhir::{Extension, ParameterValue, Task, TaskParameter};
use reportex_core::status::{ReportStatus, StatusCode};

use crate::constants::{
    CODESYSTEM_REPORT, CODESYSTEM_REPORT_STATUS, CODESYSTEM_REPORT_VALUE_REPORT_STATUS,
    EXTENSION_REPORT_STATUS_ERROR_URL,
};

pub struct StatusCodec;

impl StatusCodec {
    /// Encode a status as a task output/input parameter.
    pub fn encode(status: &ReportStatus) -> TaskParameter {
        let mut parameter = TaskParameter::new(
            CODESYSTEM_REPORT,
            CODESYSTEM_REPORT_VALUE_REPORT_STATUS,
            ParameterValue::Coding(reportex_core::fhir::Coding::new(
                CODESYSTEM_REPORT_STATUS,
                status.code.as_str(),
            )),
        );
        if let Some(detail) = &status.error_detail {
            parameter = parameter
                .with_extension(Extension::string(EXTENSION_REPORT_STATUS_ERROR_URL, detail));
        }
        parameter
    }

    /// Decode a task parameter into a status, `None` when the parameter does
    /// not carry a coding from the status code system.
    pub fn decode(parameter: &TaskParameter) -> Option<ReportStatus> {
        let coding = parameter.value.as_coding()?;
        if coding.system.as_deref() != Some(CODESYSTEM_REPORT_STATUS) {
            return None;
        }
        let code = StatusCode::parse(coding.code.as_deref().unwrap_or_default());

        let error_detail = parameter
            .extension
            .iter()
            .find(|e| e.url == EXTENSION_REPORT_STATUS_ERROR_URL)
            .and_then(|e| e.value_string.clone());

        Some(ReportStatus { code, error_detail })
    }

    /// All statuses found among the given parameters, in document order.
    pub fn decode_all(parameters: &[TaskParameter]) -> Vec<ReportStatus> {
        parameters.iter().filter_map(Self::decode).collect()
    }

    /// Copy the status parameters reported as inputs of `from` onto the
    /// outputs of `to`. Used when an acknowledgement task answers for a
    /// transaction tracked on another task record.
    pub fn transform_input_to_output(from: &Task, to: &mut Task) {
        for parameter in &from.input {
            if Self::decode(parameter).is_some() {
                to.output.push(parameter.clone());
            }
        }
    }

    /// The status outputs of `task` re-encoded as input parameters for an
    /// acknowledgement message. With `remap`, the receiver's own
    /// `receive-error` becomes the sender-facing `receipt-error`; this is
    /// the only bridge between the two status spaces.
    pub fn transform_output_to_input(task: &Task, remap: bool) -> Vec<TaskParameter> {
        task.output
            .iter()
            .filter_map(|parameter| Self::decode(parameter).map(|status| (parameter, status)))
            .map(|(parameter, status)| {
                if remap {
                    let remapped = ReportStatus {
                        code: status.code.receive_to_receipt(),
                        error_detail: status.error_detail,
                    };
                    Self::encode(&remapped)
                } else {
                    parameter.clone()
                }
            })
            .collect()
    }

    /// Whether any status parameter among the outputs carries an error
    /// detail extension.
    pub fn has_error_output(task: &Task) -> bool {
        task.output
            .iter()
            .filter(|parameter| Self::decode(parameter).is_some())
            .any(|parameter| {
                parameter
                    .extension
                    .iter()
                    .any(|e| e.url == EXTENSION_REPORT_STATUS_ERROR_URL)
            })
    }
}
