//! Identity of the processor, as answered to the `ZQS01` query.
//!
//! Response format: `!S01,RadiancePro,090524,1018,009022`
//! (model name, software revision, model number, serial number).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::reports::{ReportError, IDENTITY_RESPONSE_PREFIX};

/// Model and firmware details of the connected processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model_name: String,
    pub software_revision: String,
    pub model_number: String,
    pub serial_number: u32,
}

impl DeviceInfo {
    /// Parses an identity response.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if the prefix is wrong, fields are missing, or
    /// the serial number is not numeric.
    pub fn parse(response: &str) -> Result<Self, ReportError> {
        const REPORT: &str = "identity response";

        let body = response
            .strip_prefix(IDENTITY_RESPONSE_PREFIX)
            .ok_or_else(|| ReportError::InvalidField {
                report: REPORT,
                field: "prefix",
                value: response.to_string(),
            })?;

        let fields: Vec<&str> = body.split(',').map(str::trim).collect();
        if fields.len() < 4 || fields.iter().take(4).any(|f| f.is_empty()) {
            return Err(ReportError::Truncated {
                report: REPORT,
                expected: 4,
                actual: fields.iter().filter(|f| !f.is_empty()).count(),
            });
        }

        let serial_number = fields[3]
            .parse::<u32>()
            .map_err(|_| ReportError::InvalidField {
                report: REPORT,
                field: "serial number",
                value: fields[3].to_string(),
            })?;

        Ok(Self {
            model_name: fields[0].to_string(),
            software_revision: fields[1].to_string(),
            model_number: fields[2].to_string(),
            serial_number,
        })
    }

    /// Stable identifier: model number followed by the 6-digit serial.
    pub fn id(&self) -> String {
        format!("{}{:06}", self.model_number, self.serial_number)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (model {}, firmware {}, serial {:06})",
            self.model_name, self.model_number, self.software_revision, self.serial_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity_response() {
        // Arrange / Act
        let info = DeviceInfo::parse("!S01,RadiancePro,090524,1018,009022").unwrap();

        // Assert
        assert_eq!(info.model_name, "RadiancePro");
        assert_eq!(info.software_revision, "090524");
        assert_eq!(info.model_number, "1018");
        assert_eq!(info.serial_number, 9022);
        assert_eq!(info.id(), "1018009022");
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let err = DeviceInfo::parse("!S01,RadiancePro,090524").unwrap_err();
        assert!(matches!(err, ReportError::Truncated { expected: 4, .. }));
    }

    #[test]
    fn test_non_numeric_serial_is_rejected() {
        let err = DeviceInfo::parse("!S01,RadiancePro,090524,1018,abc").unwrap_err();
        assert!(matches!(err, ReportError::InvalidField { field: "serial number", .. }));
    }

    #[test]
    fn test_wrong_prefix_is_rejected() {
        assert!(DeviceInfo::parse("!S02,1").is_err());
    }
}
