//! Data quality scoring

use obd_protocol::PidDefinition;
use serde::{Deserialize, Serialize};

/// Quality grade of a published value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataQuality {
    /// Within the nominal range
    Good,
    /// Just outside the nominal range
    Fair,
    /// Well outside the nominal range
    Poor,
    /// No usable value
    Invalid,
    /// No definition to judge against
    Unknown,
}

impl DataQuality {
    /// Grade a value against its (possibly unit-converted) definition.
    ///
    /// `tolerance` is the fraction of the range width accepted as FAIR on
    /// either side of the range.
    pub fn assess(
        definition: Option<&PidDefinition>,
        value: Option<f64>,
        text: Option<&str>,
        tolerance: f64,
    ) -> Self {
        let Some(def) = definition else {
            return DataQuality::Unknown;
        };

        if !def.is_numeric() {
            return match text {
                Some(text) if !text.trim().is_empty() => DataQuality::Good,
                _ => DataQuality::Invalid,
            };
        }

        let Some(value) = value else {
            return DataQuality::Invalid;
        };
        if def.contains(value) {
            return DataQuality::Good;
        }

        let margin = def.span() * tolerance;
        if value >= def.min - margin && value <= def.max + margin {
            DataQuality::Fair
        } else {
            DataQuality::Poor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::definition;

    #[test]
    fn test_numeric_grades() {
        // Coolant: -40..215, span 255, 10% margin 25.5
        let def = definition(0x01, "05");
        assert_eq!(DataQuality::assess(def, Some(90.0), None, 0.1), DataQuality::Good);
        assert_eq!(DataQuality::assess(def, Some(215.0), None, 0.1), DataQuality::Good);
        assert_eq!(DataQuality::assess(def, Some(230.0), None, 0.1), DataQuality::Fair);
        assert_eq!(DataQuality::assess(def, Some(-60.0), None, 0.1), DataQuality::Fair);
        assert_eq!(DataQuality::assess(def, Some(250.0), None, 0.1), DataQuality::Poor);
        assert_eq!(DataQuality::assess(def, None, None, 0.1), DataQuality::Invalid);
    }

    #[test]
    fn test_text_and_unknown() {
        let vin = definition(0x09, "02");
        assert_eq!(
            DataQuality::assess(vin, None, Some("1D4GP00R55B123456"), 0.1),
            DataQuality::Good
        );
        assert_eq!(DataQuality::assess(vin, None, Some("  "), 0.1), DataQuality::Invalid);
        assert_eq!(DataQuality::assess(None, Some(1.0), None, 0.1), DataQuality::Unknown);
    }

    #[test]
    fn test_serialized_labels() {
        assert_eq!(serde_json::to_string(&DataQuality::Fair).unwrap(), "\"FAIR\"");
    }
}
