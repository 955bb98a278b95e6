//! OBD-II PID Definitions
//!
//! Static metadata for the parameters the decoder understands: display name,
//! unit and nominal range. Validation and quality scoring read ranges from here.

use crate::command::DTC_PID;
use crate::mode;
use serde::Serialize;

/// Shape of a decoded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueKind {
    /// A scaled number with a unit and range
    Numeric,
    /// Text such as a VIN or a list of trouble codes
    Text,
}

/// Metadata for one mode+PID pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidDefinition {
    /// Service/mode byte
    pub mode: u8,
    /// PID key ("0C", "02", or "DTC")
    pub pid: &'static str,
    /// Human readable name
    pub name: &'static str,
    /// Unit label
    pub unit: &'static str,
    /// Nominal minimum
    pub min: f64,
    /// Nominal maximum
    pub max: f64,
    /// Data bytes the formula consumes
    pub bytes: usize,
    /// Numeric or text
    pub kind: ValueKind,
}

impl PidDefinition {
    const fn numeric(
        pid: &'static str,
        name: &'static str,
        unit: &'static str,
        min: f64,
        max: f64,
        bytes: usize,
    ) -> Self {
        Self {
            mode: mode::CURRENT_DATA,
            pid,
            name,
            unit,
            min,
            max,
            bytes,
            kind: ValueKind::Numeric,
        }
    }

    const fn text(mode: u8, pid: &'static str, name: &'static str) -> Self {
        Self {
            mode,
            pid,
            name,
            unit: "",
            min: 0.0,
            max: 0.0,
            bytes: 0,
            kind: ValueKind::Text,
        }
    }

    /// Width of the nominal range
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Whether a value lies within the nominal range, boundaries included
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Whether this definition describes a numeric signal
    pub fn is_numeric(&self) -> bool {
        self.kind == ValueKind::Numeric
    }
}

/// Every PID the decoder has a formula for
pub static PID_DEFINITIONS: &[PidDefinition] = &[
    PidDefinition::text(mode::CURRENT_DATA, "00", "Supported PIDs 01-20"),
    PidDefinition::numeric("04", "Calculated engine load", "%", 0.0, 100.0, 1),
    PidDefinition::numeric("05", "Engine coolant temperature", "°C", -40.0, 215.0, 1),
    PidDefinition::numeric("06", "Short term fuel trim bank 1", "%", -100.0, 99.2, 1),
    PidDefinition::numeric("07", "Long term fuel trim bank 1", "%", -100.0, 99.2, 1),
    PidDefinition::numeric("0A", "Fuel pressure", "kPa", 0.0, 765.0, 1),
    PidDefinition::numeric("0B", "Intake manifold absolute pressure", "kPa", 0.0, 255.0, 1),
    PidDefinition::numeric("0C", "Engine RPM", "rpm", 0.0, 16383.75, 2),
    PidDefinition::numeric("0D", "Vehicle speed", "km/h", 0.0, 255.0, 1),
    PidDefinition::numeric("0E", "Timing advance", "°", -64.0, 63.5, 1),
    PidDefinition::numeric("0F", "Intake air temperature", "°C", -40.0, 215.0, 1),
    PidDefinition::numeric("10", "Mass air flow rate", "g/s", 0.0, 655.35, 2),
    PidDefinition::numeric("11", "Throttle position", "%", 0.0, 100.0, 1),
    PidDefinition::numeric("14", "Oxygen sensor voltage bank 1 sensor 1", "V", 0.0, 1.275, 1),
    PidDefinition::numeric("1F", "Run time since engine start", "s", 0.0, 65535.0, 2),
    PidDefinition::text(mode::CURRENT_DATA, "20", "Supported PIDs 21-40"),
    PidDefinition::numeric("21", "Distance traveled with MIL on", "km", 0.0, 65535.0, 2),
    PidDefinition::numeric("2F", "Fuel tank level", "%", 0.0, 100.0, 1),
    PidDefinition::numeric("33", "Absolute barometric pressure", "kPa", 0.0, 255.0, 1),
    PidDefinition::text(mode::CURRENT_DATA, "40", "Supported PIDs 41-60"),
    PidDefinition::numeric("42", "Control module voltage", "V", 0.0, 65.535, 2),
    PidDefinition::numeric("46", "Ambient air temperature", "°C", -40.0, 215.0, 1),
    PidDefinition::numeric("5C", "Engine oil temperature", "°C", -40.0, 210.0, 1),
    PidDefinition::text(mode::CURRENT_DATA, "60", "Supported PIDs 61-80"),
    PidDefinition::text(mode::READ_DTC, DTC_PID, "Stored trouble codes"),
    PidDefinition::text(mode::PENDING_DTC, DTC_PID, "Pending trouble codes"),
    PidDefinition::text(mode::PERMANENT_DTC, DTC_PID, "Permanent trouble codes"),
    PidDefinition::text(mode::VEHICLE_INFO, "02", "Vehicle identification number"),
    PidDefinition::text(mode::VEHICLE_INFO, "04", "Calibration ID"),
    PidDefinition::text(mode::VEHICLE_INFO, "0A", "ECU name"),
];

/// Look up the definition for a mode+PID pair.
///
/// Freeze-frame (mode 02) requests share the mode 01 definitions.
pub fn definition(mode: u8, pid: &str) -> Option<&'static PidDefinition> {
    let mode = if mode == mode::FREEZE_FRAME {
        mode::CURRENT_DATA
    } else {
        mode
    };
    PID_DEFINITIONS
        .iter()
        .find(|def| def.mode == mode && def.pid.eq_ignore_ascii_case(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_lookup() {
        let rpm = definition(0x01, "0C").unwrap();
        assert_eq!(rpm.unit, "rpm");
        assert_eq!(rpm.bytes, 2);
        assert!(rpm.contains(16383.75));
        assert!(!rpm.contains(16384.0));

        assert_eq!(definition(0x01, "0c").unwrap().name, "Engine RPM");
        assert_eq!(definition(0x02, "0D").unwrap().unit, "km/h");
        assert!(definition(0x01, "FF").is_none());
    }

    #[test]
    fn test_text_definitions() {
        let vin = definition(0x09, "02").unwrap();
        assert!(!vin.is_numeric());
        assert!(definition(0x03, DTC_PID).is_some());
    }

    #[test]
    fn test_definitions_are_unique() {
        for (i, a) in PID_DEFINITIONS.iter().enumerate() {
            for b in &PID_DEFINITIONS[i + 1..] {
                assert!(!(a.mode == b.mode && a.pid == b.pid), "duplicate {}", a.pid);
            }
        }
    }
}
