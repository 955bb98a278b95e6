//! Metric ↔ imperial unit conversion

use obd_protocol::PidDefinition;
use serde::{Deserialize, Serialize};

/// Display unit system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    /// Units as the vehicle reports them
    #[default]
    Metric,
    Imperial,
}

/// Linear conversion `value * factor + offset` from one unit label to another
struct Conversion {
    from: &'static str,
    to: &'static str,
    factor: f64,
    offset: f64,
}

impl Conversion {
    fn apply(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }
}

const IMPERIAL: &[Conversion] = &[
    Conversion { from: "km/h", to: "mph", factor: 0.621371, offset: 0.0 },
    Conversion { from: "°C", to: "°F", factor: 1.8, offset: 32.0 },
    Conversion { from: "kPa", to: "psi", factor: 0.145038, offset: 0.0 },
    Conversion { from: "g/s", to: "lb/min", factor: 0.132277, offset: 0.0 },
    Conversion { from: "km", to: "mi", factor: 0.621371, offset: 0.0 },
];

/// Scales values and their definitions between unit systems
pub struct UnitConverter;

impl UnitConverter {
    /// Convert a metric value for `definition` into `system`.
    ///
    /// Returns a new definition carrying the target unit label and range
    /// alongside the converted value; units without a conversion pass through.
    pub fn convert(definition: &PidDefinition, value: f64, system: UnitSystem) -> (PidDefinition, f64) {
        let conversion = match system {
            UnitSystem::Metric => None,
            UnitSystem::Imperial => IMPERIAL.iter().find(|c| c.from == definition.unit),
        };

        match conversion {
            Some(conversion) => {
                let converted = PidDefinition {
                    unit: conversion.to,
                    min: conversion.apply(definition.min),
                    max: conversion.apply(definition.max),
                    ..*definition
                };
                (converted, conversion.apply(value))
            }
            None => (*definition, value),
        }
    }
}
