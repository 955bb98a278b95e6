//! Data Validator for Decoded PID Values

use crate::error::{ValidationError, ValidationWarning};
use crate::statistics::WindowStats;
use obd_protocol::decoder::ParsedPidData;
use obd_protocol::{definition, elm, PidDefinition};
use parking_lot::RwLock;
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Samples kept per PID
    pub history_capacity: usize,
    /// z-score beyond which a value is an outlier
    pub outlier_z_threshold: f64,
    /// Samples required before outliers are checked
    pub min_outlier_samples: usize,
    /// Recent entries considered for the validity bonus
    pub recent_validity_window: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            outlier_z_threshold: 3.0,
            min_outlier_samples: 5,
            recent_validity_window: 5,
        }
    }
}

/// Result of validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    /// Whether the basic checks passed
    pub is_valid: bool,
    /// Basic-check failure
    pub error: Option<ValidationError>,
    /// Soft findings
    pub warnings: Vec<ValidationWarning>,
    /// Confidence in the value, 0.0 to 1.0
    pub confidence: f64,
}

impl ValidationResult {
    /// Human readable reason for a basic-check failure
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// Warnings rendered as text
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// One validated sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub value: Option<f64>,
    pub timestamp_ms: u64,
    pub is_valid: bool,
}

/// Stateful validator keeping a bounded history per PID
pub struct DataValidator {
    config: ValidationConfig,
    history: RwLock<HashMap<String, RingBuffer<HistoryEntry>>>,
}

impl DataValidator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Validate one decoded value and record it in the PID's history.
    ///
    /// History is appended whatever the outcome so trend checks keep their
    /// time continuity across bad frames.
    pub fn validate(&self, data: &ParsedPidData) -> ValidationResult {
        let pid_definition = definition(data.mode, &data.pid);
        let mut history = self.history.write();
        let entries = history
            .entry(data.pid.clone())
            .or_insert_with(|| RingBuffer::new(self.config.history_capacity));

        let result = match basic_check(data) {
            Err(error) => {
                debug!("{} failed basic validation: {}", data.pid, error);
                ValidationResult {
                    is_valid: false,
                    error: Some(error),
                    warnings: Vec::new(),
                    confidence: 0.0,
                }
            }
            Ok(()) => {
                let mut warnings = Vec::new();
                if let (Some(value), Some(def)) = (data.numeric_value, pid_definition) {
                    if let Some(warning) = check_range(def, value) {
                        warnings.push(warning);
                    }
                    if let Some(warning) = check_trend(def, value, data.timestamp_ms, entries) {
                        warnings.push(warning);
                    }
                    if let Some(warning) = self.check_outlier(def, value, entries) {
                        warnings.push(warning);
                    }
                }
                for warning in &warnings {
                    trace!("{}", warning);
                }

                let confidence = self.confidence(data, pid_definition.is_some(), &warnings, entries);
                ValidationResult {
                    is_valid: true,
                    error: None,
                    warnings,
                    confidence,
                }
            }
        };

        entries.push(HistoryEntry {
            value: data.numeric_value,
            timestamp_ms: data.timestamp_ms,
            is_valid: result.is_valid,
        });
        result
    }

    fn check_outlier(
        &self,
        def: &PidDefinition,
        value: f64,
        entries: &RingBuffer<HistoryEntry>,
    ) -> Option<ValidationWarning> {
        let values: Vec<f64> = entries.iter().filter_map(|entry| entry.value).collect();
        if values.len() < self.config.min_outlier_samples {
            return None;
        }

        let z_score = WindowStats::compute(&values)?.z_score(value)?;
        (z_score > self.config.outlier_z_threshold).then(|| ValidationWarning::Outlier {
            pid: def.pid.to_string(),
            value,
            z_score,
        })
    }

    fn confidence(
        &self,
        data: &ParsedPidData,
        has_definition: bool,
        warnings: &[ValidationWarning],
        entries: &RingBuffer<HistoryEntry>,
    ) -> f64 {
        let mut confidence = 1.0 - 0.1 * warnings.len() as f64;
        if !has_definition {
            confidence -= 0.3;
        }
        if !data.has_value() {
            confidence -= 0.2;
        }

        let recent: Vec<&HistoryEntry> = entries.recent(self.config.recent_validity_window).collect();
        if !recent.is_empty() {
            let valid = recent.iter().filter(|entry| entry.is_valid).count();
            confidence += 0.1 * valid as f64 / recent.len() as f64;
        }

        confidence.clamp(0.0, 1.0)
    }

    /// Copy of a PID's history, oldest first
    pub fn history(&self, pid: &str) -> Vec<HistoryEntry> {
        self.history
            .read()
            .get(&pid.to_ascii_uppercase())
            .map(RingBuffer::to_vec)
            .unwrap_or_default()
    }

    /// Forget one PID's history
    pub fn clear_history(&self, pid: &str) {
        self.history.write().remove(&pid.to_ascii_uppercase());
    }

    /// Forget every history
    pub fn clear_all(&self) {
        self.history.write().clear();
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

impl Default for DataValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

fn basic_check(data: &ParsedPidData) -> Result<(), ValidationError> {
    if data.pid.trim().is_empty() {
        return Err(ValidationError::EmptyPid);
    }
    if data.raw_response.trim().is_empty() {
        return Err(ValidationError::EmptyResponse);
    }
    if let Some(token) = elm::error_token(&data.raw_response) {
        return Err(ValidationError::AdapterError(token.to_string()));
    }
    if data.data_bytes.is_empty() {
        return Err(ValidationError::NoDataBytes);
    }
    Ok(())
}

fn check_range(def: &PidDefinition, value: f64) -> Option<ValidationWarning> {
    (!def.contains(value)).then(|| ValidationWarning::OutOfRange {
        pid: def.pid.to_string(),
        value,
        min: def.min,
        max: def.max,
    })
}

/// Largest plausible change per second
fn max_rate_per_second(def: &PidDefinition) -> f64 {
    match def.pid {
        "0C" => 1000.0,
        "0D" => 50.0,
        "05" => 5.0,
        "11" => 20.0,
        "04" => 10.0,
        _ => def.span() * 0.1,
    }
}

fn check_trend(
    def: &PidDefinition,
    value: f64,
    timestamp_ms: u64,
    entries: &RingBuffer<HistoryEntry>,
) -> Option<ValidationWarning> {
    let previous = entries.last()?;
    let previous_value = previous.value?;
    let elapsed_s = (timestamp_ms as f64 - previous.timestamp_ms as f64) / 1000.0;
    if elapsed_s <= 0.0 {
        return None;
    }

    let change = (value - previous_value).abs();
    let limit = max_rate_per_second(def) * elapsed_s;
    (change > limit).then(|| ValidationWarning::RateExceeded {
        pid: def.pid.to_string(),
        change,
        elapsed_s,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::decoder::{decode, decode_response};
    use proptest::prelude::*;

    fn sample(pid: &str, value: f64, timestamp_ms: u64) -> ParsedPidData {
        ParsedPidData {
            pid: pid.to_string(),
            mode: 0x01,
            numeric_value: Some(value),
            string_value: None,
            data_bytes: vec![0x00],
            raw_response: format!("41 {} 00", pid),
            timestamp_ms,
        }
    }

    #[test]
    fn test_valid_rpm() {
        let validator = DataValidator::default();
        let result = validator.validate(&decode(0x01, "0C", "1AF8"));
        assert!(result.is_valid);
        assert!(result.warnings.is_empty());
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_no_data_is_invalid() {
        let validator = DataValidator::default();
        let result = validator.validate(&decode_response(0x01, "0C", "NO DATA"));

        assert!(!result.is_valid);
        assert_eq!(result.error, Some(ValidationError::AdapterError("NODATA".into())));
        assert_eq!(result.confidence, 0.0);
        // Failures still enter the history
        assert_eq!(validator.history("0C").len(), 1);
        assert!(!validator.history("0C")[0].is_valid);
    }

    #[test]
    fn test_basic_check_reasons() {
        let mut data = sample("0D", 60.0, 0);
        data.data_bytes.clear();
        assert_eq!(basic_check(&data), Err(ValidationError::NoDataBytes));

        data.raw_response = "  ".into();
        assert_eq!(basic_check(&data), Err(ValidationError::EmptyResponse));

        data.pid = String::new();
        assert_eq!(basic_check(&data), Err(ValidationError::EmptyPid));

        let busy = decode_response(0x01, "0D", "BUS BUSY");
        assert_eq!(basic_check(&busy), Err(ValidationError::AdapterError("BUSBUSY".into())));
    }

    #[test]
    fn test_out_of_range_is_a_warning() {
        let validator = DataValidator::default();
        let result = validator.validate(&sample("05", 250.0, 0));

        assert!(result.is_valid);
        assert!(matches!(result.warnings[..], [ValidationWarning::OutOfRange { .. }]));
        assert!((result.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_trend_check() {
        let validator = DataValidator::default();
        validator.validate(&sample("0C", 800.0, 10_000));

        // 4200 rpm in one second
        let result = validator.validate(&sample("0C", 5000.0, 11_000));
        assert!(matches!(result.warnings[..], [ValidationWarning::RateExceeded { .. }]));

        // Same change over five seconds is plausible
        let result = validator.validate(&sample("0C", 800.0, 16_000));
        assert!(result.warnings.is_empty());

        // No elapsed time, no trend check
        let result = validator.validate(&sample("0C", 6000.0, 16_000));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_outlier_check() {
        let validator = DataValidator::default();
        for (i, speed) in [50.0, 52.0, 48.0, 51.0, 49.0, 50.0].iter().enumerate() {
            let result = validator.validate(&sample("0D", *speed, i as u64 * 10_000));
            assert!(result.warnings.is_empty());
        }

        let result = validator.validate(&sample("0D", 120.0, 60_000));
        assert!(matches!(result.warnings[..], [ValidationWarning::Outlier { .. }]));
    }

    #[test]
    fn test_outlier_skipped_for_flat_history() {
        let validator = DataValidator::default();
        for i in 0..6 {
            validator.validate(&sample("2F", 40.0, i * 1000));
        }
        let result = validator.validate(&sample("2F", 45.0, 7000));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unknown_pid_confidence() {
        let validator = DataValidator::default();
        let result = validator.validate(&decode_response(0x01, "A6", "41 A6 00 00 10 00"));
        assert!(result.is_valid);
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_recent_validity_bonus() {
        let validator = DataValidator::default();
        validator.validate(&decode_response(0x01, "05", "NO DATA"));
        validator.validate(&decode_response(0x01, "05", "NO DATA"));

        // One warning, two invalid predecessors: 1.0 - 0.1 + 0.0
        let result = validator.validate(&sample("05", 250.0, 0));
        assert!((result.confidence - 0.9).abs() < 1e-9);

        // One warning, one valid of three: 1.0 - 0.1 + 0.1 / 3
        let result = validator.validate(&sample("05", 250.0, 0));
        assert!((result.confidence - (0.9 + 0.1 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let validator = DataValidator::default();
        for i in 0..60u64 {
            validator.validate(&sample("0D", 50.0, i * 1000));
        }

        let history = validator.history("0d");
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].timestamp_ms, 10_000);
        assert_eq!(history[49].timestamp_ms, 59_000);

        validator.clear_history("0D");
        assert!(validator.history("0D").is_empty());
    }

    proptest! {
        #[test]
        fn prop_confidence_stays_in_unit_interval(
            values in prop::collection::vec((-1000.0f64..20000.0, 0u64..5000), 1..80)
        ) {
            let validator = DataValidator::default();
            let mut timestamp = 0;
            for (value, step) in values {
                timestamp += step;
                let result = validator.validate(&sample("0C", value, timestamp));
                prop_assert!((0.0..=1.0).contains(&result.confidence));
            }
            prop_assert!(validator.history("0C").len() <= 50);
        }
    }
}
