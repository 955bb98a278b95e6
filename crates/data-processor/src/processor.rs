//! Data Processor
//!
//! Orchestrates one raw response through decode → validate → unit-convert →
//! quality-score → publish. Rejected responses become [`DataError`] events;
//! warnings only degrade quality.

use crate::events::{BroadcastHub, DataError, DataErrorKind, Subscription};
use crate::quality::DataQuality;
use crate::sink::PersistenceSink;
use crate::stats::{ProcessingStats, StatsCounters};
use crate::units::{UnitConverter, UnitSystem};
use data_validator::{DataValidator, ValidationConfig};
use obd_protocol::decoder::decode_response;
use obd_protocol::{definition, timestamp_ms, ObdRequest};
use parking_lot::{Mutex, RwLock};
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Records kept per PID for short-term display
    pub buffer_capacity: usize,
    /// Fraction of the range width graded FAIR outside the range
    pub near_range_tolerance: f64,
    /// Forward records to the sink while a session is active
    pub persistence_enabled: bool,
    /// Records per sink call
    pub persistence_batch_size: usize,
    /// Items buffered per stream subscriber
    pub stream_capacity: usize,
    /// Validator settings
    pub validation: ValidationConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            near_range_tolerance: 0.10,
            persistence_enabled: true,
            persistence_batch_size: 1,
            stream_capacity: 1024,
            validation: ValidationConfig::default(),
        }
    }
}

/// Where a record came from and how long it took
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingMetadata {
    pub raw_response: String,
    pub command: String,
    pub processing_time_ms: f64,
    pub data_bytes: Vec<u8>,
}

/// A decoded, validated and converted value ready for consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedObdData {
    pub pid: String,
    pub mode: u8,
    pub name: String,
    /// Numeric value in `unit`
    pub value: Option<f64>,
    /// Text value (VIN, trouble codes, supported PIDs)
    pub text_value: Option<String>,
    pub unit: String,
    pub unit_system: UnitSystem,
    pub quality: DataQuality,
    pub confidence: f64,
    pub warnings: Vec<String>,
    /// Unix ms
    pub timestamp_ms: u64,
    pub metadata: ProcessingMetadata,
}

/// Vehicle and session records are persisted under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub vehicle_id: String,
    pub session_id: String,
}

/// Response-to-record pipeline
pub struct DataProcessor {
    config: ProcessorConfig,
    validator: DataValidator,
    buffers: RwLock<HashMap<String, RingBuffer<ProcessedObdData>>>,
    data: BroadcastHub<ProcessedObdData>,
    errors: BroadcastHub<DataError>,
    stats: StatsCounters,
    sink: Option<Arc<dyn PersistenceSink>>,
    session: RwLock<Option<Session>>,
    persistence_enabled: AtomicBool,
    batch: Mutex<Vec<ProcessedObdData>>,
}

impl DataProcessor {
    /// Create a processor without persistence
    pub fn new(config: ProcessorConfig) -> Self {
        let validator = DataValidator::new(config.validation.clone());
        let persistence_enabled = AtomicBool::new(config.persistence_enabled);
        Self {
            data: BroadcastHub::new(config.stream_capacity),
            errors: BroadcastHub::new(config.stream_capacity),
            config,
            validator,
            buffers: RwLock::new(HashMap::new()),
            stats: StatsCounters::default(),
            sink: None,
            session: RwLock::new(None),
            persistence_enabled,
            batch: Mutex::new(Vec::new()),
        }
    }

    /// Create a processor forwarding records to `sink` during sessions
    pub fn with_sink(config: ProcessorConfig, sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new(config)
        }
    }

    /// Process one adapter response for `command`.
    ///
    /// Returns `None` and publishes a [`DataError`] when the command is not a
    /// decodable OBD request, basic validation fails, a known PID yields no
    /// value, or conversion produces a non-finite value.
    pub async fn process(
        &self,
        raw_response: &str,
        command: &str,
        unit_system: UnitSystem,
    ) -> Option<ProcessedObdData> {
        let started = Instant::now();

        let Some(request) = ObdRequest::parse(command) else {
            self.reject(DataErrorKind::ParsingFailed, None, command, "not a decodable OBD request".to_string());
            return None;
        };
        let pid = request.pid_key();
        let parsed = decode_response(request.mode, &pid, raw_response);

        let validation = self.validator.validate(&parsed);
        if !validation.is_valid {
            let message = validation
                .error_message()
                .unwrap_or_else(|| "validation failed".to_string());
            self.reject(DataErrorKind::ValidationFailed, Some(pid), command, message);
            return None;
        }

        let base = definition(request.mode, &pid);
        if let Some(def) = base {
            let decoded = if def.is_numeric() {
                parsed.numeric_value.is_some()
            } else {
                parsed.string_value.is_some()
            };
            if !decoded {
                let message = format!("{} could not be decoded from {:?}", def.name, parsed.raw_response);
                self.reject(DataErrorKind::ParsingFailed, Some(pid), command, message);
                return None;
            }
        }
        let (def, value) = match (base, parsed.numeric_value) {
            (Some(def), Some(value)) => {
                let (def, value) = UnitConverter::convert(def, value, unit_system);
                (Some(def), Some(value))
            }
            (def, value) => (def.copied(), value),
        };
        if let Some(value) = value.filter(|v| !v.is_finite()) {
            self.reject(
                DataErrorKind::ProcessingFailed,
                Some(pid),
                command,
                format!("conversion produced {}", value),
            );
            return None;
        }

        let quality = DataQuality::assess(
            def.as_ref(),
            value,
            parsed.string_value.as_deref(),
            self.config.near_range_tolerance,
        );
        let record = ProcessedObdData {
            name: def
                .map(|d| d.name.to_string())
                .unwrap_or_else(|| format!("PID {:02X} {}", request.mode, pid)),
            unit: def.map(|d| d.unit.to_string()).unwrap_or_default(),
            pid,
            mode: request.mode,
            value,
            text_value: parsed.string_value,
            unit_system,
            quality,
            confidence: validation.confidence,
            warnings: validation.warning_messages(),
            timestamp_ms: parsed.timestamp_ms,
            metadata: ProcessingMetadata {
                raw_response: parsed.raw_response,
                command: command.to_string(),
                processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                data_bytes: parsed.data_bytes,
            },
        };

        self.buffers
            .write()
            .entry(record.pid.clone())
            .or_insert_with(|| RingBuffer::new(self.config.buffer_capacity))
            .push(record.clone());
        self.stats.record_valid();
        metrics::counter!("obd_records_total", "outcome" => "valid").increment(1);
        metrics::histogram!("obd_processing_time_ms").record(record.metadata.processing_time_ms);
        debug!(
            "{} = {:?}{} ({:?}, confidence {:.2})",
            record.name, record.value, record.unit, record.quality, record.confidence
        );

        self.data.publish(record.clone());
        self.persist(record.clone()).await;
        Some(record)
    }

    fn reject(&self, kind: DataErrorKind, pid: Option<String>, command: &str, message: String) {
        let error = DataError {
            kind,
            pid,
            command: command.to_string(),
            message,
            timestamp_ms: timestamp_ms(),
        };
        debug!("{}", error);
        self.stats.record_invalid();
        metrics::counter!("obd_records_total", "outcome" => "invalid").increment(1);
        self.errors.publish(error);
    }

    async fn persist(&self, record: ProcessedObdData) {
        if self.sink.is_none() || !self.persistence_enabled.load(Ordering::SeqCst) {
            return;
        }
        if self.session.read().is_none() {
            return;
        }

        let full = {
            let mut batch = self.batch.lock();
            batch.push(record);
            batch.len() >= self.config.persistence_batch_size.max(1)
        };
        if full {
            self.flush().await;
        }
    }

    /// Hand the pending batch to the sink. Failures are logged and dropped.
    pub async fn flush(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let Some(session) = self.session.read().clone() else {
            return;
        };
        let records = std::mem::take(&mut *self.batch.lock());
        if records.is_empty() {
            return;
        }

        match sink
            .save_batch(&session.vehicle_id, &session.session_id, &records)
            .await
        {
            Ok(()) => debug!("Persisted {} records for session {}", records.len(), session.session_id),
            Err(e) => {
                warn!(
                    "Dropping {} records for session {}: {}",
                    records.len(),
                    session.session_id,
                    e
                );
                metrics::counter!("obd_persistence_failures_total").increment(1);
            }
        }
    }

    /// Begin persisting records for a vehicle; an active session is flushed
    /// and ended first.
    pub async fn start_session(&self, vehicle_id: &str, session_id: &str) {
        self.end_session().await;
        info!("Starting session {} for vehicle {}", session_id, vehicle_id);
        *self.session.write() = Some(Session {
            vehicle_id: vehicle_id.to_string(),
            session_id: session_id.to_string(),
        });
    }

    /// Flush pending records and stop persisting
    pub async fn end_session(&self) {
        if self.session.read().is_none() {
            return;
        }
        self.flush().await;
        if let Some(session) = self.session.write().take() {
            info!("Ended session {}", session.session_id);
        }
    }

    /// Active session
    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Pause or resume forwarding records to the sink
    pub fn set_persistence_enabled(&self, enabled: bool) {
        self.persistence_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Subscribe to published records, starting with the latest one
    pub fn subscribe(&self) -> Subscription<ProcessedObdData> {
        self.data.subscribe()
    }

    /// Subscribe to rejected responses, starting with the latest one
    pub fn subscribe_errors(&self) -> Subscription<DataError> {
        self.errors.subscribe()
    }

    /// Buffered records for a PID, oldest first
    pub fn buffer(&self, pid: &str) -> Vec<ProcessedObdData> {
        self.buffers
            .read()
            .get(&pid.to_ascii_uppercase())
            .map(RingBuffer::to_vec)
            .unwrap_or_default()
    }

    /// Most recent record for a PID
    pub fn latest(&self, pid: &str) -> Option<ProcessedObdData> {
        self.buffers
            .read()
            .get(&pid.to_ascii_uppercase())
            .and_then(|buffer| buffer.last().cloned())
    }

    /// Drop every buffered record
    pub fn clear_buffers(&self) {
        self.buffers.write().clear();
    }

    /// Snapshot of the processing counters
    pub fn stats(&self) -> ProcessingStats {
        self.stats.snapshot()
    }

    /// Zero the processing counters
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// The validator whose history backs trend and outlier checks
    pub fn validator(&self) -> &DataValidator {
        &self.validator
    }
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::new(ProcessorConfig::default())
    }
}
