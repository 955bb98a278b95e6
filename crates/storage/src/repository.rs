//! Repository Implementation

use crate::StorageError;
use async_trait::async_trait;
use data_processor::{DataQuality, PersistenceSink, ProcessedObdData, SinkError, UnitSystem};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, info};

/// Stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObdRecord {
    pub id: i64,
    pub vehicle_id: String,
    pub session_id: String,
    pub pid: String,
    pub mode: u8,
    pub name: String,
    pub value: Option<f64>,
    pub text_value: Option<String>,
    pub unit: String,
    pub unit_system: UnitSystem,
    pub quality: DataQuality,
    pub confidence: f64,
    pub timestamp_ms: u64,
    pub raw_response: String,
}

/// Per-session bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub vehicle_id: String,
    pub session_id: String,
    pub first_timestamp_ms: u64,
    pub last_timestamp_ms: u64,
    pub record_count: usize,
}

type SessionKey = (String, String);

/// Repository for data access (in-memory implementation)
pub struct Repository {
    /// Records per (vehicle, session), oldest first
    records: Mutex<HashMap<SessionKey, VecDeque<ObdRecord>>>,
    /// Max records kept per session
    max_records_per_session: usize,
    /// Next record ID
    next_id: Mutex<i64>,
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::with_max_records(100_000)
    }

    /// Create a repository keeping at most `max_records_per_session` per session
    pub fn with_max_records(max_records_per_session: usize) -> Self {
        info!(
            "Creating in-memory repository ({} records per session)",
            max_records_per_session
        );
        Self {
            records: Mutex::new(HashMap::new()),
            max_records_per_session: max_records_per_session.max(1),
            next_id: Mutex::new(1),
        }
    }

    /// Insert a batch of processed records; returns the assigned IDs
    pub fn insert_records(
        &self,
        vehicle_id: &str,
        session_id: &str,
        batch: &[ProcessedObdData],
    ) -> Result<Vec<i64>, StorageError> {
        if vehicle_id.is_empty() || session_id.is_empty() {
            return Err(StorageError::InvalidKey(format!(
                "vehicle {:?} session {:?}",
                vehicle_id, session_id
            )));
        }

        let mut records = self.records.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;
        let mut next_id = self.next_id.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        let log = records
            .entry((vehicle_id.to_string(), session_id.to_string()))
            .or_default();
        let mut ids = Vec::with_capacity(batch.len());
        for data in batch {
            // Enforce retention
            while log.len() >= self.max_records_per_session {
                log.pop_front();
            }

            let id = *next_id;
            *next_id += 1;
            log.push_back(ObdRecord {
                id,
                vehicle_id: vehicle_id.to_string(),
                session_id: session_id.to_string(),
                pid: data.pid.clone(),
                mode: data.mode,
                name: data.name.clone(),
                value: data.value,
                text_value: data.text_value.clone(),
                unit: data.unit.clone(),
                unit_system: data.unit_system,
                quality: data.quality,
                confidence: data.confidence,
                timestamp_ms: data.timestamp_ms,
                raw_response: data.metadata.raw_response.clone(),
            });
            ids.push(id);
        }

        debug!("Inserted {} records for {}/{}", ids.len(), vehicle_id, session_id);
        Ok(ids)
    }

    /// Most recent records of a session, newest first
    pub fn get_records(
        &self,
        vehicle_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ObdRecord>, StorageError> {
        let records = self.records.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        let log = records
            .get(&(vehicle_id.to_string(), session_id.to_string()))
            .ok_or(StorageError::NotFound)?;
        Ok(log.iter().rev().take(limit).cloned().collect())
    }

    /// A PID's records for a vehicle across sessions, newest first
    pub fn get_pid_history(
        &self,
        vehicle_id: &str,
        pid: &str,
        limit: usize,
    ) -> Result<Vec<ObdRecord>, StorageError> {
        let records = self.records.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        let mut matching: Vec<ObdRecord> = records
            .iter()
            .filter(|((vehicle, _), _)| vehicle == vehicle_id)
            .flat_map(|(_, log)| log.iter())
            .filter(|r| r.pid.eq_ignore_ascii_case(pid))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms).then(b.id.cmp(&a.id)));
        matching.truncate(limit);
        Ok(matching)
    }

    /// Sessions recorded for a vehicle, oldest first
    pub fn sessions(&self, vehicle_id: &str) -> Result<Vec<SessionSummary>, StorageError> {
        let records = self.records.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        let mut sessions: Vec<SessionSummary> = records
            .iter()
            .filter(|((vehicle, _), _)| vehicle == vehicle_id)
            .filter_map(|((vehicle, session), log)| {
                Some(SessionSummary {
                    vehicle_id: vehicle.clone(),
                    session_id: session.clone(),
                    first_timestamp_ms: log.front()?.timestamp_ms,
                    last_timestamp_ms: log.back()?.timestamp_ms,
                    record_count: log.len(),
                })
            })
            .collect();
        sessions.sort_by_key(|s| s.first_timestamp_ms);
        Ok(sessions)
    }

    /// Trim every session to its newest `max_per_session` records; returns the
    /// number of records removed
    pub fn limit_data_records(&self, max_per_session: usize) -> Result<usize, StorageError> {
        let mut records = self.records.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        let mut removed = 0;
        for log in records.values_mut() {
            let excess = log.len().saturating_sub(max_per_session);
            log.drain(..excess);
            removed += excess;
        }
        records.retain(|_, log| !log.is_empty());

        if removed > 0 {
            info!("Retention removed {} records", removed);
        }
        Ok(removed)
    }

    /// Delete a session's records
    pub fn delete_session(&self, vehicle_id: &str, session_id: &str) -> Result<usize, StorageError> {
        let mut records = self.records.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        records
            .remove(&(vehicle_id.to_string(), session_id.to_string()))
            .map(|log| log.len())
            .ok_or(StorageError::NotFound)
    }

    /// Get total record count
    pub fn record_count(&self) -> usize {
        self.records
            .lock()
            .map(|r| r.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceSink for Repository {
    async fn save_batch(
        &self,
        vehicle_id: &str,
        session_id: &str,
        records: &[ProcessedObdData],
    ) -> Result<(), SinkError> {
        self.insert_records(vehicle_id, session_id, records)
            .map(|_| ())
            .map_err(|e| match e {
                StorageError::InvalidKey(key) => SinkError::Rejected(key),
                other => SinkError::Unavailable(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_processor::{DataProcessor, ProcessorConfig};
    use std::sync::Arc;

    async fn processed(raw: &str, command: &str) -> ProcessedObdData {
        DataProcessor::default()
            .process(raw, command, UnitSystem::Metric)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_retrieve() {
        let repo = Repository::new();
        let rpm = processed("41 0C 1A F8", "010C").await;
        let speed = processed("41 0D 3C", "010D").await;

        let ids = repo.insert_records("VIN1", "s1", &[rpm, speed]).unwrap();
        assert_eq!(ids, vec![1, 2]);

        let records = repo.get_records("VIN1", "s1", 10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pid, "0D");
        assert_eq!(records[1].value, Some(1726.0));
        assert_eq!(records[1].raw_response, "41 0C 1A F8");

        assert!(matches!(repo.get_records("VIN1", "s2", 10), Err(StorageError::NotFound)));
        assert!(matches!(
            repo.insert_records("", "s1", &[]),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_retention_limit() {
        let repo = Repository::with_max_records(5);
        let speed = processed("41 0D 3C", "010D").await;
        for _ in 0..10 {
            repo.insert_records("VIN1", "s1", &[speed.clone()]).unwrap();
        }

        assert_eq!(repo.record_count(), 5);
        let ids: Vec<i64> = repo.get_records("VIN1", "s1", 10).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 9, 8, 7, 6]);
    }

    #[tokio::test]
    async fn test_limit_data_records() {
        let repo = Repository::new();
        let speed = processed("41 0D 3C", "010D").await;
        repo.insert_records("VIN1", "s1", &vec![speed.clone(); 8]).unwrap();
        repo.insert_records("VIN1", "s2", &vec![speed.clone(); 3]).unwrap();
        repo.insert_records("VIN2", "s1", &vec![speed; 6]).unwrap();

        assert_eq!(repo.limit_data_records(4).unwrap(), 6);
        assert_eq!(repo.record_count(), 11);
        assert_eq!(repo.get_records("VIN1", "s1", 100).unwrap().len(), 4);
        assert_eq!(repo.get_records("VIN1", "s2", 100).unwrap().len(), 3);

        let sessions = repo.sessions("VIN1").unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(repo.delete_session("VIN2", "s1").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_pid_history_across_sessions() {
        let repo = Repository::new();
        repo.insert_records("VIN1", "s1", &[processed("41 0D 10", "010D").await])
            .unwrap();
        repo.insert_records("VIN1", "s2", &[processed("41 0C 1A F8", "010C").await])
            .unwrap();
        repo.insert_records("VIN1", "s2", &[processed("41 0D 20", "010D").await])
            .unwrap();

        let history = repo.get_pid_history("VIN1", "0d", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.pid == "0D"));
    }

    #[tokio::test]
    async fn test_as_processor_sink() {
        let repo = Arc::new(Repository::new());
        let processor = DataProcessor::with_sink(ProcessorConfig::default(), repo.clone());
        processor.start_session("VIN1", "drive-1").await;

        processor.process("41 0C 1A F8", "010C", UnitSystem::Metric).await;
        processor.process("NO DATA", "010D", UnitSystem::Metric).await;
        processor.process("41 0D 3C", "010D", UnitSystem::Metric).await;
        processor.end_session().await;

        let records = repo.get_records("VIN1", "drive-1", 10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].quality, DataQuality::Good);
    }
}
