//! Command model shared by the queue and the processing pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling priority of a command.
///
/// Dequeue order is taken from [`Priority::rank`], never from the
/// declaration order of the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Adapter resets and fault-code clearing
    Critical,
    /// User-initiated reads
    High,
    /// Routine polling
    Normal,
    /// Opportunistic reads
    Low,
    /// Background batch work
    Batch,
}

impl Priority {
    /// Scheduling rank, lower runs first
    pub const fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Batch => 4,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// An immutable request for the adapter: an AT command or a hex OBD request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObdCommand {
    /// Command text without the trailing carriage return (e.g. "ATZ", "010C")
    pub command: String,
    /// Scheduling priority
    pub priority: Priority,
}

impl ObdCommand {
    /// Create a command, normalizing whitespace and case
    pub fn new(command: impl AsRef<str>, priority: Priority) -> Self {
        let command = command
            .as_ref()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        Self { command, priority }
    }

    /// Create a command at normal priority
    pub fn normal(command: impl AsRef<str>) -> Self {
        Self::new(command, Priority::Normal)
    }

    /// Create a command at critical priority
    pub fn critical(command: impl AsRef<str>) -> Self {
        Self::new(command, Priority::Critical)
    }

    /// Parse the mode and PID of an OBD request
    pub fn request(&self) -> Option<ObdRequest> {
        ObdRequest::parse(&self.command)
    }
}

impl fmt::Display for ObdCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}

/// Label used as the PID key for mode 03 / 07 / 0A fault-code reads
pub const DTC_PID: &str = "DTC";

/// Mode and PID of an OBD request such as `010C` or `03`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObdRequest {
    /// Service/mode byte
    pub mode: u8,
    /// Parameter ID, absent for modes without one (03, 04, 07, 0A)
    pub pid: Option<u8>,
}

impl ObdRequest {
    /// Parse a request string; AT commands and malformed hex return `None`
    pub fn parse(command: &str) -> Option<Self> {
        let command: String = command.chars().filter(|c| !c.is_whitespace()).collect();
        if command.len() < 2 || command.to_ascii_uppercase().starts_with("AT") {
            return None;
        }

        let mode = u8::from_str_radix(command.get(0..2)?, 16).ok()?;
        match command.len() {
            2 => Some(Self { mode, pid: None }),
            // A trailing single digit is the ELM327 expected-response-count suffix
            4 | 5 => {
                let pid = u8::from_str_radix(command.get(2..4)?, 16).ok()?;
                Some(Self { mode, pid: Some(pid) })
            }
            _ => None,
        }
    }

    /// PID key used throughout the pipeline ("0C", or "DTC" for fault-code modes)
    pub fn pid_key(&self) -> String {
        match self.pid {
            Some(pid) => format!("{:02X}", pid),
            None => DTC_PID.to_string(),
        }
    }
}
