//! Pipeline configuration
//!
//! Layered from an optional TOML file and `OBD__`-prefixed environment
//! variables, e.g. `OBD__TRANSPORT__TYPE=tcp` or `OBD__POLL__INTERVAL_MS=500`.

use data_processor::{ProcessorConfig, UnitSystem};
use obd_protocol::{ObdProtocol, TransportConfig};
use obd_scheduler::QueueConfig;
use serde::Deserialize;
use std::time::Duration;

/// Config file used when none is given on the command line or in
/// `OBD_PIPELINE_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub transport: TransportConfig,
    pub queue: QueueConfig,
    pub processor: ProcessorConfig,
    pub poll: PollConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
}

/// What to poll and how often
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// OBD requests issued every cycle
    pub commands: Vec<String>,
    pub interval_ms: u64,
    pub unit_system: UnitSystem,
    /// Stop after this many responses (dry runs)
    pub max_responses: Option<usize>,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            commands: ["010C", "010D", "0105", "0104", "0111", "010F"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            interval_ms: 1000,
            unit_system: UnitSystem::Metric,
            max_responses: None,
        }
    }
}

/// Session identity
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Vehicle key; read from the VIN when unset
    pub vehicle_id: Option<String>,
    /// Read stored trouble codes at startup
    pub read_dtcs_on_start: bool,
    /// Vehicle protocol to select instead of automatic detection
    pub protocol: Option<ObdProtocol>,
}

/// Repository retention
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub max_records_per_session: usize,
    /// Trim sessions to this many records every `retention_every` records
    pub retention_limit: Option<usize>,
    pub retention_every: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_records_per_session: 100_000,
            retention_limit: None,
            retention_every: 1000,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Record output
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print every record to stdout as a JSON line
    pub print_json: bool,
}

/// Load configuration from `path` (extension optional, file optional) and the
/// environment
pub fn load_config(path: &str) -> anyhow::Result<PipelineConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("OBD")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("poll.commands"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
