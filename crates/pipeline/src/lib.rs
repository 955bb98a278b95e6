//! OBD-II Pipeline
//!
//! Wires a transport, the command queue, adapter initialization, PID polling,
//! the data processor and the record repository into one running pipeline.

mod config;

pub use config::{
    load_config, LoggingConfig, OutputConfig, PipelineConfig, PollConfig, SessionConfig,
    StorageConfig, DEFAULT_CONFIG_PATH,
};

use anyhow::Context;
use data_processor::{DataProcessor, ProcessingStats};
use obd_protocol::create_transport;
use obd_scheduler::{AdapterInfo, CommandQueue, CommandResponse, ProtocolInitializer};
use serde::Serialize;
use std::sync::Arc;
use storage::Repository;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Outcome of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub vehicle_id: String,
    pub session_id: String,
    pub adapter: AdapterInfo,
    pub trouble_codes: Vec<String>,
    pub responses: usize,
    pub stats: ProcessingStats,
    pub records_stored: usize,
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log filter")?;

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

/// Run until interrupted (or until `poll.max_responses` responses)
pub async fn run(config: PipelineConfig) -> anyhow::Result<RunSummary> {
    let transport = create_transport(&config.transport);
    info!("Using adapter {}", transport.describe());

    let queue = Arc::new(CommandQueue::spawn(transport, config.queue.clone()));
    let initializer = Arc::new(ProtocolInitializer::new(Arc::clone(&queue)));
    let adapter = initializer
        .initialize()
        .await
        .context("adapter initialization failed")?;
    let adapter = match config.session.protocol {
        Some(protocol) => initializer
            .set_protocol(protocol)
            .await
            .with_context(|| format!("could not select protocol {}", protocol))?,
        None => adapter,
    };

    let repository = Arc::new(Repository::with_max_records(config.storage.max_records_per_session));
    let processor = DataProcessor::with_sink(config.processor.clone(), repository.clone());

    let vehicle_id = match &config.session.vehicle_id {
        Some(id) => id.clone(),
        None => match initializer.read_vin().await {
            Ok(vin) => vin.trim().to_string(),
            Err(e) => {
                warn!("Could not read VIN: {}", e);
                "unknown".to_string()
            }
        },
    };
    let session_id = uuid::Uuid::new_v4().to_string();
    processor.start_session(&vehicle_id, &session_id).await;

    let trouble_codes = if config.session.read_dtcs_on_start {
        match initializer.read_dtcs().await {
            Ok(codes) => {
                if codes.is_empty() {
                    info!("No stored trouble codes");
                } else {
                    warn!("Stored trouble codes: {}", codes.join(", "));
                }
                codes
            }
            Err(e) => {
                warn!("Could not read trouble codes: {}", e);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let mut stream = initializer.start_data_stream(config.poll.commands.clone(), config.poll.interval())?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut responses = 0usize;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            response = stream.recv() => {
                let Some(response) = response else {
                    warn!("Poll loop ended");
                    break;
                };
                responses += 1;
                handle_response(&config, &processor, &repository, response, responses).await?;
                if config.poll.max_responses.is_some_and(|max| responses >= max) {
                    break;
                }
            }
        }
    }

    stream.stop();
    processor.end_session().await;
    queue.shutdown().await;

    let stats = processor.stats();
    info!(
        "Processed {} responses ({} valid, {:.1}% success)",
        stats.total_processed,
        stats.valid_data,
        stats.success_rate * 100.0
    );

    Ok(RunSummary {
        vehicle_id,
        session_id,
        adapter,
        trouble_codes,
        responses,
        stats,
        records_stored: repository.record_count(),
    })
}

async fn handle_response(
    config: &PipelineConfig,
    processor: &DataProcessor,
    repository: &Repository,
    response: CommandResponse,
    count: usize,
) -> anyhow::Result<()> {
    if !response.success {
        warn!(
            "{} failed after {} attempts: {}",
            response.command,
            response.attempt,
            response.error.as_deref().unwrap_or("unknown error")
        );
        return Ok(());
    }

    let raw = response.raw_response.unwrap_or_default();
    if let Some(record) = processor
        .process(&raw, &response.command, config.poll.unit_system)
        .await
    {
        if config.output.print_json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            info!(
                "{}: {} {} [{:?}]",
                record.name,
                record
                    .value
                    .map(|v| format!("{:.2}", v))
                    .or_else(|| record.text_value.clone())
                    .unwrap_or_default(),
                record.unit,
                record.quality
            );
        }
    }

    if let Some(limit) = config.storage.retention_limit {
        if count as u64 % config.storage.retention_every.max(1) == 0 {
            repository.limit_data_records(limit)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_processor::UnitSystem;
    use obd_protocol::TransportConfig;

    fn dry_run_config(max_responses: usize) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.transport = TransportConfig::Mock;
        config.poll.commands = vec!["010C".into(), "010D".into(), "0105".into()];
        config.poll.interval_ms = 100;
        config.poll.max_responses = Some(max_responses);
        config.session.read_dtcs_on_start = true;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_against_mock_adapter() {
        let summary = run(dry_run_config(6)).await.unwrap();

        assert_eq!(summary.vehicle_id, "1D4GP00R55B123456");
        assert_eq!(summary.adapter.elm_version.as_deref(), Some("ELM327 v1.5"));
        assert_eq!(summary.trouble_codes, vec!["P0171", "P0300"]);
        assert_eq!(summary.responses, 6);
        assert_eq!(summary.stats.total_processed, 6);
        assert_eq!(summary.stats.valid_data, 6);
        assert_eq!(summary.records_stored, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_pid_counts_as_invalid() {
        let mut config = dry_run_config(4);
        config.poll.commands = vec!["010D".into(), "01A6".into()];
        config.poll.unit_system = UnitSystem::Imperial;
        config.session.vehicle_id = Some("TEST".into());
        config.session.protocol = Some(obd_protocol::ObdProtocol::Auto);
        config.storage.retention_limit = Some(1);
        config.storage.retention_every = 2;

        let summary = run(config).await.unwrap();

        assert_eq!(summary.vehicle_id, "TEST");
        assert_eq!(summary.adapter.protocol, Some(obd_protocol::ObdProtocol::Iso15765_4Can11bit500));
        assert_eq!(summary.stats.valid_data, 2);
        assert_eq!(summary.stats.invalid_data, 2);
        assert_eq!(summary.records_stored, 1);
    }
}
