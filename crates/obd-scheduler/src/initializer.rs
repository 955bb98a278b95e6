//! ELM327 Protocol Initialization
//!
//! Runs the adapter setup sequence through the command queue and gates every
//! vehicle request on its outcome.

use crate::queue::{CommandQueue, CommandResponse};
use crate::stream::{self, DataStreamHandle};
use obd_protocol::decoder::{decode_response, extract_payload};
use obd_protocol::elm::{self, InitStep};
use obd_protocol::{mode, ObdCommand, ObdError, ObdProtocol, Priority, DTC_PID};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Initializer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Adapter identity recorded by a successful initialization
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdapterInfo {
    /// Firmware banner, e.g. "ELM327 v1.5"
    pub elm_version: Option<String>,
    /// Negotiated vehicle protocol
    pub protocol: Option<ObdProtocol>,
    /// Protocol description as reported by `ATDP`
    pub protocol_description: Option<String>,
}

/// Drives adapter setup and issues vehicle requests once it is ready
pub struct ProtocolInitializer {
    queue: Arc<CommandQueue>,
    state: RwLock<InitState>,
    adapter: RwLock<AdapterInfo>,
    last_error: RwLock<Option<String>>,
}

impl ProtocolInitializer {
    /// Create an initializer issuing its commands through `queue`
    pub fn new(queue: Arc<CommandQueue>) -> Self {
        Self {
            queue,
            state: RwLock::new(InitState::Uninitialized),
            adapter: RwLock::new(AdapterInfo::default()),
            last_error: RwLock::new(None),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> InitState {
        *self.state.read()
    }

    /// Whether the setup sequence has completed
    pub fn is_ready(&self) -> bool {
        self.state() == InitState::Ready
    }

    /// Identity recorded by the last successful initialization
    pub fn adapter_info(&self) -> AdapterInfo {
        self.adapter.read().clone()
    }

    /// Reason for the last failed initialization
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// The queue commands are issued through
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Run the setup sequence. May be repeated from any settled state.
    pub async fn initialize(&self) -> Result<AdapterInfo, ObdError> {
        *self.state.write() = InitState::Initializing;
        info!("Initializing ELM327 adapter");

        match self.run_sequence().await {
            Ok(adapter) => {
                info!(
                    "Adapter ready: {} on {}",
                    adapter.elm_version.as_deref().unwrap_or("unknown firmware"),
                    adapter.protocol_description.as_deref().unwrap_or("unknown protocol")
                );
                *self.adapter.write() = adapter.clone();
                *self.last_error.write() = None;
                *self.state.write() = InitState::Ready;
                Ok(adapter)
            }
            Err(e) => {
                error!("Adapter initialization failed: {}", e);
                *self.last_error.write() = Some(e.to_string());
                *self.state.write() = InitState::Failed;
                Err(e)
            }
        }
    }

    async fn run_sequence(&self) -> Result<AdapterInfo, ObdError> {
        let mut banner = String::new();
        for step in InitStep::SETUP {
            let reply = self.run_step(step).await?;
            if step == InitStep::Reset {
                banner = reply;
            }
        }

        let identity = self.run_step(InitStep::Identify).await?;
        let description = self.run_step(InitStep::DescribeProtocol).await?;

        let elm_version = elm::parse_version(&identity).or_else(|| elm::parse_version(&banner));
        let protocol = ObdProtocol::from_description(&description);
        if protocol.is_none() {
            warn!("Unrecognized protocol description {:?}", description);
        }

        Ok(AdapterInfo {
            elm_version,
            protocol,
            protocol_description: Some(description).filter(|d| !d.is_empty()),
        })
    }

    async fn run_step(&self, step: InitStep) -> Result<String, ObdError> {
        let failed = |reason: String| ObdError::InitializationFailed {
            step: step.to_string(),
            reason,
        };

        debug!("Init step {}", step);
        let response = self
            .queue
            .execute(ObdCommand::critical(step.command()))
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.success {
            return Err(failed(response.error.unwrap_or_else(|| "no response".to_string())));
        }

        let reply = response.raw_response.unwrap_or_default();
        if elm::is_error_response(&reply) {
            return Err(failed(format!("adapter replied {:?}", reply)));
        }
        if step.expects_ok() && !reply.to_ascii_uppercase().contains("OK") {
            return Err(failed(format!("expected OK, got {:?}", reply)));
        }
        Ok(reply)
    }

    /// Fail fast unless the adapter is ready
    pub fn ensure_ready(&self) -> Result<(), ObdError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ObdError::NotInitialized)
        }
    }

    /// Issue a command through the queue once initialized. A command that
    /// exhausted its retries is returned with `success == false`.
    pub async fn send_obd_command(
        &self,
        command: &str,
        priority: Priority,
    ) -> Result<CommandResponse, ObdError> {
        self.ensure_ready()?;
        self.queue.execute(ObdCommand::new(command, priority)).await
    }

    /// Send a command and return its reply, mapping failures to errors
    async fn request(&self, command: &str, priority: Priority) -> Result<String, ObdError> {
        let response = self.send_obd_command(command, priority).await?;
        if !response.success {
            return Err(ObdError::CommandFailed {
                command: response.command,
                reason: response.error.unwrap_or_default(),
            });
        }
        Ok(response.raw_response.unwrap_or_default())
    }

    /// Select a vehicle protocol (`ATSPx`) instead of automatic detection and
    /// record what the adapter reports afterwards
    pub async fn set_protocol(&self, protocol: ObdProtocol) -> Result<AdapterInfo, ObdError> {
        let reply = self.request(protocol.to_elm_command(), Priority::Critical).await?;
        if elm::is_error_response(&reply) || !reply.to_ascii_uppercase().contains("OK") {
            warn!("Adapter rejected {}: {:?}", protocol.to_elm_command(), reply);
            return Err(ObdError::UnsupportedProtocol(protocol.to_string()));
        }

        let description = self
            .request(InitStep::DescribeProtocol.command(), Priority::Critical)
            .await?;
        let mut adapter = self.adapter.write();
        adapter.protocol = ObdProtocol::from_description(&description).or(Some(protocol));
        adapter.protocol_description = Some(description).filter(|d| !d.is_empty());
        info!("Protocol set to {}", protocol);
        Ok(adapter.clone())
    }

    /// Read stored trouble codes (mode 03); no codes yields an empty list
    pub async fn read_dtcs(&self) -> Result<Vec<String>, ObdError> {
        let reply = self.request("03", Priority::High).await?;
        if is_no_data(&reply) {
            return Ok(Vec::new());
        }

        let parsed = decode_response(mode::READ_DTC, DTC_PID, &reply);
        let codes = parsed
            .string_value
            .ok_or_else(|| ObdError::InvalidResponse(reply.clone()))?;
        Ok(codes
            .split(',')
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Clear stored trouble codes and the MIL (mode 04)
    pub async fn clear_dtcs(&self) -> Result<(), ObdError> {
        let reply = self.request("04", Priority::Critical).await?;
        if extract_payload(mode::CLEAR_DTC, DTC_PID, &reply).is_none() {
            return Err(ObdError::InvalidResponse(reply));
        }
        info!("Trouble codes cleared");
        Ok(())
    }

    /// Read the vehicle identification number (mode 09 PID 02)
    pub async fn read_vin(&self) -> Result<String, ObdError> {
        let reply = self.request("0902", Priority::High).await?;
        if is_no_data(&reply) {
            return Err(ObdError::PidNotSupported("0902".to_string()));
        }
        decode_response(mode::VEHICLE_INFO, "02", &reply)
            .string_value
            .ok_or(ObdError::InvalidResponse(reply))
    }

    /// PIDs 01–20 the vehicle reports as supported (mode 01 PID 00)
    pub async fn supported_pids(&self) -> Result<Vec<String>, ObdError> {
        let reply = self.request("0100", Priority::High).await?;
        let list = decode_response(mode::CURRENT_DATA, "00", &reply)
            .string_value
            .ok_or(ObdError::InvalidResponse(reply))?;
        Ok(list
            .split(',')
            .filter(|pid| !pid.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Supply voltage measured by the adapter (`ATRV`)
    pub async fn read_battery_voltage(&self) -> Result<f64, ObdError> {
        let reply = self.request(elm::READ_VOLTAGE, Priority::Normal).await?;
        parse_voltage(&reply).ok_or(ObdError::InvalidResponse(reply))
    }

    /// Poll `commands` at NORMAL priority every `interval` until the handle
    /// is stopped or dropped, or the adapter leaves the ready state.
    pub fn start_data_stream(
        self: &Arc<Self>,
        commands: Vec<String>,
        interval: Duration,
    ) -> Result<DataStreamHandle, ObdError> {
        self.ensure_ready()?;
        Ok(stream::spawn_poller(Arc::clone(self), commands, interval))
    }
}

fn is_no_data(reply: &str) -> bool {
    let compact: String = reply
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    compact.contains("NODATA")
}

fn parse_voltage(reply: &str) -> Option<f64> {
    reply
        .trim()
        .trim_end_matches(['V', 'v'])
        .trim()
        .parse::<f64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use obd_protocol::transport::{MockHandle, MockReply, MockTransport};

    fn initializer() -> (Arc<ProtocolInitializer>, MockHandle) {
        let transport = MockTransport::new();
        let mock = transport.handle();
        let queue = Arc::new(CommandQueue::spawn(Box::new(transport), QueueConfig::default()));
        (Arc::new(ProtocolInitializer::new(queue)), mock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_sequence() {
        let (init, mock) = initializer();
        assert_eq!(init.state(), InitState::Uninitialized);

        let adapter = init.initialize().await.unwrap();

        assert_eq!(init.state(), InitState::Ready);
        assert_eq!(adapter.elm_version.as_deref(), Some("ELM327 v1.5"));
        assert_eq!(adapter.protocol, Some(ObdProtocol::Iso15765_4Can11bit500));
        assert_eq!(
            mock.writes(),
            vec!["ATZ", "ATE0", "ATL0", "ATS0", "ATH1", "ATSP0", "ATI", "ATDP"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_mark_fails_step() {
        let (init, mock) = initializer();
        mock.script("ATH1", MockReply::Respond("?".into()));

        let err = init.initialize().await.unwrap_err();

        match err {
            ObdError::InitializationFailed { step, .. } => assert!(step.contains("ATH1")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(init.state(), InitState::Failed);
        assert!(init.last_error().is_some());
        // Nothing after the failing step is sent
        assert_eq!(mock.writes(), vec!["ATZ", "ATE0", "ATL0", "ATS0", "ATH1"]);

        // Re-initialization recovers
        init.initialize().await.unwrap();
        assert!(init.is_ready());
        assert!(init.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_adapter_fails_after_retries() {
        let (init, mock) = initializer();
        for _ in 0..3 {
            mock.script("ATZ", MockReply::Silent);
        }

        let err = init.initialize().await.unwrap_err();
        assert!(matches!(err, ObdError::InitializationFailed { .. }));
        assert_eq!(mock.writes(), vec!["ATZ", "ATZ", "ATZ"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_require_ready() {
        let (init, mock) = initializer();

        let result = init.send_obd_command("010C", Priority::Normal).await;
        assert!(matches!(result, Err(ObdError::NotInitialized)));
        assert!(matches!(
            init.start_data_stream(vec!["010C".into()], Duration::from_secs(1)),
            Err(ObdError::NotInitialized)
        ));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_protocol() {
        let (init, mock) = initializer();
        assert!(matches!(
            init.set_protocol(ObdProtocol::J1850Vpw).await,
            Err(ObdError::NotInitialized)
        ));
        init.initialize().await.unwrap();

        mock.set_default("ATSP7", "OK");
        mock.set_default("ATDP", "ISO 15765-4 (CAN 29/500)");
        let adapter = init.set_protocol(ObdProtocol::Iso15765_4Can29bit500).await.unwrap();
        assert_eq!(adapter.protocol, Some(ObdProtocol::Iso15765_4Can29bit500));
        assert_eq!(init.adapter_info(), adapter);
        assert_eq!(mock.writes()[8..], ["ATSP7", "ATDP"]);

        // Unknown to this adapter
        let err = init.set_protocol(ObdProtocol::SaeJ1939).await.unwrap_err();
        assert!(matches!(err, ObdError::UnsupportedProtocol(_)));
        assert_eq!(init.adapter_info(), adapter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostic_reads() {
        let (init, mock) = initializer();
        init.initialize().await.unwrap();

        assert_eq!(init.read_dtcs().await.unwrap(), vec!["P0171", "P0300"]);
        assert_eq!(init.read_vin().await.unwrap(), "1D4GP00R55B123456");
        assert_eq!(init.read_battery_voltage().await.unwrap(), 12.6);
        init.clear_dtcs().await.unwrap();

        let supported = init.supported_pids().await.unwrap();
        assert!(supported.contains(&"0C".to_string()));
        assert!(supported.contains(&"0D".to_string()));

        mock.script("03", MockReply::Respond("NO DATA".into()));
        assert!(init.read_dtcs().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_is_reported() {
        let (init, mock) = initializer();
        init.initialize().await.unwrap();
        for _ in 0..3 {
            mock.script("0902", MockReply::Silent);
        }

        let response = init.send_obd_command("0104", Priority::Normal).await.unwrap();
        assert!(response.success);
        assert!(matches!(init.read_vin().await, Err(ObdError::CommandFailed { .. })));
    }

    #[test]
    fn test_parse_voltage() {
        assert_eq!(parse_voltage("12.6V"), Some(12.6));
        assert_eq!(parse_voltage(" 14.1 V "), Some(14.1));
        assert_eq!(parse_voltage("?"), None);
    }
}
