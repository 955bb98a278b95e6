//! Mock transport simulating an ELM327 adapter
//!
//! Replies are looked up per command: one-shot scripted replies first, then
//! the built-in defaults of a healthy adapter on a CAN vehicle. The shared
//! [`MockHandle`] stays usable after the transport has been moved into a queue.

use super::{Transport, TransportError};
use crate::elm::PROMPT;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How the simulated adapter answers one command
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer immediately with this text (lines separated by `\r` or `\n`)
    Respond(String),
    /// Answer after a delay
    Delayed(Duration, String),
    /// Never answer; reads time out
    Silent,
    /// Fail the write itself
    WriteError(String),
}

#[derive(Default)]
struct MockState {
    connected: bool,
    scripted: HashMap<String, VecDeque<MockReply>>,
    defaults: HashMap<String, String>,
    writes: Vec<String>,
    pending: VecDeque<(Instant, String)>,
    awaiting_prompt: bool,
    overlapping_writes: usize,
}

/// Simulated adapter
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Inspection and scripting handle for a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a mock adapter with the default replies
    pub fn new() -> Self {
        let state = MockState {
            defaults: default_replies(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Handle for scripting replies and inspecting traffic
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Queue a one-shot reply for the next occurrence of `command`
    pub fn script(&self, command: &str, reply: MockReply) {
        self.state
            .lock()
            .scripted
            .entry(command.to_ascii_uppercase())
            .or_default()
            .push_back(reply);
    }

    /// Replace the standing reply for `command`
    pub fn set_default(&self, command: &str, response: &str) {
        self.state
            .lock()
            .defaults
            .insert(command.to_ascii_uppercase(), response.to_string());
    }

    /// Commands written so far, without the trailing carriage return
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    /// Number of times a command was written while an earlier one was still
    /// waiting for its prompt
    pub fn overlapping_writes(&self) -> usize {
        self.state.lock().overlapping_writes
    }

    /// Whether the transport is connected
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

fn default_replies() -> HashMap<String, String> {
    [
        ("ATZ", "ELM327 v1.5"),
        ("ATI", "ELM327 v1.5"),
        ("ATE0", "OK"),
        ("ATL0", "OK"),
        ("ATS0", "OK"),
        ("ATH1", "OK"),
        ("ATSP0", "OK"),
        ("ATDP", "AUTO, ISO 15765-4 (CAN 11/500)"),
        ("ATRV", "12.6V"),
        ("0100", "7E8 06 41 00 BE 1F A8 13"),
        ("0104", "7E8 03 41 04 80"),
        ("0105", "7E8 03 41 05 5F"),
        ("010B", "7E8 03 41 0B 65"),
        ("010C", "7E8 04 41 0C 1A F8"),
        ("010D", "7E8 03 41 0D 3C"),
        ("010F", "7E8 03 41 0F 46"),
        ("0110", "7E8 04 41 10 01 F4"),
        ("0111", "7E8 03 41 11 33"),
        ("012F", "7E8 03 41 2F 99"),
        ("0142", "7E8 04 41 42 31 38"),
        ("03", "7E8 06 43 02 01 71 03 00"),
        ("04", "7E8 01 44"),
        (
            "0902",
            "7E8 10 14 49 02 01 31 44 34\r7E8 21 47 50 30 30 52 35 35\r7E8 22 42 31 32 33 34 35 36",
        ),
    ]
    .into_iter()
    .map(|(command, reply)| (command.to_string(), reply.to_string()))
    .collect()
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.state.lock().connected = true;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }

        let command = String::from_utf8_lossy(data).trim().to_ascii_uppercase();
        if state.awaiting_prompt {
            state.overlapping_writes += 1;
        }
        state.writes.push(command.clone());
        // New input aborts a reply the adapter has not sent yet. Output that
        // already reached the host stays buffered until discarded.
        let now = Instant::now();
        state.pending.retain(|(ready_at, _)| *ready_at <= now);

        let scripted = state.scripted.get_mut(&command).and_then(VecDeque::pop_front);
        let reply = match scripted {
            Some(reply) => reply,
            None => {
                let fallback = if command.starts_with("AT") { "?" } else { "NO DATA" };
                let text = state.defaults.get(&command).map(String::as_str).unwrap_or(fallback);
                MockReply::Respond(text.to_string())
            }
        };

        let (delay, text) = match reply {
            MockReply::Respond(text) => (Duration::ZERO, text),
            MockReply::Delayed(delay, text) => (delay, text),
            MockReply::Silent => {
                state.awaiting_prompt = false;
                return Ok(());
            }
            MockReply::WriteError(message) => {
                state.awaiting_prompt = false;
                return Err(TransportError::Io(message));
            }
        };

        let ready_at = Instant::now() + delay;
        for line in text.split(['\r', '\n']) {
            state.pending.push_back((ready_at, line.to_string()));
        }
        state.pending.push_back((ready_at, String::new()));
        state.pending.push_back((ready_at, PROMPT.to_string()));
        state.awaiting_prompt = true;
        Ok(())
    }

    async fn discard_input(&mut self) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let now = Instant::now();
        let mut discarded = 0;
        while let Some((ready_at, _)) = state.pending.front() {
            if *ready_at > now {
                break;
            }
            if let Some((_, line)) = state.pending.pop_front() {
                discarded += line.len() + 1;
            }
        }
        Ok(discarded)
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let deadline = Instant::now() + timeout;
        let next = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            match state.pending.front() {
                Some((ready_at, _)) if *ready_at <= deadline => state.pending.pop_front(),
                _ => None,
            }
        };

        match next {
            Some((ready_at, line)) => {
                tokio::time::sleep_until(ready_at).await;
                if line.contains(PROMPT) {
                    self.state.lock().awaiting_prompt = false;
                }
                Ok(line)
            }
            None => {
                tokio::time::sleep_until(deadline).await;
                self.state.lock().awaiting_prompt = false;
                Err(TransportError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.pending.clear();
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn describe(&self) -> String {
        "mock://elm327".to_string()
    }
}
