//! Priority Command Queue
//!
//! All traffic for one adapter flows through a single worker task that owns
//! the transport, so at most one command is ever awaiting a response.
//! Cancellation is cooperative: it is observed between attempts and before a
//! response is delivered, never in the middle of a transport exchange.

use crate::config::QueueConfig;
use obd_protocol::transport::{self, Transport, TransportError};
use obd_protocol::{ObdCommand, ObdError};
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Identifier assigned to each enqueued command, monotonically increasing
pub type CommandId = u64;

/// Completion callback attached to a single command
pub type ResponseCallback = Box<dyn FnOnce(&CommandResponse) + Send + 'static>;

/// Outcome of one queued command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    /// Identifier assigned at enqueue
    pub command_id: CommandId,
    /// Command text that was sent
    pub command: String,
    /// Response with framing removed, if the exchange completed
    pub raw_response: Option<String>,
    /// Whether an attempt completed
    pub success: bool,
    /// Last error when every attempt failed
    pub error: Option<String>,
    /// Time from first attempt to outcome
    pub execution_time_ms: u64,
    /// Attempt that produced this outcome (1-based)
    pub attempt: u32,
}

/// A command owned by the queue from enqueue until its outcome
pub struct QueuedCommand {
    /// Identifier assigned at enqueue
    pub id: CommandId,
    /// The request
    pub command: ObdCommand,
    /// Enqueue time
    pub enqueued_at: Instant,
    cancelled: Arc<AtomicBool>,
    callback: Option<ResponseCallback>,
}

impl QueuedCommand {
    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

impl Eq for QueuedCommand {}

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for the max-heap: lowest rank first, then oldest, then
        // lowest id for commands enqueued within the same instant
        other
            .command
            .priority
            .rank()
            .cmp(&self.command.priority.rank())
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// State shared between queue handles and the worker
struct QueueShared {
    config: QueueConfig,
    pending: Mutex<BinaryHeap<QueuedCommand>>,
    /// Command currently executing and its cancellation flag.
    /// Lock order: `pending` before `active`.
    active: Mutex<Option<(CommandId, Arc<AtomicBool>)>>,
    wakeup: Notify,
    next_id: AtomicU64,
    closed: AtomicBool,
    responses: broadcast::Sender<CommandResponse>,
}

/// Priority queue serializing all commands onto one transport
pub struct CommandQueue {
    shared: Arc<QueueShared>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Create a queue for `transport`. Commands may be enqueued right away but
    /// nothing executes until [`CommandQueue::start`].
    pub fn new(transport: Box<dyn Transport>, config: QueueConfig) -> Self {
        let (responses, _) = broadcast::channel(config.response_channel_capacity.max(1));
        Self {
            shared: Arc::new(QueueShared {
                config,
                pending: Mutex::new(BinaryHeap::new()),
                active: Mutex::new(None),
                wakeup: Notify::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                responses,
            }),
            transport: Mutex::new(Some(transport)),
            worker: Mutex::new(None),
        }
    }

    /// Create a queue and start its worker
    pub fn spawn(transport: Box<dyn Transport>, config: QueueConfig) -> Self {
        let queue = Self::new(transport, config);
        queue.start();
        queue
    }

    /// Start the worker task. Must be called within a tokio runtime.
    pub fn start(&self) {
        let Some(transport) = self.transport.lock().take() else {
            warn!("Command queue worker already started");
            return;
        };
        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(tokio::spawn(run_worker(shared, transport)));
    }

    /// Enqueue a command; returns immediately with its identifier
    pub fn enqueue(&self, command: ObdCommand) -> CommandId {
        self.push(command, None)
    }

    /// Enqueue a command with a completion callback
    pub fn enqueue_with_callback(&self, command: ObdCommand, callback: ResponseCallback) -> CommandId {
        self.push(command, Some(callback))
    }

    /// Enqueue a command and wait for its outcome
    pub async fn execute(&self, command: ObdCommand) -> Result<CommandResponse, ObdError> {
        let (tx, rx) = oneshot::channel();
        let id = self.enqueue_with_callback(
            command,
            Box::new(move |response| {
                let _ = tx.send(response.clone());
            }),
        );
        rx.await.map_err(|_| {
            if self.shared.closed.load(AtomicOrdering::SeqCst) {
                ObdError::QueueClosed
            } else {
                ObdError::Cancelled(id)
            }
        })
    }

    fn push(&self, command: ObdCommand, callback: Option<ResponseCallback>) -> CommandId {
        let id = self.shared.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        if self.shared.closed.load(AtomicOrdering::SeqCst) {
            warn!("Command queue closed, dropping {} (id {})", command, id);
            return id;
        }

        debug!("Enqueued {} (id {}, {:?})", command, id, command.priority);
        self.shared.pending.lock().push(QueuedCommand {
            id,
            command,
            enqueued_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
            callback,
        });
        self.shared.wakeup.notify_one();
        id
    }

    /// Cancel a command. A pending command is removed; the executing command
    /// is flagged so its remaining attempts and its response are suppressed.
    pub fn cancel(&self, id: CommandId) -> bool {
        let mut pending = self.shared.pending.lock();
        let before = pending.len();
        pending.retain(|queued| queued.id != id);
        if pending.len() != before {
            debug!("Cancelled pending command {}", id);
            return true;
        }

        if let Some((active_id, cancelled)) = self.shared.active.lock().as_ref() {
            if *active_id == id {
                debug!("Cancelling in-flight command {}", id);
                cancelled.store(true, AtomicOrdering::SeqCst);
                return true;
            }
        }
        false
    }

    /// Drop every pending command; an in-flight exchange is unaffected.
    /// Returns the number of commands removed.
    pub fn clear(&self) -> usize {
        let mut pending = self.shared.pending.lock();
        let removed = pending.len();
        pending.clear();
        if removed > 0 {
            info!("Cleared {} pending commands", removed);
        }
        removed
    }

    /// Subscribe to every command outcome from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CommandResponse> {
        self.shared.responses.subscribe()
    }

    /// Number of commands waiting to execute
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Whether a command is currently executing
    pub fn is_busy(&self) -> bool {
        self.shared.active.lock().is_some()
    }

    /// Queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Stop the worker after the in-flight command; pending commands are dropped
    /// and the transport is disconnected.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, AtomicOrdering::SeqCst);
        self.shared.wakeup.notify_one();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Command queue worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shared.closed.store(true, AtomicOrdering::SeqCst);
        self.shared.wakeup.notify_one();
    }
}

async fn run_worker(shared: Arc<QueueShared>, mut transport: Box<dyn Transport>) {
    info!("Command queue worker started on {}", transport.describe());

    while !shared.closed.load(AtomicOrdering::SeqCst) {
        let next = {
            let mut pending = shared.pending.lock();
            let next = pending.pop();
            if let Some(queued) = &next {
                *shared.active.lock() = Some((queued.id, Arc::clone(&queued.cancelled)));
            }
            next
        };

        let Some(queued) = next else {
            shared.wakeup.notified().await;
            continue;
        };

        let outcome = execute_with_retry(
            &shared.config,
            transport.as_mut(),
            queued.id,
            &queued.command,
            &queued.cancelled,
        )
        .await;
        *shared.active.lock() = None;

        match outcome {
            Some(response) if !queued.is_cancelled() => deliver(&shared, queued, response),
            _ => debug!("Command {} cancelled, response suppressed", queued.id),
        }
    }

    let dropped = {
        let mut pending = shared.pending.lock();
        let dropped = pending.len();
        pending.clear();
        dropped
    };
    transport.disconnect().await;
    info!("Command queue worker stopped ({} pending commands dropped)", dropped);
}

/// Run the attempts for one command. `None` when cancellation was observed.
async fn execute_with_retry(
    config: &QueueConfig,
    transport: &mut dyn Transport,
    id: CommandId,
    command: &ObdCommand,
    cancelled: &AtomicBool,
) -> Option<CommandResponse> {
    let started = Instant::now();
    let max_attempts = config.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if cancelled.load(AtomicOrdering::SeqCst) {
            return None;
        }

        debug!("-> {} (id {}, attempt {}/{})", command, id, attempt, max_attempts);
        match attempt_exchange(config, transport, &command.command).await {
            Ok(raw) => {
                let elapsed = started.elapsed().as_millis() as u64;
                metrics::counter!("obd_commands_total", "outcome" => "success").increment(1);
                metrics::histogram!("obd_command_duration_ms").record(elapsed as f64);
                return Some(CommandResponse {
                    command_id: id,
                    command: command.command.clone(),
                    raw_response: Some(raw),
                    success: true,
                    error: None,
                    execution_time_ms: elapsed,
                    attempt,
                });
            }
            Err(e) => {
                warn!(
                    "{} (id {}) attempt {}/{} failed: {}",
                    command, id, attempt, max_attempts, e
                );
                last_error = e.to_string();
            }
        }

        if attempt < max_attempts {
            if cancelled.load(AtomicOrdering::SeqCst) {
                return None;
            }
            tokio::time::sleep(config.retry_delay(attempt)).await;
        }
    }

    metrics::counter!("obd_commands_total", "outcome" => "failure").increment(1);
    Some(CommandResponse {
        command_id: id,
        command: command.command.clone(),
        raw_response: None,
        success: false,
        error: Some(last_error),
        execution_time_ms: started.elapsed().as_millis() as u64,
        attempt: max_attempts,
    })
}

/// One bounded exchange, reconnecting first if the link has dropped
async fn attempt_exchange(
    config: &QueueConfig,
    transport: &mut dyn Transport,
    command: &str,
) -> Result<String, TransportError> {
    let timeout = config.command_timeout();
    let exchange = async move {
        if !transport.is_connected() {
            info!("Connecting {}", transport.describe());
            transport.connect().await?;
        }
        transport::send_command(transport, command, timeout).await
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
    }
}

fn deliver(shared: &QueueShared, queued: QueuedCommand, response: CommandResponse) {
    debug!(
        "<- {} (id {}) success={} in {}ms",
        response.command, response.command_id, response.success, response.execution_time_ms
    );
    // No subscribers is not an error
    let _ = shared.responses.send(response.clone());
    if let Some(callback) = queued.callback {
        callback(&response);
    }
}
