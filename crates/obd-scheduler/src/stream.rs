//! Periodic PID polling

use crate::initializer::ProtocolInitializer;
use crate::queue::CommandResponse;
use obd_protocol::{ObdCommand, ObdError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Running poll loop. Dropping the handle stops the loop.
pub struct DataStreamHandle {
    rx: mpsc::Receiver<CommandResponse>,
    task: JoinHandle<()>,
}

impl DataStreamHandle {
    /// Next response, `None` once the loop has stopped
    pub async fn recv(&mut self) -> Option<CommandResponse> {
        self.rx.recv().await
    }

    /// Stop polling; responses already received stay readable
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Whether the poll loop has exited or been stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for DataStreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn_poller(
    initializer: Arc<ProtocolInitializer>,
    commands: Vec<String>,
    interval: Duration,
) -> DataStreamHandle {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let task = tokio::spawn(poll_loop(initializer, commands, interval, tx));
    DataStreamHandle { rx, task }
}

async fn poll_loop(
    initializer: Arc<ProtocolInitializer>,
    commands: Vec<String>,
    interval: Duration,
    tx: mpsc::Sender<CommandResponse>,
) {
    info!("Polling {} commands every {:?}", commands.len(), interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !initializer.is_ready() {
            info!("Adapter no longer ready, stopping poll loop");
            return;
        }

        for command in &commands {
            match initializer.queue().execute(ObdCommand::normal(command)).await {
                Ok(response) => {
                    if tx.send(response).await.is_err() {
                        debug!("Stream receiver dropped, stopping poll loop");
                        return;
                    }
                }
                Err(ObdError::QueueClosed) => {
                    info!("Command queue closed, stopping poll loop");
                    return;
                }
                Err(e) => debug!("Poll of {} skipped: {}", command, e),
            }
        }
    }
}
