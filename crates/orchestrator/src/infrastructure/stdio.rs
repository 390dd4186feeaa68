//! Newline-delimited JSON adapter for the collaborators.
//!
//! Events are read from an input stream one JSON object per line, and every
//! scene, window and instance command is written as one JSON object per line
//! by a single writer task.

use std::io::BufRead;

use api_types::BatchMode;
use api_types::InboundEvent;
use api_types::InstanceId;
use api_types::OutboundCommand;
use api_types::SceneCommand;
use api_types::WindowCommand;
use api_types::WindowRef;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::ports::ControlError;
use crate::domain::ports::InstanceControl;
use crate::domain::ports::SceneSink;
use crate::domain::ports::WindowError;
use crate::domain::ports::WindowSystem;

/// Forwards decoded events until the input ends, the token is cancelled or
/// the receiver is gone.
///
/// Blocks the calling thread; run it on a dedicated thread. Malformed lines
/// are logged and skipped. Returning drops `sender`, which the controller
/// treats as an upstream failure.
pub fn read_events<R>(
    reader: R,
    sender: mpsc::Sender<InboundEvent>,
    cancellation_token: CancellationToken,
) -> std::io::Result<()>
where
    R: BufRead,
{
    for line in reader.lines() {
        if cancellation_token.is_cancelled() {
            return Ok(());
        }
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(line) {
            Ok(event) => {
                if sender.blocking_send(event).is_err() {
                    return Ok(());
                }
            }
            Err(e) => tracing::warn!(line = %line, "skipping malformed event: {e}"),
        }
    }
    tracing::warn!("event stream reached end of input");
    Ok(())
}

/// Reads events from stdin on a detached thread. A pending read never holds
/// up runtime shutdown.
pub fn spawn_stdin_reader(
    sender: mpsc::Sender<InboundEvent>,
    cancellation_token: CancellationToken,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("event-reader".to_string())
        .spawn(move || {
            tracing::info!("Starting event reader thread");
            let stdin = std::io::stdin();
            if let Err(e) = read_events(stdin.lock(), sender, cancellation_token) {
                tracing::error!("Failed to read events: {e}");
            }
            tracing::info!("Event reader thread completed");
        })
        .map(drop)
}

/// Serializes commands to `writer` until every sender is gone or the token
/// is cancelled. Queued commands are flushed before returning.
pub async fn write_commands<W>(
    mut writer: W,
    mut receiver: mpsc::UnboundedReceiver<OutboundCommand>,
    cancellation_token: CancellationToken,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let command = tokio::select! {
            command = receiver.recv() => command,
            _ = cancellation_token.cancelled() => None,
        };
        let Some(command) = command else { break };
        write_command(&mut writer, &command).await?;
    }
    while let Ok(command) = receiver.try_recv() {
        write_command(&mut writer, &command).await?;
    }
    writer.flush().await
}

async fn write_command<W>(writer: &mut W, command: &OutboundCommand) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(command).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Collaborator ports backed by the command writer task.
#[derive(Clone)]
pub struct StdioCommands {
    sender: mpsc::UnboundedSender<OutboundCommand>,
    instance_count: usize,
}

impl StdioCommands {
    pub fn new(sender: mpsc::UnboundedSender<OutboundCommand>, instance_count: usize) -> Self {
        Self {
            sender,
            instance_count,
        }
    }

    fn send_window(&self, command: WindowCommand) -> Result<(), WindowError> {
        self.sender
            .send(OutboundCommand::Window(command))
            .map_err(|_| WindowError::Disconnected)
    }
}

impl SceneSink for StdioCommands {
    fn submit(&self, mode: BatchMode, commands: Vec<SceneCommand>) {
        if self
            .sender
            .send(OutboundCommand::Scene { mode, commands })
            .is_err()
        {
            tracing::warn!("dropping scene batch, command writer is gone");
        }
    }
}

#[async_trait::async_trait]
impl WindowSystem for StdioCommands {
    async fn focus_window(&self, window: WindowRef) -> Result<(), WindowError> {
        self.send_window(WindowCommand::FocusWindow { window })
    }

    async fn grab_pointer(&self, window: WindowRef, confine: bool) -> Result<(), WindowError> {
        self.send_window(WindowCommand::GrabPointer { window, confine })
    }

    async fn ungrab_pointer(&self) -> Result<(), WindowError> {
        self.send_window(WindowCommand::UngrabPointer)
    }

    async fn grab_key(&self, binding: &str) -> Result<(), WindowError> {
        self.send_window(WindowCommand::GrabKey {
            binding: binding.to_string(),
        })
    }

    async fn ungrab_key(&self, binding: &str) -> Result<(), WindowError> {
        self.send_window(WindowCommand::UngrabKey {
            binding: binding.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl InstanceControl for StdioCommands {
    async fn reset(&self, id: InstanceId) -> Result<(), ControlError> {
        if id >= self.instance_count {
            return Err(ControlError::UnknownInstance { id });
        }
        self.sender
            .send(OutboundCommand::ResetInstance { id })
            .map_err(|_| ControlError::Disconnected)
    }
}
