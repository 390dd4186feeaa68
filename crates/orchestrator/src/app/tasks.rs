use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use api_types::InboundEvent;
use api_types::OutboundCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::services::ApplicationServices;
use crate::domain::controller::Controller;
use crate::domain::scheduler::AffinityScheduler;
use crate::infrastructure::stdio;

/// Events buffered between the stdin reader and the controller.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<Result<()>>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, services: &mut ApplicationServices) -> Result<()> {
        let controller = services
            .controller
            .take()
            .context("controller already started")?;
        let command_receiver = services
            .command_receiver
            .take()
            .context("command writer already started")?;

        if let Some(scheduler) = services.scheduler.take() {
            let scheduler_task = self.spawn_scheduler_task(scheduler);
            self.tasks.push(scheduler_task);
        }

        let writer_task = self.spawn_command_writer_task(command_receiver);
        self.tasks.push(writer_task);

        let (event_sender, event_receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        stdio::spawn_stdin_reader(event_sender, self.cancellation_token.clone())
            .context("failed to start event reader")?;

        let controller_task = self.spawn_controller_task(controller, event_receiver);
        self.tasks.push(controller_task);

        Ok(())
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        let outcome = tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                Ok(())
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, index, remaining) = result;
                drop(remaining);
                self.tasks.swap_remove(index);
                match result {
                    Ok(Ok(())) => {
                        tracing::warn!("Task completed unexpectedly");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        tracing::error!("Task failed: {e:#}");
                        Err(e)
                    }
                    Err(e) => {
                        tracing::error!("Task panicked or was aborted: {e}");
                        Err(e.into())
                    }
                }
            }
        };

        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(Duration::from_secs(10))
            .await;
        outcome
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("Task failed during shutdown: {e:#}"),
                    Err(e) => tracing::error!("Task failed during shutdown: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_scheduler_task(&self, scheduler: AffinityScheduler) -> JoinHandle<Result<()>> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting affinity scheduler task");
            scheduler.run(token).await;
            tracing::info!("Affinity scheduler task completed");
            Ok(())
        })
    }

    fn spawn_controller_task(
        &self,
        controller: Controller,
        events: mpsc::Receiver<InboundEvent>,
    ) -> JoinHandle<Result<()>> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting controller task");
            controller
                .run(events, token)
                .await
                .context("controller stopped")?;
            tracing::info!("Controller task completed");
            Ok(())
        })
    }

    fn spawn_command_writer_task(
        &self,
        receiver: mpsc::UnboundedReceiver<OutboundCommand>,
    ) -> JoinHandle<Result<()>> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting command writer task");
            stdio::write_commands(tokio::io::stdout(), receiver, token)
                .await
                .context("failed to write commands")?;
            tracing::info!("Command writer task completed");
            Ok(())
        })
    }
}
