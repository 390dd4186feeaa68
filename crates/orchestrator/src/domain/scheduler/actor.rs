use std::sync::Arc;
use std::time::Duration;

use api_types::InstanceId;
use api_types::LifecycleState;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::tier_table::AffinityDecision;
use super::tier_table::GroupWrite;
use super::tier_table::TierTable;
use super::CpuManager;
use crate::domain::ports::ResourceGroups;
use crate::infrastructure::metrics;

#[derive(Debug)]
pub enum SchedulerMessage {
    Update {
        id: InstanceId,
        state: LifecycleState,
    },
    Priority {
        id: InstanceId,
        priority: bool,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Actor owning the tier table.
///
/// Messages are handled one at a time. Group writes run in the background
/// and are never awaited by the loop; on exit the writes still in flight are
/// drained before the baseline is written and awaited.
pub struct AffinityScheduler {
    table: TierTable,
    groups: Arc<dyn ResourceGroups>,
    burst: Option<Duration>,
    writes: JoinSet<()>,
    receiver: mpsc::Receiver<SchedulerMessage>,
    burst_sender: mpsc::UnboundedSender<InstanceId>,
    burst_receiver: mpsc::UnboundedReceiver<InstanceId>,
}

impl AffinityScheduler {
    /// Creates the actor and the handle used to talk to it. The message queue
    /// holds `capacity` messages before senders wait.
    pub fn new(
        table: TierTable,
        groups: Arc<dyn ResourceGroups>,
        burst: Option<Duration>,
        capacity: usize,
    ) -> (Self, SchedulerHandle) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (burst_sender, burst_receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            table,
            groups,
            burst,
            writes: JoinSet::new(),
            receiver,
            burst_sender,
            burst_receiver,
        };
        (scheduler, SchedulerHandle { sender })
    }

    /// Runs until cancelled, shut down through the handle, or every handle is
    /// dropped. All exits leave every instance in the baseline groups.
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        tracing::info!(instances = self.table.len(), "affinity scheduler started");
        let baseline = self.table.baseline();
        self.apply_and_wait(baseline).await;

        let reply = loop {
            while self.writes.try_join_next().is_some() {}
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("affinity scheduler shutdown requested");
                    break None;
                }
                message = self.receiver.recv() => match message {
                    Some(SchedulerMessage::Update { id, state }) => {
                        let decisions = self.table.update(id, state);
                        self.apply(decisions);
                    }
                    Some(SchedulerMessage::Priority { id, priority }) => {
                        let decisions = self.table.set_priority(id, priority);
                        self.apply(decisions);
                    }
                    Some(SchedulerMessage::Shutdown(reply)) => break Some(reply),
                    None => {
                        tracing::info!("affinity scheduler channel closed");
                        break None;
                    }
                },
                Some(id) = self.burst_receiver.recv() => {
                    let decisions = self.table.end_burst(id);
                    self.apply(decisions);
                }
            }
        };

        let pending = self.writes.len();
        if pending > 0 {
            tracing::debug!(pending, "waiting for in-flight group writes");
        }
        while self.writes.join_next().await.is_some() {}

        let baseline = self.table.baseline();
        self.apply_and_wait(baseline).await;
        tracing::info!("affinity scheduler stopped");
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    fn apply(&mut self, decisions: Vec<AffinityDecision>) {
        for decision in decisions {
            match decision {
                AffinityDecision::Write(write) => {
                    let groups = self.groups.clone();
                    self.writes.spawn(async move {
                        write_group(groups.as_ref(), &write).await;
                    });
                }
                AffinityDecision::StartBurst(id) => {
                    let Some(burst) = self.burst else { continue };
                    let sender = self.burst_sender.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(burst).await;
                        let _ = sender.send(id);
                    });
                }
            }
        }
    }

    async fn apply_and_wait(&self, decisions: Vec<AffinityDecision>) {
        let writes = decisions.into_iter().filter_map(|decision| match decision {
            AffinityDecision::Write(write) => Some(write),
            AffinityDecision::StartBurst(_) => None,
        });
        let writes: Vec<GroupWrite> = writes.collect();
        futures::future::join_all(
            writes
                .iter()
                .map(|write| write_group(self.groups.as_ref(), write)),
        )
        .await;
    }
}

async fn write_group(groups: &dyn ResourceGroups, write: &GroupWrite) {
    tracing::trace!(group = %write.group, pids = ?write.pids, "writing group membership");
    if let Err(e) = groups.write_members(&write.group, &write.pids).await {
        tracing::warn!(group = %write.group, "failed to update resource group: {e}");
        metrics::record_write_failure(&write.group);
    }
}

/// Cloneable sender side of the affinity scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerMessage>,
}

impl SchedulerHandle {
    async fn send(&self, message: SchedulerMessage) {
        if self.sender.send(message).await.is_err() {
            tracing::warn!("affinity scheduler is no longer running");
        }
    }
}

#[async_trait::async_trait]
impl CpuManager for SchedulerHandle {
    async fn update(&self, id: InstanceId, state: LifecycleState) {
        self.send(SchedulerMessage::Update { id, state }).await;
    }

    async fn set_priority(&self, id: InstanceId, priority: bool) {
        self.send(SchedulerMessage::Priority { id, priority }).await;
    }

    async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .sender
            .send(SchedulerMessage::Shutdown(reply))
            .await
            .is_err()
        {
            return;
        }
        let _ = done.await;
    }
}
