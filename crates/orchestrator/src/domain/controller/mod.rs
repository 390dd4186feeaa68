//! Orchestration controller.
//!
//! A single task owns the selection state and handles lifecycle, input and
//! focus events strictly one at a time. Every decision is forwarded to the
//! CPU manager and reflected through the scene and window collaborators.

use std::sync::Arc;

use api_types::Action;
use api_types::BatchMode;
use api_types::FocusEvent;
use api_types::InboundEvent;
use api_types::InputEvent;
use api_types::InstanceId;
use api_types::LifecycleEvent;
use api_types::LifecycleState;
use api_types::Phase;
use api_types::Rect;
use api_types::SceneCommand;
use api_types::WallAction;
use api_types::WindowRef;
use derive_more::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Profile;
use crate::domain::ports::ControlError;
use crate::domain::ports::HookKind;
use crate::domain::ports::HookRunner;
use crate::domain::ports::InstanceControl;
use crate::domain::ports::SceneSink;
use crate::domain::ports::WindowError;
use crate::domain::ports::WindowSystem;
use crate::domain::scheduler::CpuManager;

mod frontend;
mod moving;
mod projector;
mod state;
mod wall;

pub use frontend::Frontend;
pub use moving::MovingWall;
pub use projector::letterbox;
pub use projector::Projector;
pub use state::ControllerState;
pub use wall::WallGrid;

const WALL_SCENE: &str = "Wall";
const INSTANCE_SCENE: &str = "Instance";

#[derive(Debug, Display)]
pub enum ControllerError {
    #[display("failed to grab the pointer after {attempts} attempts")]
    PointerGrab { attempts: u32 },
    #[display("window system failure: {message}")]
    WindowSystem { message: String },
    #[display("instance control failure: {message}")]
    InstanceControl { message: String },
    #[display("event stream closed")]
    EventStreamClosed,
}

impl std::error::Error for ControllerError {}

/// Logs transient window errors; a lost connection is fatal.
pub(crate) fn window_result(result: Result<(), WindowError>) -> Result<(), ControllerError> {
    match result {
        Ok(()) => Ok(()),
        Err(WindowError::Disconnected) => Err(ControllerError::WindowSystem {
            message: WindowError::Disconnected.to_string(),
        }),
        Err(e) => {
            tracing::warn!("window command failed: {e}");
            Ok(())
        }
    }
}

/// Scene source showing an instance in game.
pub(crate) fn instance_source(id: InstanceId) -> String {
    format!("MC {}", id + 1)
}

/// Scene source showing an instance on the wall.
pub(crate) fn wall_source(id: InstanceId) -> String {
    format!("Wall MC {}", id + 1)
}

pub(crate) fn lock_source(id: InstanceId) -> String {
    format!("Lock {}", id + 1)
}

/// Everything the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub cpu: Arc<dyn CpuManager>,
    pub scene: Arc<dyn SceneSink>,
    pub windows: Arc<dyn WindowSystem>,
    pub instances: Arc<dyn InstanceControl>,
    pub hooks: Arc<dyn HookRunner>,
}

pub struct Controller {
    profile: Arc<Profile>,
    frontend: Frontend,
    state: ControllerState,
    projector: Projector,
    collaborators: Collaborators,
    /// Hitbox of the last pointer action, used to ignore drag repeats.
    last_hit: Option<Rect>,
}

impl Controller {
    pub fn new(profile: Arc<Profile>, collaborators: Collaborators) -> Self {
        let frontend = Frontend::new(&profile);
        let mut state = ControllerState::new(profile.instance_count());
        if frontend.is_single() {
            state.activate(0);
        }
        let projector = Projector::new(
            &profile.wall.projector,
            profile.wall.canvas,
            profile.wall.confine_pointer,
            profile.grab_retry.clone(),
        );
        Self {
            profile,
            frontend,
            state,
            projector,
            collaborators,
            last_hit: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    /// Handles events until the token is cancelled or a fatal error occurs.
    /// The CPU manager is always shut down before returning.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<InboundEvent>,
        cancellation_token: CancellationToken,
    ) -> Result<(), ControllerError> {
        let mut result = self.start().await;
        if result.is_ok() {
            result = loop {
                let event = tokio::select! {
                    _ = cancellation_token.cancelled() => break Ok(()),
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    break Err(ControllerError::EventStreamClosed);
                };
                if let Err(e) = self.handle_event(event).await {
                    break Err(e);
                }
            };
        }

        match &result {
            Ok(()) => tracing::info!("controller stopped"),
            Err(e) => tracing::error!("controller failed: {e}"),
        }
        self.collaborators.cpu.shutdown().await;
        result
    }

    /// Sets up the initial scene and focus.
    pub async fn start(&mut self) -> Result<(), ControllerError> {
        if self.frontend.is_single() {
            tracing::info!("starting in single mode");
            return self.focus_instance(0).await;
        }

        tracing::info!(instances = self.state.len(), "starting on the wall");
        let mut commands: Vec<SceneCommand> = (0..self.state.len())
            .filter_map(|id| self.frontend.lock_indicator(id, false))
            .collect();
        commands.push(SceneCommand::SetScene {
            name: WALL_SCENE.to_string(),
        });
        self.collaborators
            .scene
            .submit(BatchMode::SerialRealtime, commands);
        self.relayout();
        self.grab_bindings().await?;
        self.focus_projector().await
    }

    pub async fn handle_event(&mut self, event: InboundEvent) -> Result<(), ControllerError> {
        let result = match event {
            InboundEvent::Lifecycle(LifecycleEvent { id, state }) => {
                self.handle_lifecycle(id, state).await
            }
            InboundEvent::Input(input) => self.handle_input(input).await,
            InboundEvent::Focus(FocusEvent { window }) => self.handle_focus(window).await,
        };
        debug_assert_eq!(self.state.check_invariants(), Ok(()));
        result
    }

    pub async fn handle_lifecycle(
        &mut self,
        id: InstanceId,
        state: LifecycleState,
    ) -> Result<(), ControllerError> {
        let Some(previous) = self.state.set_state(id, state) else {
            tracing::warn!(instance = id, "lifecycle update for unknown instance");
            return Ok(());
        };
        let entered = previous.phase != state.phase
            && matches!(state.phase, Phase::Previewing | Phase::Idle);
        if entered && !self.frontend.is_single() && self.state.enqueue(id) {
            tracing::debug!(instance = id, phase = %state.phase, "queued instance");
            self.relayout();
        }
        self.collaborators.cpu.update(id, state).await;
        Ok(())
    }

    async fn handle_focus(&mut self, window: WindowRef) -> Result<(), ControllerError> {
        if self.frontend.is_single() {
            return Ok(());
        }
        self.projector
            .focus_changed(window, self.collaborators.windows.as_ref())
            .await
    }

    pub async fn handle_input(&mut self, input: InputEvent) -> Result<(), ControllerError> {
        if let Action::Wall { action, slot } = input.action {
            return self.handle_wall_input(action, slot, input).await;
        }
        if input.held {
            return Ok(());
        }
        let on_wall = self.state.active().is_none();
        match input.action {
            Action::ResetAll if on_wall => self.reset_all().await,
            Action::PlayFirstLocked if on_wall => self.play_first_locked().await,
            Action::FocusProjector if !self.frontend.is_single() => self.focus_projector().await,
            Action::IngameReset => self.ingame_reset().await,
            Action::IngameFocus => match self.state.active() {
                Some(id) => self.focus_instance(id).await,
                None => Ok(()),
            },
            action => {
                tracing::debug!(?action, "ignoring action in the current state");
                Ok(())
            }
        }
    }

    async fn handle_wall_input(
        &mut self,
        action: WallAction,
        slot: Option<usize>,
        input: InputEvent,
    ) -> Result<(), ControllerError> {
        if self.state.active().is_some() {
            return Ok(());
        }
        let target = match slot {
            Some(_) if input.held => return Ok(()),
            Some(slot) => self.frontend.resolve_slot(&mut self.state, slot),
            None => {
                if !self.projector.in_bounds(input.x, input.y) {
                    return self
                        .projector
                        .release(self.collaborators.windows.as_ref())
                        .await;
                }
                let (x, y) = self.projector.to_video(input.x, input.y);
                let Some((hitbox, id)) = self.frontend.hit_test(&self.state, x, y) else {
                    return Ok(());
                };
                if input.held && self.last_hit == Some(hitbox) {
                    return Ok(());
                }
                self.last_hit = Some(hitbox);
                Some(id)
            }
        };
        let Some(id) = target else {
            return Ok(());
        };

        match action {
            WallAction::Play => self.play(id).await.map(drop),
            WallAction::Reset => self.wall_reset(id).await,
            WallAction::Lock => self.toggle_lock(id).await,
            WallAction::ResetOthers => self.reset_others(id).await,
        }
    }

    /// Starts playing an idle instance. Returns whether it did.
    pub async fn play(&mut self, id: InstanceId) -> Result<bool, ControllerError> {
        if self.state.active().is_some() {
            tracing::debug!(instance = id, "already playing");
            return Ok(false);
        }
        match self.state.state(id) {
            Some(state) if state.phase == Phase::Idle => {}
            _ => {
                tracing::debug!(instance = id, "only idle instances can be played");
                return Ok(false);
            }
        }

        self.projector
            .release(self.collaborators.windows.as_ref())
            .await?;
        self.ungrab_bindings().await?;

        let was_locked = self.state.activate(id);
        let state = LifecycleState::active();
        self.state.set_state(id, state);
        self.collaborators.cpu.set_priority(id, false).await;
        self.collaborators.cpu.update(id, state).await;

        let mut commands: Vec<SceneCommand> = (0..self.state.len())
            .map(|other| SceneCommand::SetVisible {
                target: instance_source(other),
                visible: other == id,
            })
            .collect();
        if was_locked {
            commands.extend(self.frontend.lock_indicator(id, false));
        }
        commands.push(SceneCommand::SetScene {
            name: INSTANCE_SCENE.to_string(),
        });
        self.collaborators
            .scene
            .submit(BatchMode::SerialRealtime, commands);

        self.focus_instance(id).await?;
        self.collaborators.hooks.run(HookKind::Play);
        self.relayout();
        tracing::info!(instance = id, "playing instance");
        Ok(true)
    }

    /// Resets an instance unless it is locked, active or already generating.
    /// Returns whether the reset was issued.
    pub async fn reset(&mut self, id: InstanceId) -> Result<bool, ControllerError> {
        if self.state.is_locked(id) || self.state.active() == Some(id) {
            return Ok(false);
        }
        match self.state.state(id) {
            Some(state) if !state.is_generating() => self.force_reset(id).await,
            _ => Ok(false),
        }
    }

    async fn force_reset(&mut self, id: InstanceId) -> Result<bool, ControllerError> {
        match self.collaborators.instances.reset(id).await {
            Ok(()) => {}
            Err(ControlError::Disconnected) => {
                return Err(ControllerError::InstanceControl {
                    message: ControlError::Disconnected.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(instance = id, "failed to reset instance: {e}");
                return Ok(false);
            }
        }
        // superseded by the next lifecycle event
        let state = LifecycleState::generating();
        self.state.set_state(id, state);
        self.state.remove(id);
        self.collaborators.cpu.update(id, state).await;
        tracing::debug!(instance = id, "reset instance");
        Ok(true)
    }

    async fn wall_reset(&mut self, id: InstanceId) -> Result<(), ControllerError> {
        if self.reset(id).await? {
            self.collaborators.hooks.run(HookKind::WallReset);
            self.relayout();
        }
        Ok(())
    }

    /// Plays `id`, then resets every other instance the bulk reset covers.
    pub async fn reset_others(&mut self, id: InstanceId) -> Result<(), ControllerError> {
        if !self.play(id).await? {
            return Ok(());
        }
        for other in self.frontend.bulk_reset_targets(&self.state) {
            if other != id && self.reset(other).await? {
                self.collaborators.hooks.run(HookKind::WallReset);
            }
        }
        self.relayout();
        Ok(())
    }

    pub async fn reset_all(&mut self) -> Result<(), ControllerError> {
        let mut count = 0;
        for id in self.frontend.bulk_reset_targets(&self.state) {
            if self.reset(id).await? {
                self.collaborators.hooks.run(HookKind::WallReset);
                count += 1;
            }
        }
        self.state.compact();
        self.relayout();
        tracing::debug!(count, "reset all instances");
        Ok(())
    }

    pub async fn toggle_lock(&mut self, id: InstanceId) -> Result<(), ControllerError> {
        let locked = if self.state.is_locked(id) {
            self.state.unlock(id);
            self.collaborators.cpu.set_priority(id, false).await;
            self.collaborators.hooks.run(HookKind::Unlock);
            false
        } else if self.state.lock(id) {
            self.collaborators.cpu.set_priority(id, true).await;
            self.collaborators.hooks.run(HookKind::Lock);
            true
        } else {
            return Ok(());
        };
        tracing::debug!(instance = id, locked, "toggled lock");

        if let Some(command) = self.frontend.lock_indicator(id, locked) {
            self.collaborators
                .scene
                .submit(BatchMode::Parallel, vec![command]);
        }
        if !locked && self.profile.wall.reset_unlock && self.reset(id).await? {
            self.collaborators.hooks.run(HookKind::WallReset);
        }
        self.relayout();
        Ok(())
    }

    fn first_idle_lock(&self) -> Option<InstanceId> {
        self.state.locks().iter().copied().find(|id| {
            self.state
                .state(*id)
                .is_some_and(|state| state.phase == Phase::Idle)
        })
    }

    pub async fn play_first_locked(&mut self) -> Result<(), ControllerError> {
        if let Some(id) = self.first_idle_lock() {
            self.play(id).await?;
        }
        Ok(())
    }

    /// Resets the played instance and leaves it.
    pub async fn ingame_reset(&mut self) -> Result<(), ControllerError> {
        let Some(id) = self.state.active() else {
            return Ok(());
        };
        if !self.force_reset(id).await? {
            return Ok(());
        }
        self.collaborators.hooks.run(HookKind::Reset);
        if self.frontend.is_single() {
            return Ok(());
        }
        self.return_to_overview().await
    }

    /// Leaves the played instance for the wall, or for the first idle locked
    /// instance when `goto_locked` is set.
    pub async fn return_to_overview(&mut self) -> Result<(), ControllerError> {
        self.state.deactivate();
        self.last_hit = None;
        if self.profile.wall.goto_locked {
            if let Some(id) = self.first_idle_lock() {
                if self.play(id).await? {
                    return Ok(());
                }
            }
        }

        self.grab_bindings().await?;
        self.collaborators.scene.submit(
            BatchMode::SerialRealtime,
            vec![SceneCommand::SetScene {
                name: WALL_SCENE.to_string(),
            }],
        );
        self.focus_projector().await?;
        self.relayout();
        tracing::info!("returned to the wall");
        Ok(())
    }

    pub async fn focus_projector(&mut self) -> Result<(), ControllerError> {
        window_result(
            self.collaborators
                .windows
                .focus_window(self.projector.window())
                .await,
        )
    }

    async fn focus_instance(&self, id: InstanceId) -> Result<(), ControllerError> {
        let Some(instance) = self.profile.instances.get(id) else {
            return Ok(());
        };
        window_result(
            self.collaborators
                .windows
                .focus_window(instance.window)
                .await,
        )
    }

    async fn grab_bindings(&self) -> Result<(), ControllerError> {
        for binding in &self.profile.wall.bindings {
            window_result(self.collaborators.windows.grab_key(binding).await)?;
        }
        Ok(())
    }

    async fn ungrab_bindings(&self) -> Result<(), ControllerError> {
        for binding in &self.profile.wall.bindings {
            window_result(self.collaborators.windows.ungrab_key(binding).await)?;
        }
        Ok(())
    }

    fn relayout(&mut self) {
        if let Some(commands) = self.frontend.relayout(&mut self.state) {
            self.collaborators
                .scene
                .submit(BatchMode::SerialFrame, commands);
        }
    }
}

#[cfg(test)]
mod tests;
