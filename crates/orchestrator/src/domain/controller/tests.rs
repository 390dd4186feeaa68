//! Controller scenarios driven through recording collaborators.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use api_types::PriorityTier;
use proptest::prelude::*;
use similar_asserts::assert_eq;
use test_log::test;

use super::*;
use crate::config::GroupLayout;
use crate::config::InstanceConfig;
use crate::config::Mode;
use crate::config::MovingConfig;
use crate::config::ProjectorConfig;
use crate::config::WallConfig;
use crate::domain::ports::testing::RecordingControl;
use crate::domain::ports::testing::RecordingHooks;
use crate::domain::ports::testing::RecordingScene;
use crate::domain::ports::testing::RecordingWindows;
use crate::domain::ports::testing::WindowCall;
use crate::domain::scheduler::TierSettings;
use crate::domain::scheduler::TierTable;

const PROJECTOR: WindowRef = WindowRef(0x10);
const THRESHOLD: u8 = 20;

/// Applies CPU manager calls to a tier table synchronously.
struct TableCpu {
    table: Mutex<TierTable>,
    shutdowns: AtomicUsize,
}

impl TableCpu {
    fn new(count: usize) -> Self {
        let pids: Vec<u32> = (0..count as u32).map(|id| 1000 + id).collect();
        Self {
            table: Mutex::new(TierTable::new(
                &pids,
                TierSettings {
                    low_threshold: THRESHOLD,
                    burst: false,
                    instances_per_group: count,
                },
            )),
            shutdowns: AtomicUsize::new(0),
        }
    }

    fn tier(&self, id: InstanceId) -> Option<PriorityTier> {
        self.table.lock().expect("poisoned").effective_tier(id)
    }

    fn active_count(&self) -> usize {
        self.table.lock().expect("poisoned").active_count()
    }
}

#[async_trait::async_trait]
impl CpuManager for TableCpu {
    async fn update(&self, id: InstanceId, state: LifecycleState) {
        self.table.lock().expect("poisoned").update(id, state);
    }

    async fn set_priority(&self, id: InstanceId, priority: bool) {
        self.table.lock().expect("poisoned").set_priority(id, priority);
    }

    async fn shutdown(&self) {
        self.table.lock().expect("poisoned").baseline();
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

fn profile(mode: Mode, count: usize) -> Profile {
    Profile {
        mode,
        instances: (0..count as u32)
            .map(|id| InstanceConfig {
                pid: 1000 + id,
                window: WindowRef(0x100 + id),
            })
            .collect(),
        wall: WallConfig {
            bindings: vec!["F1".to_string()],
            projector: ProjectorConfig {
                window: PROJECTOR,
                children: vec![WindowRef(0x11)],
                width: 1920,
                height: 1080,
            },
            ..WallConfig::default()
        },
        ..Profile::default()
    }
}

fn moving_profile(count: usize) -> Profile {
    let mut profile = profile(Mode::Moving, count);
    profile.wall.moving = MovingConfig {
        groups: vec![GroupLayout {
            space: Rect::new(0, 0, 1920, 1080),
            width: 2,
            height: 2,
        }],
        locks: None,
        gaps: false,
    };
    profile
}

fn window(id: u32) -> WindowRef {
    WindowRef(0x100 + id)
}

struct Harness {
    controller: Controller,
    cpu: Arc<TableCpu>,
    scene: Arc<RecordingScene>,
    windows: Arc<RecordingWindows>,
    control: Arc<RecordingControl>,
    hooks: Arc<RecordingHooks>,
}

impl Harness {
    fn new(profile: Profile) -> Self {
        Self::with_windows(profile, RecordingWindows::default())
    }

    fn with_windows(profile: Profile, windows: RecordingWindows) -> Self {
        let cpu = Arc::new(TableCpu::new(profile.instance_count()));
        let scene = Arc::new(RecordingScene::default());
        let windows = Arc::new(windows);
        let control = Arc::new(RecordingControl::default());
        let hooks = Arc::new(RecordingHooks::default());
        let collaborators = Collaborators {
            cpu: cpu.clone(),
            scene: scene.clone(),
            windows: windows.clone(),
            instances: control.clone(),
            hooks: hooks.clone(),
        };
        Self {
            controller: Controller::new(Arc::new(profile), collaborators),
            cpu,
            scene,
            windows,
            control,
            hooks,
        }
    }

    /// Started controller with every instance idle and the recordings
    /// cleared.
    async fn idle(profile: Profile) -> Self {
        let mut harness = Self::new(profile);
        harness.controller.start().await.expect("start");
        for id in 0..harness.controller.state().len() {
            harness.lifecycle(id, Phase::Idle, 0).await;
        }
        harness.clear();
        harness
    }

    fn clear(&self) {
        self.scene.take();
        self.windows.take();
        self.hooks.take();
    }

    async fn lifecycle(&mut self, id: InstanceId, phase: Phase, progress: u8) {
        self.controller
            .handle_event(InboundEvent::Lifecycle(LifecycleEvent {
                id,
                state: LifecycleState::new(phase, progress),
            }))
            .await
            .expect("lifecycle event");
    }

    async fn input(&mut self, action: Action, held: bool, x: i32, y: i32) {
        self.controller
            .handle_event(InboundEvent::Input(InputEvent { action, held, x, y }))
            .await
            .expect("input event");
    }

    async fn slot(&mut self, action: WallAction, slot: usize) {
        self.input(
            Action::Wall {
                action,
                slot: Some(slot),
            },
            false,
            0,
            0,
        )
        .await;
    }

    async fn click(&mut self, action: WallAction, x: i32, y: i32, held: bool) {
        self.input(Action::Wall { action, slot: None }, held, x, y)
            .await;
    }

    async fn key(&mut self, action: Action) {
        self.input(action, false, 0, 0).await;
    }

    fn state(&self) -> &ControllerState {
        self.controller.state()
    }
}

#[test(tokio::test)]
async fn play_makes_an_idle_instance_active() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    assert_eq!(harness.cpu.tier(2), Some(PriorityTier::Idle));

    harness.slot(WallAction::Play, 2).await;

    assert_eq!(harness.state().active(), Some(2));
    assert!(!harness.state().is_queued(2));
    assert_eq!(harness.cpu.tier(2), Some(PriorityTier::Active));
    assert_eq!(harness.cpu.active_count(), 1);
    assert_eq!(
        harness.windows.take(),
        vec![
            WindowCall::UngrabKey("F1".to_string()),
            WindowCall::Focus(window(2)),
        ]
    );
    assert_eq!(harness.hooks.take(), vec![HookKind::Play]);

    let batches = harness.scene.take();
    assert_eq!(batches.len(), 1);
    let (mode, commands) = &batches[0];
    assert_eq!(*mode, BatchMode::SerialRealtime);
    assert_eq!(
        commands[2],
        SceneCommand::SetVisible {
            target: "MC 3".to_string(),
            visible: true,
        }
    );
    assert_eq!(
        commands.last(),
        Some(&SceneCommand::SetScene {
            name: "Instance".to_string(),
        })
    );

    // wall actions are ignored while playing
    harness.slot(WallAction::Play, 1).await;
    assert_eq!(harness.state().active(), Some(2));
}

#[test(tokio::test)]
async fn only_idle_instances_can_be_played() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    harness.lifecycle(0, Phase::Previewing, 50).await;

    harness.slot(WallAction::Play, 0).await;

    assert_eq!(harness.state().active(), None);
    assert!(harness.windows.take().is_empty());
}

#[test(tokio::test)]
async fn locking_a_previewing_instance_pins_it_high() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    harness.lifecycle(0, Phase::Generating, 0).await;
    harness.lifecycle(0, Phase::Previewing, 10).await;
    harness.lifecycle(0, Phase::Previewing, 30).await;
    assert_eq!(harness.cpu.tier(0), Some(PriorityTier::Low));

    harness.slot(WallAction::Lock, 0).await;

    assert!(harness.state().is_locked(0));
    assert!(!harness.state().is_queued(0));
    assert_eq!(harness.cpu.tier(0), Some(PriorityTier::High));
    assert_eq!(harness.hooks.take(), vec![HookKind::Lock]);
    assert_eq!(
        harness.scene.take(),
        vec![(
            BatchMode::Parallel,
            vec![SceneCommand::SetVisible {
                target: "Lock 1".to_string(),
                visible: true,
            }]
        )]
    );

    harness.lifecycle(0, Phase::Previewing, 60).await;
    assert_eq!(harness.cpu.tier(0), Some(PriorityTier::High));

    harness.slot(WallAction::Lock, 0).await;

    assert!(!harness.state().is_locked(0));
    assert_eq!(harness.state().queued().last(), Some(0));
    assert_eq!(harness.cpu.tier(0), Some(PriorityTier::Low));
    assert_eq!(harness.hooks.take(), vec![HookKind::Unlock]);
}

#[test(tokio::test)]
async fn reset_others_plays_then_resets_the_rest() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;

    harness.slot(WallAction::ResetOthers, 1).await;

    assert_eq!(harness.state().active(), Some(1));
    assert_eq!(harness.control.resets(), vec![0, 2, 3]);
    assert_eq!(harness.state().queued().count(), 0);
    for id in [0, 2, 3] {
        assert_eq!(
            harness.state().state(id),
            Some(LifecycleState::generating())
        );
    }
    assert_eq!(
        harness.hooks.take(),
        vec![
            HookKind::Play,
            HookKind::WallReset,
            HookKind::WallReset,
            HookKind::WallReset,
        ]
    );
    assert_eq!(harness.cpu.active_count(), 1);
}

#[test(tokio::test)]
async fn reset_always_starts_generating_from_zero() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    harness.lifecycle(3, Phase::Previewing, 80).await;

    harness.slot(WallAction::Reset, 3).await;

    assert_eq!(
        harness.state().state(3),
        Some(LifecycleState::new(Phase::Generating, 0))
    );
    assert!(!harness.state().is_queued(3));
    assert_eq!(harness.control.resets(), vec![3]);
    assert_eq!(harness.hooks.take(), vec![HookKind::WallReset]);

    // generating and locked instances are left alone
    harness.slot(WallAction::Reset, 3).await;
    harness.slot(WallAction::Lock, 2).await;
    harness.slot(WallAction::Reset, 2).await;
    assert_eq!(harness.control.resets(), vec![3]);
}

#[test(tokio::test)]
async fn reset_all_skips_locked_instances() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    harness.slot(WallAction::Lock, 1).await;

    harness.key(Action::ResetAll).await;

    assert_eq!(harness.control.resets(), vec![0, 2, 3]);
    assert_eq!(harness.state().queue_slots(), &[] as &[Option<InstanceId>]);
    assert_eq!(harness.state().locks(), &[1]);
}

#[test(tokio::test)]
async fn ingame_reset_returns_to_the_wall() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    harness.slot(WallAction::Play, 0).await;
    harness.clear();

    harness.key(Action::IngameReset).await;

    assert_eq!(harness.state().active(), None);
    assert_eq!(harness.control.resets(), vec![0]);
    assert_eq!(harness.hooks.take(), vec![HookKind::Reset]);
    assert_eq!(
        harness.windows.take(),
        vec![
            WindowCall::GrabKey("F1".to_string()),
            WindowCall::Focus(PROJECTOR),
        ]
    );
    assert_eq!(
        harness.scene.take(),
        vec![(
            BatchMode::SerialRealtime,
            vec![SceneCommand::SetScene {
                name: "Wall".to_string(),
            }]
        )]
    );

    // back in the queue once it shows a preview
    assert!(!harness.state().is_queued(0));
    harness.lifecycle(0, Phase::Previewing, 5).await;
    assert!(harness.state().is_queued(0));
}

#[test(tokio::test)]
async fn goto_locked_plays_the_first_idle_lock() {
    let mut profile = profile(Mode::Wall, 4);
    profile.wall.goto_locked = true;
    let mut harness = Harness::idle(profile).await;
    harness.slot(WallAction::Lock, 3).await;
    harness.slot(WallAction::Lock, 1).await;
    harness.slot(WallAction::Play, 0).await;
    harness.clear();

    harness.key(Action::IngameReset).await;

    assert_eq!(harness.state().active(), Some(3));
    assert_eq!(harness.state().locks(), &[1]);
    assert_eq!(harness.hooks.take(), vec![HookKind::Reset, HookKind::Play]);
    assert_eq!(harness.cpu.tier(3), Some(PriorityTier::Active));
    assert_eq!(harness.cpu.active_count(), 1);
}

#[test(tokio::test)]
async fn play_first_locked_picks_the_oldest_idle_lock() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    harness.slot(WallAction::Lock, 2).await;
    harness.slot(WallAction::Lock, 0).await;
    harness.lifecycle(2, Phase::Generating, 0).await;

    harness.key(Action::PlayFirstLocked).await;

    assert_eq!(harness.state().active(), Some(0));
    assert_eq!(harness.state().locks(), &[2]);
}

#[test(tokio::test)]
async fn pointer_drags_skip_the_same_cell() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;

    harness.click(WallAction::Lock, 10, 10, false).await;
    harness.click(WallAction::Lock, 20, 20, true).await;
    harness.click(WallAction::Lock, 1000, 10, true).await;
    harness.click(WallAction::Lock, 1000, 20, false).await;

    assert_eq!(harness.state().locks(), &[0]);
}

#[test(tokio::test)]
async fn clicking_outside_the_projector_releases_the_pointer() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;
    harness
        .controller
        .handle_event(InboundEvent::Focus(FocusEvent { window: PROJECTOR }))
        .await
        .expect("focus");
    assert!(harness.controller.projector().is_grabbed());

    harness.click(WallAction::Play, -5, 10, false).await;

    assert!(!harness.controller.projector().is_grabbed());
    assert_eq!(harness.state().active(), None);
    assert_eq!(
        harness.windows.take(),
        vec![WindowCall::Grab(PROJECTOR, false), WindowCall::Ungrab]
    );
}

#[test(tokio::test)]
async fn moving_wall_reflows_and_addresses_compacted_positions() {
    let mut harness = Harness::idle(moving_profile(5)).await;

    harness.slot(WallAction::Lock, 0).await;

    let transform = |id: usize, rect: Rect| SceneCommand::SetTransform {
        target: format!("Wall MC {}", id + 1),
        rect,
    };
    assert_eq!(
        harness.scene.take(),
        vec![(
            BatchMode::SerialFrame,
            vec![
                transform(0, Rect::new(1920, 1080, 1, 1)),
                transform(1, Rect::new(0, 0, 960, 540)),
                transform(2, Rect::new(960, 0, 960, 540)),
                transform(3, Rect::new(0, 540, 960, 540)),
                transform(4, Rect::new(960, 540, 960, 540)),
            ]
        )]
    );

    // position 0 is now instance 1
    harness.slot(WallAction::Lock, 0).await;
    assert_eq!(harness.state().locks(), &[0, 1]);

    harness.key(Action::ResetAll).await;
    assert_eq!(harness.control.resets(), vec![4, 3, 2]);
}

#[test(tokio::test)]
async fn wall_queue_does_not_grow_across_reset_cycles() {
    let mut harness = Harness::idle(profile(Mode::Wall, 4)).await;

    for _ in 0..200 {
        harness.slot(WallAction::Reset, 0).await;
        harness.lifecycle(0, Phase::Previewing, 10).await;
    }
    assert_eq!(harness.state().queue_slots().len(), 4);

    // lock tombstones are compacted by the next relayout
    harness.slot(WallAction::Lock, 1).await;
    assert_eq!(harness.state().queue_slots(), &[Some(2), Some(3), Some(0)]);
    harness.slot(WallAction::Lock, 1).await;
    assert_eq!(
        harness.state().queue_slots(),
        &[Some(2), Some(3), Some(0), Some(1)]
    );
}

#[test(tokio::test)]
async fn moving_wall_gaps_only_come_from_locks() {
    let mut profile = moving_profile(5);
    profile.wall.moving.gaps = true;
    let mut harness = Harness::idle(profile).await;

    harness.slot(WallAction::Reset, 0).await;
    harness.lifecycle(0, Phase::Previewing, 10).await;
    assert_eq!(
        harness.state().queue_slots(),
        &[Some(1), Some(2), Some(3), Some(4), Some(0)]
    );

    // position 0 is instance 1; locking it leaves a gap in place
    harness.slot(WallAction::Lock, 0).await;
    assert_eq!(
        harness.state().queue_slots(),
        &[None, Some(2), Some(3), Some(4), Some(0)]
    );
}

#[test(tokio::test)]
async fn single_mode_only_resets_in_game() {
    let mut harness = Harness::new(profile(Mode::Single, 1));
    harness.controller.start().await.expect("start");
    assert_eq!(harness.windows.take(), vec![WindowCall::Focus(window(0))]);

    harness.key(Action::IngameReset).await;
    harness.input(Action::IngameReset, true, 0, 0).await;
    harness.slot(WallAction::Play, 0).await;

    assert_eq!(harness.state().active(), Some(0));
    assert_eq!(harness.control.resets(), vec![0]);
    assert_eq!(harness.hooks.take(), vec![HookKind::Reset]);
    assert!(harness.scene.take().is_empty());
}

#[test(tokio::test)]
async fn closed_event_stream_shuts_the_scheduler_down() {
    let Harness {
        controller, cpu, ..
    } = Harness::new(profile(Mode::Wall, 2));
    let (sender, receiver) = mpsc::channel(4);
    sender
        .send(InboundEvent::Lifecycle(LifecycleEvent {
            id: 0,
            state: LifecycleState::idle(),
        }))
        .await
        .expect("send");
    drop(sender);

    let result = controller.run(receiver, CancellationToken::new()).await;

    assert!(matches!(result, Err(ControllerError::EventStreamClosed)));
    assert_eq!(cpu.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(cpu.tier(0), Some(PriorityTier::High));
}

#[test(tokio::test)]
async fn cancellation_stops_the_loop() {
    let Harness {
        controller, cpu, ..
    } = Harness::new(profile(Mode::Wall, 2));
    let (_sender, receiver) = mpsc::channel(4);
    let token = CancellationToken::new();
    token.cancel();

    controller.run(receiver, token).await.expect("clean stop");

    assert_eq!(cpu.shutdowns.load(Ordering::SeqCst), 1);
}

#[test(tokio::test)]
async fn exhausted_pointer_grab_is_fatal() {
    let Harness {
        controller, cpu, windows, ..
    } = Harness::with_windows(profile(Mode::Wall, 2), RecordingWindows::failing_grabs(10));
    let (sender, receiver) = mpsc::channel(4);
    sender
        .send(InboundEvent::Focus(FocusEvent {
            window: WindowRef(0x11),
        }))
        .await
        .expect("send");

    let result = controller.run(receiver, CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(ControllerError::PointerGrab { attempts: 5 })
    ));
    let grabs = windows
        .take()
        .into_iter()
        .filter(|call| matches!(call, WindowCall::Grab(..)))
        .count();
    assert_eq!(grabs, 5);
    assert_eq!(cpu.shutdowns.load(Ordering::SeqCst), 1);
}

fn arb_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::Menu),
        Just(Phase::Generating),
        Just(Phase::Previewing),
        Just(Phase::Idle),
        Just(Phase::Active),
    ]
}

fn arb_wall_action() -> impl Strategy<Value = WallAction> {
    prop_oneof![
        Just(WallAction::Play),
        Just(WallAction::Reset),
        Just(WallAction::Lock),
        Just(WallAction::ResetOthers),
    ]
}

fn arb_event(count: usize) -> impl Strategy<Value = InboundEvent> {
    prop_oneof![
        (0..count, arb_phase(), 0u8..=100).prop_map(|(id, phase, progress)| {
            InboundEvent::Lifecycle(LifecycleEvent {
                id,
                state: LifecycleState::new(phase, progress),
            })
        }),
        (arb_wall_action(), 0..count).prop_map(|(action, slot)| {
            InboundEvent::Input(InputEvent {
                action: Action::Wall {
                    action,
                    slot: Some(slot),
                },
                held: false,
                x: 0,
                y: 0,
            })
        }),
        prop_oneof![
            Just(Action::ResetAll),
            Just(Action::PlayFirstLocked),
            Just(Action::IngameReset),
        ]
        .prop_map(|action| InboundEvent::Input(InputEvent {
            action,
            held: false,
            x: 0,
            y: 0,
        })),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_sessions_keep_membership_and_tier_invariants(
        events in proptest::collection::vec(arb_event(4), 0..48),
        moving in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let profile = if moving { moving_profile(4) } else { profile(Mode::Wall, 4) };
            let mut harness = Harness::new(profile);
            harness.controller.start().await.expect("start");
            for event in events {
                harness.controller.handle_event(event).await.expect("event");
                assert_eq!(harness.state().check_invariants(), Ok(()));
                assert!(harness.cpu.active_count() <= 1);
            }
        });
    }
}
