//! Pure tier bookkeeping of the affinity scheduler.
//!
//! `TierTable` turns lifecycle updates and priority overrides into
//! [`AffinityDecision`]s. It never touches the OS itself; the actor applies
//! the decisions.

use api_types::InstanceId;
use api_types::LifecycleState;
use api_types::Phase;
use api_types::PriorityTier;

use crate::infrastructure::metrics;

/// Full membership of one resource group after a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupWrite {
    pub group: String,
    pub pids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffinityDecision {
    /// Rewrite the membership of a group
    Write(GroupWrite),
    /// Start the burst timer of an instance that just went idle
    StartBurst(InstanceId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSettings {
    /// Previewing instances above this progress drop to `Low`.
    pub low_threshold: u8,
    /// Whether idle instances get a grace period in `Mid`.
    pub burst: bool,
    /// Instances sharing one set of cache-group local resource groups.
    pub instances_per_group: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    pid: u32,
    state: LifecycleState,
    tier: PriorityTier,
    priority: bool,
    /// Group the pid was last written to.
    group: Option<String>,
}

pub struct TierTable {
    slots: Vec<Slot>,
    settings: TierSettings,
}

impl TierTable {
    pub fn new(pids: &[u32], settings: TierSettings) -> Self {
        let slots = pids
            .iter()
            .map(|&pid| Slot {
                pid,
                state: LifecycleState::default(),
                tier: PriorityTier::Idle,
                priority: false,
                group: None,
            })
            .collect();
        Self {
            slots,
            settings: TierSettings {
                instances_per_group: settings.instances_per_group.max(1),
                ..settings
            },
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Tier derived from lifecycle transitions, ignoring the priority override.
    pub fn tier(&self, id: InstanceId) -> Option<PriorityTier> {
        self.slots.get(id).map(|slot| slot.tier)
    }

    /// Tier the instance's process is actually placed in.
    pub fn effective_tier(&self, id: InstanceId) -> Option<PriorityTier> {
        self.slots.get(id).map(Self::effective)
    }

    pub fn group(&self, id: InstanceId) -> Option<&str> {
        self.slots.get(id).and_then(|slot| slot.group.as_deref())
    }

    pub fn is_prioritized(&self, id: InstanceId) -> bool {
        self.slots.get(id).is_some_and(|slot| slot.priority)
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| Self::effective(slot) == PriorityTier::Active)
            .count()
    }

    pub fn update(&mut self, id: InstanceId, state: LifecycleState) -> Vec<AffinityDecision> {
        let Some(previous) = self.slots.get(id).map(|slot| slot.state) else {
            tracing::warn!(instance = id, "lifecycle update for unknown instance");
            return Vec::new();
        };
        let changed = previous.phase != state.phase;
        let mut batch = Batch::default();

        match state.phase {
            Phase::Idle => {
                if !self.settings.burst {
                    self.move_instance(id, PriorityTier::Idle, &mut batch);
                } else if changed {
                    self.move_instance(id, PriorityTier::Mid, &mut batch);
                    batch.burst = Some(id);
                }
            }
            Phase::Active => self.move_instance(id, PriorityTier::Active, &mut batch),
            Phase::Generating => {
                let tier = self.background_tier(id);
                self.move_instance(id, tier, &mut batch);
            }
            Phase::Previewing => {
                let threshold = self.settings.low_threshold;
                let was_under = previous.phase != Phase::Previewing || previous.progress <= threshold;
                let now_over = state.progress > threshold;
                if was_under && now_over {
                    self.move_instance(id, PriorityTier::Low, &mut batch);
                } else if changed {
                    let tier = self.background_tier(id);
                    self.move_instance(id, tier, &mut batch);
                }
            }
            Phase::Menu => {}
        }

        self.slots[id].state = state;
        self.finish(batch)
    }

    pub fn set_priority(&mut self, id: InstanceId, priority: bool) -> Vec<AffinityDecision> {
        let Some(slot) = self.slots.get_mut(id) else {
            tracing::warn!(instance = id, "priority change for unknown instance");
            return Vec::new();
        };
        slot.priority = priority;
        let mut batch = Batch::default();
        self.apply(id, &mut batch);
        self.finish(batch)
    }

    /// Ends the burst period of `id` if it is still idle.
    pub fn end_burst(&mut self, id: InstanceId) -> Vec<AffinityDecision> {
        let mut batch = Batch::default();
        if self.slots.get(id).is_some_and(|slot| slot.state.phase == Phase::Idle) {
            self.move_instance(id, PriorityTier::Idle, &mut batch);
        }
        self.finish(batch)
    }

    /// Moves every instance to `High` and rewrites every group that holds an
    /// instance, whether or not its membership changed.
    pub fn baseline(&mut self) -> Vec<AffinityDecision> {
        let mut batch = Batch::default();
        for id in 0..self.slots.len() {
            self.move_instance(id, PriorityTier::High, &mut batch);
        }
        for id in 0..self.slots.len() {
            let group = self.group_name(id);
            self.slots[id].group = Some(group.clone());
            batch.touch(group);
        }
        self.finish(batch)
    }

    fn effective(slot: &Slot) -> PriorityTier {
        match slot.tier {
            PriorityTier::Active => PriorityTier::Active,
            _ if slot.priority => PriorityTier::High,
            tier => tier,
        }
    }

    fn background_tier(&self, id: InstanceId) -> PriorityTier {
        let other_active = self
            .slots
            .iter()
            .enumerate()
            .any(|(other, slot)| other != id && slot.tier == PriorityTier::Active);
        if other_active {
            PriorityTier::Mid
        } else {
            PriorityTier::High
        }
    }

    fn move_instance(&mut self, id: InstanceId, tier: PriorityTier, batch: &mut Batch) {
        let current = self.slots[id].tier;
        if current == tier {
            return;
        }

        if tier == PriorityTier::Active {
            for other in 0..self.slots.len() {
                if other == id {
                    continue;
                }
                match self.slots[other].tier {
                    PriorityTier::Active => {
                        tracing::warn!(
                            instance = other,
                            replacement = id,
                            "demoting previously active instance"
                        );
                        self.set_tier(other, PriorityTier::Mid, batch);
                    }
                    PriorityTier::High => self.set_tier(other, PriorityTier::Mid, batch),
                    _ => {}
                }
            }
        } else if current == PriorityTier::Active {
            for other in 0..self.slots.len() {
                if other != id && self.slots[other].tier == PriorityTier::Mid {
                    self.set_tier(other, PriorityTier::High, batch);
                }
            }
        }

        self.set_tier(id, tier, batch);
    }

    fn set_tier(&mut self, id: InstanceId, tier: PriorityTier, batch: &mut Batch) {
        let slot = &mut self.slots[id];
        let from = slot.tier;
        slot.tier = tier;
        tracing::debug!(instance = id, %from, to = %tier, "tier changed");
        metrics::record_tier_change(id, slot.pid, from, tier);
        self.apply(id, batch);
    }

    /// Places the instance in the group of its effective tier.
    fn apply(&mut self, id: InstanceId, batch: &mut Batch) {
        let group = self.group_name(id);
        let slot = &mut self.slots[id];
        if slot.group.as_deref() == Some(group.as_str()) {
            return;
        }
        slot.group = Some(group.clone());
        batch.touch(group);
    }

    fn group_name(&self, id: InstanceId) -> String {
        let tier = Self::effective(&self.slots[id]);
        super::group_name(tier, id / self.settings.instances_per_group)
    }

    fn finish(&self, batch: Batch) -> Vec<AffinityDecision> {
        let mut decisions: Vec<AffinityDecision> = batch
            .groups
            .into_iter()
            .map(|group| {
                let pids = self
                    .slots
                    .iter()
                    .filter(|slot| slot.group.as_deref() == Some(group.as_str()))
                    .map(|slot| slot.pid)
                    .collect();
                AffinityDecision::Write(GroupWrite { group, pids })
            })
            .collect();
        if let Some(id) = batch.burst {
            decisions.push(AffinityDecision::StartBurst(id));
        }
        decisions
    }
}

/// Groups touched while handling one message, in first-touched order.
#[derive(Default)]
struct Batch {
    groups: Vec<String>,
    burst: Option<InstanceId>,
}

impl Batch {
    fn touch(&mut self, group: String) {
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use similar_asserts::assert_eq;

    use super::*;

    const THRESHOLD: u8 = 20;

    fn table(count: usize) -> TierTable {
        table_with(count, false, count)
    }

    fn table_with(count: usize, burst: bool, per_group: usize) -> TierTable {
        let pids: Vec<u32> = (0..count as u32).map(|i| 100 + i).collect();
        TierTable::new(
            &pids,
            TierSettings {
                low_threshold: THRESHOLD,
                burst,
                instances_per_group: per_group,
            },
        )
    }

    fn preview(progress: u8) -> LifecycleState {
        LifecycleState::new(Phase::Previewing, progress)
    }

    fn write(group: &str, pids: &[u32]) -> AffinityDecision {
        AffinityDecision::Write(GroupWrite {
            group: group.to_string(),
            pids: pids.to_vec(),
        })
    }

    #[test]
    fn baseline_places_everyone_in_high() {
        let mut table = table_with(4, false, 2);
        let decisions = table.baseline();

        assert_eq!(
            decisions,
            vec![write("high0", &[100, 101]), write("high1", &[102, 103])]
        );
        for id in 0..4 {
            assert_eq!(table.tier(id), Some(PriorityTier::High));
        }

        // baseline rewrites even when nothing moved
        assert_eq!(table.baseline().len(), 2);
    }

    #[test]
    fn generating_depends_on_active_instance() {
        let mut table = table(3);
        table.baseline();

        assert_eq!(table.update(0, LifecycleState::generating()), vec![]);
        assert_eq!(table.tier(0), Some(PriorityTier::High));

        let decisions = table.update(1, LifecycleState::active());
        assert_eq!(
            decisions,
            vec![write("mid0", &[100, 102]), write("active0", &[101])]
        );

        table.update(2, LifecycleState::generating());
        assert_eq!(table.tier(2), Some(PriorityTier::Mid));
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn leaving_active_promotes_mid_instances() {
        let mut table = table(3);
        table.baseline();
        table.update(0, LifecycleState::active());
        assert_eq!(table.tier(1), Some(PriorityTier::Mid));

        // resetting the played instance
        table.update(0, LifecycleState::generating());
        assert_eq!(table.tier(0), Some(PriorityTier::High));
        assert_eq!(table.tier(1), Some(PriorityTier::High));
        assert_eq!(table.tier(2), Some(PriorityTier::High));
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn second_active_demotes_the_first() {
        let mut table = table(2);
        table.baseline();
        table.update(0, LifecycleState::active());
        table.update(1, LifecycleState::active());

        assert_eq!(table.tier(0), Some(PriorityTier::Mid));
        assert_eq!(table.tier(1), Some(PriorityTier::Active));
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn preview_threshold_is_edge_triggered() {
        let mut table = table(1);
        table.baseline();
        table.update(0, LifecycleState::generating());

        table.update(0, preview(5));
        assert_eq!(table.tier(0), Some(PriorityTier::High));

        // unchanged progress below the threshold does nothing
        assert_eq!(table.update(0, preview(5)), vec![]);
        assert_eq!(table.update(0, preview(THRESHOLD)), vec![]);
        assert_eq!(table.tier(0), Some(PriorityTier::High));

        assert_eq!(table.update(0, preview(THRESHOLD + 1)), vec![write("low0", &[100])]);
        assert_eq!(table.tier(0), Some(PriorityTier::Low));

        // staying over the threshold does not move again
        assert_eq!(table.update(0, preview(60)), vec![]);
        assert_eq!(table.tier(0), Some(PriorityTier::Low));
    }

    #[test]
    fn idle_without_burst() {
        let mut table = table(1);
        table.baseline();
        assert_eq!(
            table.update(0, LifecycleState::idle()),
            vec![write("idle0", &[100])]
        );
    }

    #[test]
    fn idle_with_burst_waits_in_mid() {
        let mut table = table_with(1, true, 1);
        table.baseline();
        table.update(0, preview(50));

        let decisions = table.update(0, LifecycleState::idle());
        assert_eq!(
            decisions,
            vec![write("mid0", &[100]), AffinityDecision::StartBurst(0)]
        );
        // repeated idle updates do not restart the burst
        assert_eq!(table.update(0, LifecycleState::idle()), vec![]);

        assert_eq!(table.end_burst(0), vec![write("idle0", &[100])]);
        assert_eq!(table.tier(0), Some(PriorityTier::Idle));
    }

    #[test]
    fn burst_end_is_ignored_after_reset() {
        let mut table = table_with(1, true, 1);
        table.baseline();
        table.update(0, LifecycleState::idle());
        table.update(0, LifecycleState::generating());

        assert_eq!(table.end_burst(0), vec![]);
        assert_eq!(table.tier(0), Some(PriorityTier::High));
    }

    #[test]
    fn priority_pins_to_high_and_is_idempotent() {
        let mut table = table(1);
        table.baseline();
        table.update(0, preview(30));
        assert_eq!(table.effective_tier(0), Some(PriorityTier::Low));

        assert_eq!(table.set_priority(0, true), vec![write("high0", &[100])]);
        assert_eq!(table.effective_tier(0), Some(PriorityTier::High));
        assert_eq!(table.set_priority(0, true), vec![]);
        assert_eq!(table.effective_tier(0), Some(PriorityTier::High));
        // the computed tier is kept underneath
        assert_eq!(table.tier(0), Some(PriorityTier::Low));

        assert_eq!(table.set_priority(0, false), vec![write("low0", &[100])]);
        assert_eq!(table.effective_tier(0), Some(PriorityTier::Low));
    }

    #[test]
    fn priority_leaves_active_untouched() {
        let mut table = table(2);
        table.baseline();
        table.update(1, LifecycleState::active());

        assert_eq!(table.set_priority(1, true), vec![]);
        assert_eq!(table.effective_tier(1), Some(PriorityTier::Active));
    }

    #[test]
    fn menu_and_unknown_instances_are_ignored() {
        let mut table = table(1);
        table.baseline();
        assert_eq!(table.update(0, LifecycleState::default()), vec![]);
        assert_eq!(table.update(7, LifecycleState::active()), vec![]);
        assert_eq!(table.set_priority(7, true), vec![]);
    }

    fn arb_state() -> impl Strategy<Value = LifecycleState> {
        let phase = prop_oneof![
            Just(Phase::Menu),
            Just(Phase::Generating),
            Just(Phase::Previewing),
            Just(Phase::Idle),
            Just(Phase::Active),
        ];
        (phase, 0u8..=100).prop_map(|(phase, progress)| LifecycleState::new(phase, progress))
    }

    #[derive(Debug, Clone)]
    enum Op {
        Update(usize, LifecycleState),
        Priority(usize, bool),
        EndBurst(usize),
    }

    fn arb_op(count: usize) -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..count, arb_state()).prop_map(|(id, state)| Op::Update(id, state)),
            (0..count, any::<bool>()).prop_map(|(id, p)| Op::Priority(id, p)),
            (0..count).prop_map(Op::EndBurst),
        ]
    }

    proptest! {
        /// No sequence of messages leaves two instances in the active tier.
        #[test]
        fn at_most_one_active(
            burst in any::<bool>(),
            ops in proptest::collection::vec(arb_op(4), 1..64),
        ) {
            let mut table = table_with(4, burst, 2);
            table.baseline();
            for op in ops {
                let decisions = match op {
                    Op::Update(id, state) => table.update(id, state),
                    Op::Priority(id, p) => table.set_priority(id, p),
                    Op::EndBurst(id) => table.end_burst(id),
                };
                prop_assert!(table.active_count() <= 1);
                for decision in decisions {
                    if let AffinityDecision::Write(write) = decision {
                        prop_assert!(!write.pids.is_empty(), "empty write to {}", write.group);
                    }
                }
            }
        }

        /// Prioritized, non-active instances always sit in a high group.
        #[test]
        fn priority_is_honored(ops in proptest::collection::vec(arb_op(3), 1..48)) {
            let mut table = table(3);
            table.baseline();
            for op in ops {
                match op {
                    Op::Update(id, state) => { table.update(id, state); }
                    Op::Priority(id, p) => { table.set_priority(id, p); }
                    Op::EndBurst(id) => { table.end_burst(id); }
                }
                for id in 0..3 {
                    let effective = table.effective_tier(id);
                    if table.is_prioritized(id) && effective != Some(PriorityTier::Active) {
                        prop_assert_eq!(effective, Some(PriorityTier::High));
                        prop_assert_eq!(table.group(id), Some("high0"));
                    }
                }
            }
        }
    }
}
