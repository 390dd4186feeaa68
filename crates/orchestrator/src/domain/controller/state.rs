use api_types::InstanceId;
use api_types::LifecycleState;

/// Selection state of the overview: the active instance, the queue and the
/// locks, plus the last seen lifecycle state of every instance.
///
/// Every instance is in at most one of the queue, the locks and the active
/// slot. Locking tombstones the queue entry so the remaining entries keep
/// their positions until the next compaction; every other removal splices.
#[derive(Debug, Clone)]
pub struct ControllerState {
    active: Option<InstanceId>,
    queue: Vec<Option<InstanceId>>,
    locks: Vec<InstanceId>,
    states: Vec<LifecycleState>,
}

impl ControllerState {
    /// Every instance starts queued, in id order.
    pub fn new(count: usize) -> Self {
        Self {
            active: None,
            queue: (0..count).map(Some).collect(),
            locks: Vec::new(),
            states: vec![LifecycleState::default(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn active(&self) -> Option<InstanceId> {
        self.active
    }

    pub fn state(&self, id: InstanceId) -> Option<LifecycleState> {
        self.states.get(id).copied()
    }

    /// Stores a new snapshot and returns the previous one.
    pub fn set_state(&mut self, id: InstanceId, state: LifecycleState) -> Option<LifecycleState> {
        let slot = self.states.get_mut(id)?;
        Some(std::mem::replace(slot, state))
    }

    pub fn is_locked(&self, id: InstanceId) -> bool {
        self.locks.contains(&id)
    }

    pub fn is_queued(&self, id: InstanceId) -> bool {
        self.queue.contains(&Some(id))
    }

    /// Locked instances, oldest lock first.
    pub fn locks(&self) -> &[InstanceId] {
        &self.locks
    }

    /// Raw queue including tombstones.
    pub fn queue_slots(&self) -> &[Option<InstanceId>] {
        &self.queue
    }

    pub fn queued(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.queue.iter().flatten().copied()
    }

    /// Appends `id` unless it is already queued, locked or active.
    pub fn enqueue(&mut self, id: InstanceId) -> bool {
        if id >= self.len() || self.is_queued(id) || self.is_locked(id) || self.active == Some(id)
        {
            return false;
        }
        self.queue.push(Some(id));
        true
    }

    /// Removes `id` from the queue, shifting the later entries forward.
    pub fn remove(&mut self, id: InstanceId) -> bool {
        match self.queue.iter().position(|slot| *slot == Some(id)) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Tombstones the queue entry of `id`.
    pub fn dequeue(&mut self, id: InstanceId) -> bool {
        match self.queue.iter_mut().find(|slot| **slot == Some(id)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn compact(&mut self) {
        self.queue.retain(Option::is_some);
    }

    /// Instance at `position` of the compacted queue.
    pub fn queued_at(&mut self, position: usize) -> Option<InstanceId> {
        self.compact();
        self.queue.get(position).copied().flatten()
    }

    /// Moves `id` from the queue into the locks. The active instance cannot
    /// be locked.
    pub fn lock(&mut self, id: InstanceId) -> bool {
        if id >= self.len() || self.active == Some(id) || self.is_locked(id) {
            return false;
        }
        self.dequeue(id);
        self.locks.push(id);
        true
    }

    /// Moves `id` from the locks back to the end of the queue.
    pub fn unlock(&mut self, id: InstanceId) -> bool {
        if !self.release_lock(id) {
            return false;
        }
        self.enqueue(id);
        true
    }

    fn release_lock(&mut self, id: InstanceId) -> bool {
        match self.locks.iter().position(|locked| *locked == id) {
            Some(index) => {
                self.locks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Makes `id` the active instance, taking it out of the queue and the
    /// locks. Returns whether it was locked.
    pub fn activate(&mut self, id: InstanceId) -> bool {
        self.remove(id);
        let was_locked = self.release_lock(id);
        self.active = Some(id);
        was_locked
    }

    pub fn deactivate(&mut self) -> Option<InstanceId> {
        self.active.take()
    }

    /// Checks the membership invariants, describing the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = vec![false; self.len()];
        for id in self.queued() {
            match seen.get_mut(id) {
                Some(true) => return Err(format!("instance {id} is queued twice")),
                Some(slot) => *slot = true,
                None => return Err(format!("unknown instance {id} is queued")),
            }
        }
        for id in &self.locks {
            match seen.get(*id) {
                Some(true) => return Err(format!("instance {id} is queued and locked")),
                Some(false) => {}
                None => return Err(format!("unknown instance {id} is locked")),
            }
        }
        let mut locks = self.locks.clone();
        locks.sort_unstable();
        locks.dedup();
        if locks.len() != self.locks.len() {
            return Err("an instance is locked twice".to_string());
        }
        if let Some(active) = self.active {
            if self.is_queued(active) || self.is_locked(active) {
                return Err(format!("active instance {active} is queued or locked"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn lock_tombstones_the_queue_entry() {
        let mut state = ControllerState::new(3);

        assert!(state.lock(1));
        assert_eq!(state.queue_slots(), &[Some(0), None, Some(2)]);
        assert_eq!(state.locks(), &[1]);
        assert!(!state.enqueue(1));

        assert_eq!(state.queued_at(1), Some(2));
        assert_eq!(state.queue_slots(), &[Some(0), Some(2)]);
    }

    #[test]
    fn unlock_requeues_at_the_end() {
        let mut state = ControllerState::new(3);
        state.lock(0);

        assert!(state.unlock(0));
        assert!(!state.unlock(0));
        assert_eq!(state.queued().collect::<Vec<_>>(), vec![1, 2, 0]);
    }

    #[test]
    fn activate_clears_queue_and_lock() {
        let mut state = ControllerState::new(4);
        state.lock(3);

        assert!(!state.activate(2));
        assert_eq!(state.active(), Some(2));
        assert!(!state.is_queued(2));
        assert!(!state.lock(2));
        assert!(!state.enqueue(2));

        state.deactivate();
        assert!(state.activate(3));
        assert!(state.locks().is_empty());
        state.check_invariants().expect("invariants");
    }

    #[test]
    fn remove_splices_and_activate_leaves_no_hole() {
        let mut state = ControllerState::new(4);

        assert!(state.remove(1));
        assert!(!state.remove(1));
        assert_eq!(state.queue_slots(), &[Some(0), Some(2), Some(3)]);

        state.activate(2);
        assert_eq!(state.queue_slots(), &[Some(0), Some(3)]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(InstanceId),
        Remove(InstanceId),
        Dequeue(InstanceId),
        Lock(InstanceId),
        Unlock(InstanceId),
        Activate(InstanceId),
        Deactivate,
        Compact,
    }

    fn arb_op(count: usize) -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..count).prop_map(Op::Enqueue),
            (0..count).prop_map(Op::Remove),
            (0..count).prop_map(Op::Dequeue),
            (0..count).prop_map(Op::Lock),
            (0..count).prop_map(Op::Unlock),
            (0..count).prop_map(Op::Activate),
            Just(Op::Deactivate),
            Just(Op::Compact),
        ]
    }

    proptest! {
        #[test]
        fn membership_stays_disjoint(ops in proptest::collection::vec(arb_op(6), 0..64)) {
            let mut state = ControllerState::new(6);
            for op in ops {
                match op {
                    Op::Enqueue(id) => { state.enqueue(id); }
                    Op::Remove(id) => { state.remove(id); }
                    Op::Dequeue(id) => { state.dequeue(id); }
                    Op::Lock(id) => { state.lock(id); }
                    Op::Unlock(id) => { state.unlock(id); }
                    Op::Activate(id) => {
                        state.deactivate();
                        state.activate(id);
                    }
                    Op::Deactivate => { state.deactivate(); }
                    Op::Compact => state.compact(),
                }
                prop_assert_eq!(state.check_invariants(), Ok(()));
            }
        }
    }
}
