//! CPU affinity scheduling.

use api_types::InstanceId;
use api_types::LifecycleState;
use api_types::PriorityTier;
use derive_more::Display;

use crate::config::TierCpus;
use crate::domain::ports::ResourceGroupError;
use crate::domain::ports::ResourceGroups;
use crate::domain::topology::format_cpu_list;
use crate::domain::topology::CoreId;
use crate::domain::topology::CpuTopology;

mod actor;
mod tier_table;

pub use actor::AffinityScheduler;
pub use actor::SchedulerHandle;
pub use actor::SchedulerMessage;
pub use tier_table::AffinityDecision;
pub use tier_table::GroupWrite;
pub use tier_table::TierSettings;
pub use tier_table::TierTable;

/// Controller-facing side of the affinity scheduler.
#[async_trait::async_trait]
pub trait CpuManager: Send + Sync {
    /// Forwards a lifecycle update. Does not wait for the tier change.
    async fn update(&self, id: InstanceId, state: LifecycleState);

    /// Sets or clears the priority override of an instance.
    async fn set_priority(&self, id: InstanceId, priority: bool);

    /// Moves every instance to the baseline tier and waits until the writes
    /// are done.
    async fn shutdown(&self);
}

/// Used when affinity is disabled in the profile.
pub struct DisabledCpuManager;

#[async_trait::async_trait]
impl CpuManager for DisabledCpuManager {
    async fn update(&self, _id: InstanceId, _state: LifecycleState) {}

    async fn set_priority(&self, _id: InstanceId, _priority: bool) {}

    async fn shutdown(&self) {}
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum PlanError {
    #[display("cache split {split} exceeds the {available} discovered cache groups")]
    SplitExceedsTopology { split: usize, available: usize },
    #[display("tier {tier} needs at least one core")]
    NoCores { tier: PriorityTier },
    #[display("tier {tier} wants {wanted} cores but cache group {group} has {available}")]
    TooManyCores {
        tier: PriorityTier,
        group: usize,
        wanted: usize,
        available: usize,
    },
}

impl std::error::Error for PlanError {}

/// Resource groups and their core sets for a topology and profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub split: usize,
    pub instances_per_group: usize,
    /// `(group, cores)` for every tier and split.
    pub core_sets: Vec<(String, Vec<CoreId>)>,
}

impl GroupPlan {
    /// Splits instances across `cache_split` cache groups (all of them when
    /// zero) and gives each tier the first cores of its cache group.
    pub fn new(
        topology: &CpuTopology,
        cpus: &TierCpus,
        cache_split: usize,
        instances: usize,
    ) -> Result<Self, PlanError> {
        let available = topology.cache_group_count();
        if cache_split > available {
            return Err(PlanError::SplitExceedsTopology {
                split: cache_split,
                available,
            });
        }
        let split = match cache_split {
            0 => available.max(1),
            split => split,
        };

        let mut core_sets = Vec::with_capacity(split * PriorityTier::ALL.len());
        for tier in PriorityTier::ALL {
            let wanted = cpus.count(tier);
            if wanted == 0 {
                return Err(PlanError::NoCores { tier });
            }
            for (index, group) in topology.cache_groups.iter().take(split).enumerate() {
                let Some(cores) = group.get(..wanted) else {
                    return Err(PlanError::TooManyCores {
                        tier,
                        group: index,
                        wanted,
                        available: group.len(),
                    });
                };
                core_sets.push((group_name(tier, index), cores.to_vec()));
            }
        }

        Ok(Self {
            split,
            instances_per_group: instances.div_ceil(split).max(1),
            core_sets,
        })
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.core_sets.iter().map(|(name, _)| name.as_str())
    }

    /// Writes the core set of every group. Stops at the first failure.
    pub async fn write_core_sets(
        &self,
        groups: &dyn ResourceGroups,
    ) -> Result<(), ResourceGroupError> {
        for (group, cpus) in &self.core_sets {
            groups.write_cpus(group, cpus).await?;
            tracing::debug!(group = %group, cpus = %format_cpu_list(cpus), "assigned core set");
        }
        Ok(())
    }
}

pub fn group_name(tier: PriorityTier, index: usize) -> String {
    format!("{}{index}", tier.name())
}
