use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use tokio::sync::mpsc;

use crate::app::core::Application;
use crate::app::services::ApplicationServices;
use crate::config::Profile;
use crate::config::RunArgs;
use crate::domain::controller::Collaborators;
use crate::domain::controller::Controller;
use crate::domain::scheduler::AffinityScheduler;
use crate::domain::scheduler::CpuManager;
use crate::domain::scheduler::DisabledCpuManager;
use crate::domain::scheduler::GroupPlan;
use crate::domain::scheduler::TierSettings;
use crate::domain::scheduler::TierTable;
use crate::domain::topology::CpuTopology;
use crate::infrastructure::cgroup::CgroupFs;
use crate::infrastructure::hooks::CommandHooks;
use crate::infrastructure::stdio::StdioCommands;
use crate::infrastructure::topology_probe::probe_topology;

/// Application builder
pub struct ApplicationBuilder {
    run_args: RunArgs,
}

/// Probes the topology and plans the resource groups of `profile`.
pub fn plan_groups(profile: &Profile, sysfs_cpu_root: &Path) -> Result<(CpuTopology, GroupPlan)> {
    let topology = probe_topology(sysfs_cpu_root).context("failed to probe CPU topology")?;
    let plan = GroupPlan::new(
        &topology,
        &profile.affinity.cpus,
        profile.affinity.cache_split,
        profile.instance_count(),
    )
    .context("failed to plan resource groups")?;
    Ok((topology, plan))
}

impl ApplicationBuilder {
    pub fn new(run_args: RunArgs) -> Self {
        Self { run_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let profile = Profile::load(&self.run_args.profile.profile)
            .await
            .context("failed to load profile")?;
        let profile = Arc::new(profile);

        let (cpu, scheduler) = self.create_scheduler(&profile).await?;

        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let commands = Arc::new(StdioCommands::new(
            command_sender,
            profile.instance_count(),
        ));
        let collaborators = Collaborators {
            cpu: cpu.clone(),
            scene: commands.clone(),
            windows: commands.clone(),
            instances: commands,
            hooks: Arc::new(CommandHooks::new(profile.hooks.clone())),
        };
        let controller = Controller::new(profile.clone(), collaborators);

        let services = ApplicationServices {
            profile,
            cpu,
            scheduler,
            controller: Some(controller),
            command_receiver: Some(command_receiver),
        };

        Ok(Application::new(services))
    }

    async fn create_scheduler(
        &self,
        profile: &Profile,
    ) -> Result<(Arc<dyn CpuManager>, Option<AffinityScheduler>)> {
        if !profile.affinity.enabled {
            tracing::info!("CPU affinity is disabled");
            return Ok((Arc::new(DisabledCpuManager), None));
        }

        let (topology, plan) = plan_groups(profile, &self.run_args.profile.sysfs_cpu_root)?;
        tracing::info!(
            cores = topology.core_count,
            cache_groups = topology.cache_group_count(),
            split = plan.split,
            "discovered CPU topology"
        );

        let cgroups = CgroupFs::new(&profile.affinity.cgroup_root);
        cgroups
            .verify(&plan)
            .await
            .with_context(|| format!("invalid cgroup tree at {}", cgroups.root().display()))?;
        plan.write_core_sets(&cgroups)
            .await
            .context("failed to assign core sets")?;

        let pids: Vec<u32> = profile.instances.iter().map(|instance| instance.pid).collect();
        let table = TierTable::new(
            &pids,
            TierSettings {
                low_threshold: profile.affinity.low_threshold,
                burst: profile.affinity.burst().is_some(),
                instances_per_group: plan.instances_per_group,
            },
        );
        let capacity = self.run_args.queue_per_instance * pids.len();
        let (scheduler, handle) = AffinityScheduler::new(
            table,
            Arc::new(cgroups),
            profile.affinity.burst(),
            capacity,
        );
        Ok((Arc::new(handle), Some(scheduler)))
    }
}
