use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use orchestrator::app::builder::plan_groups;
use orchestrator::app::ApplicationBuilder;
use orchestrator::config::CheckArgs;
use orchestrator::config::Cli;
use orchestrator::config::Commands;
use orchestrator::config::Profile;
use orchestrator::config::RunArgs;
use orchestrator::config::TopologyArgs;
use orchestrator::infrastructure::cgroup::CgroupFs;
use orchestrator::infrastructure::topology_probe::probe_topology;
use orchestrator::logging;
use orchestrator::topology::format_cpu_list;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run(run_args).await,
        Commands::Topology(topology_args) => topology(topology_args).await,
        Commands::Check(check_args) => check(check_args).await,
    }
}

async fn run(run_args: RunArgs) -> Result<()> {
    let _guards = logging::init(&run_args.metrics_file);

    tracing::info!("Starting orchestrator {}", &**version::VERSION);

    let mut app = ApplicationBuilder::new(run_args).build().await?;

    let result = app.run().await;
    app.shutdown().await?;
    result
}

async fn topology(topology_args: TopologyArgs) -> Result<()> {
    let _guard = utils::logging::init();

    let topology =
        probe_topology(&topology_args.sysfs_cpu_root).context("failed to probe CPU topology")?;
    println!("{topology}");
    for (index, group) in topology.cache_groups.iter().enumerate() {
        println!("cache group {index}: {}", format_cpu_list(group));
    }
    println!(
        "smallest cache group: {} cpus",
        topology.min_cache_group_size()
    );

    if let Some(path) = topology_args.profile {
        let profile = Profile::load(&path).await.context("failed to load profile")?;
        let (_, plan) = plan_groups(&profile, &topology_args.sysfs_cpu_root)?;
        println!(
            "split {} ways, {} instances per split",
            plan.split, plan.instances_per_group
        );
        for (group, cpus) in &plan.core_sets {
            println!("{group}: {}", format_cpu_list(cpus));
        }
    }
    Ok(())
}

async fn check(check_args: CheckArgs) -> Result<()> {
    let _guard = utils::logging::init();

    let args = check_args.profile;
    let profile = Profile::load(&args.profile)
        .await
        .context("failed to load profile")?;
    println!(
        "profile ok: {:?} mode, {} instances",
        profile.mode,
        profile.instance_count()
    );

    if !profile.affinity.enabled {
        println!("affinity disabled, skipping topology checks");
        return Ok(());
    }

    let (topology, plan) = plan_groups(&profile, &args.sysfs_cpu_root)?;
    println!("{topology}");
    let cgroups = CgroupFs::new(&profile.affinity.cgroup_root);
    let missing = cgroups.missing_groups(&plan).await;
    if !missing.is_empty() {
        anyhow::bail!(
            "missing resource groups under {}: {}",
            cgroups.root().display(),
            missing.join(", ")
        );
    }
    println!("all {} resource groups present", plan.core_sets.len());
    Ok(())
}
