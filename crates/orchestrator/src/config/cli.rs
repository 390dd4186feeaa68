use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::infrastructure::topology_probe::SYSFS_CPU_ROOT;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator, reading events from stdin and writing commands to stdout
    Run(RunArgs),
    /// Print the discovered CPU topology and the planned resource groups
    Topology(TopologyArgs),
    /// Validate a profile against the CPU topology and the cgroup tree
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProfileArgs {
    #[arg(
        long,
        short,
        env = "ORCHESTRATOR_PROFILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to the YAML profile"
    )]
    pub profile: PathBuf,

    #[arg(
        long,
        env = "ORCHESTRATOR_SYSFS_CPU",
        value_hint = clap::ValueHint::DirPath,
        default_value = SYSFS_CPU_ROOT,
        help = "Root of the sysfs cpu tree used for topology discovery"
    )]
    pub sysfs_cpu_root: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,

    #[arg(
        long,
        env = "ORCHESTRATOR_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "logs/metrics.log",
        help = "File receiving tier changes in InfluxDB line protocol"
    )]
    pub metrics_file: PathBuf,

    #[arg(
        long,
        default_value = "16",
        help = "Scheduler queue slots per managed instance"
    )]
    pub queue_per_instance: usize,
}

#[derive(Args, Debug, Clone)]
pub struct TopologyArgs {
    #[arg(
        long,
        env = "ORCHESTRATOR_SYSFS_CPU",
        value_hint = clap::ValueHint::DirPath,
        default_value = SYSFS_CPU_ROOT,
        help = "Root of the sysfs cpu tree used for topology discovery"
    )]
    pub sysfs_cpu_root: PathBuf,

    #[arg(
        long,
        short,
        env = "ORCHESTRATOR_PROFILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Profile whose resource group plan should be printed"
    )]
    pub profile: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,
}
