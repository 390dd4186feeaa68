pub mod cgroup;
pub mod hooks;
pub mod logging;
pub mod metrics;
pub mod stdio;
pub mod topology_probe;
