//! cgroup v2 backed resource groups.
//!
//! Every group is a directory under the configured root. Group directories
//! are created by the system administrator; this module only writes
//! `cgroup.procs` and `cpuset.cpus`.

use std::path::Path;
use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::ports::ResourceGroupError;
use crate::domain::ports::ResourceGroups;
use crate::domain::scheduler::GroupPlan;
use crate::domain::topology::format_cpu_list;
use crate::domain::topology::CoreId;

const PROCS_FILE: &str = "cgroup.procs";
const CPUS_FILE: &str = "cpuset.cpus";

#[derive(Debug, Clone)]
pub struct CgroupFs {
    root: PathBuf,
}

impl CgroupFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Groups of `plan` without a directory under the root.
    pub async fn missing_groups(&self, plan: &GroupPlan) -> Vec<String> {
        let mut missing = Vec::new();
        for group in plan.group_names() {
            let is_dir = fs::metadata(self.root.join(group))
                .await
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false);
            if !is_dir {
                missing.push(group.to_string());
            }
        }
        missing
    }

    /// Fails with every missing group of `plan`.
    pub async fn verify(&self, plan: &GroupPlan) -> Result<(), ResourceGroupError> {
        let groups = self.missing_groups(plan).await;
        if groups.is_empty() {
            Ok(())
        } else {
            Err(ResourceGroupError::Missing { groups })
        }
    }

    fn write_error(group: &str, file: &'static str, e: std::io::Error) -> ResourceGroupError {
        ResourceGroupError::Write {
            group: group.to_string(),
            file,
            message: e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ResourceGroups for CgroupFs {
    async fn write_members(&self, group: &str, pids: &[u32]) -> Result<(), ResourceGroupError> {
        let path = self.root.join(group).join(PROCS_FILE);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| Self::write_error(group, PROCS_FILE, e))?;
        // the kernel migrates one pid per write
        for pid in pids {
            file.write_all(format!("{pid}\n").as_bytes())
                .await
                .map_err(|e| Self::write_error(group, PROCS_FILE, e))?;
        }
        file.flush()
            .await
            .map_err(|e| Self::write_error(group, PROCS_FILE, e))
    }

    async fn write_cpus(&self, group: &str, cpus: &[CoreId]) -> Result<(), ResourceGroupError> {
        let path = self.root.join(group).join(CPUS_FILE);
        fs::write(&path, format_cpu_list(cpus))
            .await
            .map_err(|e| Self::write_error(group, CPUS_FILE, e))
    }
}
