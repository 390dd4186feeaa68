//! CPU cache topology.
//!
//! Cores are grouped by shared L1 cache (SMT siblings) and by shared L3 cache
//! (CCX-like units). The topology is discovered once at startup and is
//! read-only afterwards.

use std::collections::BTreeMap;
use std::fmt;

use derive_more::Display;

/// Logical CPU number as used by the kernel.
pub type CoreId = u32;

/// Cache ids of a single logical CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCacheIds {
    pub cpu: CoreId,
    pub l1: u32,
    pub l3: u32,
}

#[derive(Debug, Display)]
pub enum TopologyError {
    #[display("failed to read topology: {message}")]
    Read { message: String },
    #[display("cpu {cpu}: {message}")]
    InvalidCache { cpu: CoreId, message: String },
    #[display("no cpus found")]
    Empty,
}

impl std::error::Error for TopologyError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    /// CPUs grouped by shared L1 cache, ordered by L1 id.
    pub cores: Vec<Vec<CoreId>>,
    /// CPUs grouped by shared L3 cache, each sorted by L1 id for locality.
    pub cache_groups: Vec<Vec<CoreId>>,
    pub core_count: usize,
}

impl CpuTopology {
    /// Groups CPUs by their cache ids.
    ///
    /// Cache ids are allowed to skip values (some parts jump from L1 id 5 to 8);
    /// only non-empty groups are kept.
    pub fn from_cache_ids(cpus: &[CpuCacheIds]) -> Result<Self, TopologyError> {
        if cpus.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut cores: BTreeMap<u32, Vec<CoreId>> = BTreeMap::new();
        let mut cache_groups: BTreeMap<u32, Vec<CpuCacheIds>> = BTreeMap::new();
        for ids in cpus {
            cores.entry(ids.l1).or_default().push(ids.cpu);
            cache_groups.entry(ids.l3).or_default().push(*ids);
        }

        let cache_groups = cache_groups
            .into_values()
            .map(|mut group| {
                group.sort_by_key(|ids| (ids.l1, ids.cpu));
                group.into_iter().map(|ids| ids.cpu).collect()
            })
            .collect();

        Ok(Self {
            cores: cores.into_values().collect(),
            cache_groups,
            core_count: cpus.len(),
        })
    }

    pub fn cache_group_count(&self) -> usize {
        self.cache_groups.len()
    }

    /// Size of the smallest cache group.
    pub fn min_cache_group_size(&self) -> usize {
        self.cache_groups.iter().map(Vec::len).min().unwrap_or(0)
    }
}

impl fmt::Display for CpuTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpus, {} cores, {} cache groups",
            self.core_count,
            self.cores.len(),
            self.cache_groups.len()
        )
    }
}

/// Formats a core list the way `cpuset.cpus` expects it.
pub fn format_cpu_list(cpus: &[CoreId]) -> String {
    cpus.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a kernel cpu list such as `0-3,8,10-11`.
pub fn parse_cpu_list(list: &str) -> Result<Vec<CoreId>, String> {
    let mut cpus = Vec::new();
    for part in list.trim().split(',').filter(|part| !part.is_empty()) {
        let number = |raw: &str| {
            raw.parse::<CoreId>()
                .map_err(|e| format!("invalid cpu {raw:?} in {list:?}: {e}"))
        };
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (number(start)?, number(end)?);
                if start > end {
                    return Err(format!("reversed cpu range {part:?}"));
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(number(part)?),
        }
    }
    Ok(cpus)
}
