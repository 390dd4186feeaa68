//! Reads the CPU cache layout from sysfs.

use std::fs;
use std::path::Path;

use crate::domain::topology::CoreId;
use crate::domain::topology::CpuCacheIds;
use crate::domain::topology::parse_cpu_list;
use crate::domain::topology::CpuTopology;
use crate::domain::topology::TopologyError;

pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Probes `<root>/cpuN/cache/indexK/{level,id}` for every online logical CPU.
///
/// Offline CPUs keep their `cpuN` directory but expose no cache information.
/// When `<root>/online` is absent every `cpuN` directory is used.
pub fn probe_topology(root: &Path) -> Result<CpuTopology, TopologyError> {
    let online = read_online(root)?;
    let entries = fs::read_dir(root).map_err(|e| TopologyError::Read {
        message: format!("{}: {e}", root.display()),
    })?;

    let mut cpus: Vec<CoreId> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            name.to_str()?.strip_prefix("cpu")?.parse().ok()
        })
        .filter(|cpu| online.as_ref().is_none_or(|online| online.contains(cpu)))
        .collect();
    cpus.sort_unstable();

    let ids = cpus
        .into_iter()
        .map(|cpu| read_cache_ids(root, cpu))
        .collect::<Result<Vec<_>, _>>()?;

    let topology = CpuTopology::from_cache_ids(&ids)?;
    tracing::info!(%topology, "found cpu topology");
    Ok(topology)
}

fn read_online(root: &Path) -> Result<Option<Vec<CoreId>>, TopologyError> {
    let path = root.join("online");
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("{} is missing, assuming every cpu is online", path.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(TopologyError::Read {
                message: format!("{}: {e}", path.display()),
            })
        }
    };
    parse_cpu_list(&raw)
        .map(Some)
        .map_err(|message| TopologyError::Read { message })
}

fn read_cache_ids(root: &Path, cpu: CoreId) -> Result<CpuCacheIds, TopologyError> {
    let cache_dir = root.join(format!("cpu{cpu}")).join("cache");
    let invalid = |message: String| TopologyError::InvalidCache { cpu, message };

    let entries = fs::read_dir(&cache_dir)
        .map_err(|e| invalid(format!("read {}: {e}", cache_dir.display())))?;

    let mut l1 = None;
    let mut l3 = None;
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("index") {
            continue;
        }
        let level = read_number(&entry.path().join("level")).map_err(&invalid)?;
        let id = read_number(&entry.path().join("id")).map_err(&invalid)?;
        match level {
            1 => match l1 {
                Some(previous) if previous != id => {
                    return Err(invalid(format!(
                        "different L1i and L1d ids ({previous} vs {id})"
                    )));
                }
                _ => l1 = Some(id),
            },
            3 => l3 = Some(id),
            _ => {}
        }
    }

    Ok(CpuCacheIds {
        cpu,
        l1: l1.ok_or_else(|| invalid("no L1 cache".to_string()))?,
        l3: l3.ok_or_else(|| invalid("no L3 cache".to_string()))?,
    })
}

fn read_number(path: &Path) -> Result<u32, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    raw.trim()
        .parse()
        .map_err(|e| format!("parse {}: {e}", path.display()))
}
