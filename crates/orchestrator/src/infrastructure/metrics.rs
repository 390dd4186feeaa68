use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use api_types::InstanceId;
use api_types::PriorityTier;
use influxdb_line_protocol::LineProtocolBuilder;

// Wrapper struct for Vec<u8> that implements Display
pub struct BytesWrapper(Vec<u8>);

impl fmt::Display for BytesWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                tracing::error!(msg = "Failed to convert bytes to string");
                Err(fmt::Error)
            }
        }
    }
}

impl From<Vec<u8>> for BytesWrapper {
    fn from(bytes: Vec<u8>) -> Self {
        BytesWrapper(bytes)
    }
}

pub fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Line protocol record of an instance moving between tiers.
pub fn tier_change_line(
    id: InstanceId,
    pid: u32,
    from: PriorityTier,
    to: PriorityTier,
    timestamp: i64,
) -> String {
    let lp = LineProtocolBuilder::new()
        .measurement("orchestrator_tier_event")
        .tag("instance", &id.to_string())
        .tag("from", from.name())
        .tag("to", to.name())
        .field("pid", i64::from(pid))
        .timestamp(timestamp)
        .close_line()
        .build();
    BytesWrapper::from(lp).to_string()
}

/// Emits a tier change on the `metrics` target.
pub fn record_tier_change(id: InstanceId, pid: u32, from: PriorityTier, to: PriorityTier) {
    let lp_str = tier_change_line(id, pid, from, to, current_time());
    tracing::info!(target: "metrics", msg = %lp_str);
}

/// Emits a failed resource group write on the `metrics` target.
pub fn record_write_failure(group: &str) {
    let lp = LineProtocolBuilder::new()
        .measurement("orchestrator_group_write_failure")
        .tag("group", group)
        .field("value", 1i64)
        .timestamp(current_time())
        .close_line()
        .build();
    let lp_str = BytesWrapper::from(lp).to_string();
    tracing::info!(target: "metrics", msg = %lp_str);
}
