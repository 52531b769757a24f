use async_trait::async_trait;

use super::host::{Host, HostIdentity};

/// External collaborator that knows how to ask the cluster for its current
/// node list and how to probe a single node.
///
/// Implementations typically wrap a protocol-specific discovery client; the
/// polling daemon is their only caller. Both operations may perform network
/// I/O and may fail: a failed `get_host_list` leaves membership unchanged for
/// that cycle, and a failed `run_health_check` (any `Err`) means the probed
/// host is unhealthy.
#[async_trait]
pub trait HostListProvider: Send + Sync {
    /// Fetch the cluster's current node list.
    async fn get_host_list(&self) -> anyhow::Result<Vec<HostIdentity>>;

    /// Probe one host; `Ok(())` means the host passed the check.
    async fn run_health_check(&self, host: &Host) -> anyhow::Result<()>;

    /// Release any resources held by the provider. Called once when the
    /// polling daemon stops.
    async fn destroy(&self) {}
}
