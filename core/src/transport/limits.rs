// Resource limits for the transport
//
// Hard ceilings on connections, streams and process memory, scaled from the
// host's memory and CPU count. They bound file-descriptor and memory use when
// peer counts run away; they are not a throughput knob.

use libp2p::connection_limits::ConnectionLimits;
use sysinfo::{System, SystemExt};

const GIB: u64 = 1024 * 1024 * 1024;

/// Detected host capacity used to scale [`ResourceLimits`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapacity {
    /// Total physical memory in bytes
    pub total_memory: u64,
    /// Logical CPUs available to this process
    pub cpus: usize,
}

impl HostCapacity {
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            total_memory: system.total_memory(),
            cpus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub max_established_incoming: u32,
    pub max_established_outgoing: u32,
    pub max_established_per_peer: u32,
    pub max_pending: u32,
    /// Concurrent streams per stream protocol
    pub max_concurrent_streams: usize,
    /// Fraction of total memory above which new connections are denied
    pub max_memory_fraction: f64,
}

impl ResourceLimits {
    /// Limits scaled for the current host
    pub fn auto_scale() -> Self {
        let host = HostCapacity::detect();
        let limits = Self::scaled_for(host);
        tracing::debug!(
            "Resource limits for {} GiB / {} cpus: {:?}",
            host.total_memory / GIB,
            host.cpus,
            limits
        );
        limits
    }

    /// Start from a fixed base and grow per GiB of memory and per CPU,
    /// clamped so that tiny hosts still work and huge hosts stay bounded.
    pub fn scaled_for(host: HostCapacity) -> Self {
        let gib = (host.total_memory / GIB).clamp(1, 64) as u32;
        let cpus = host.cpus.clamp(1, 64) as u32;

        Self {
            max_established_incoming: (64 * gib).clamp(64, 1024),
            max_established_outgoing: (64 * gib).clamp(64, 1024),
            max_established_per_peer: 8,
            max_pending: (16 * cpus).clamp(32, 256),
            max_concurrent_streams: (128 * gib as usize).clamp(128, 4096),
            max_memory_fraction: 0.9,
        }
    }

    pub(crate) fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits::default()
            .with_max_established_incoming(Some(self.max_established_incoming))
            .with_max_established_outgoing(Some(self.max_established_outgoing))
            .with_max_established_per_peer(Some(self.max_established_per_peer))
            .with_max_pending_incoming(Some(self.max_pending))
            .with_max_pending_outgoing(Some(self.max_pending))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::auto_scale()
    }
}
