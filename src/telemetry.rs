// GPU telemetry probe (spec.md §4.1).
//
// Grounded on the original prototype's `nvidiaStatsAll`/`powermetricsStats`/`getGpuStatsSnapshot`
// trio, re-architected per spec.md §9's redesign flag: a tagged `Snapshot` variant in place of the
// prototype's stringly-typed `backend` field, with explicit per-backend projections instead of
// every caller re-deriving "which backend is this and what does its payload look like".

use crate::types::{GpuIndex, Timestamp};

#[derive(Debug, Clone, PartialEq)]
pub struct NvidiaDevice {
    pub index: GpuIndex,
    pub gpu_util_percent: f64,
    pub mem_used_mb: f64,
    pub mem_total_mb: f64,
    pub mem_util_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Nvidia {
        timestamp: Timestamp,
        devices: Vec<NvidiaDevice>,
    },
    Powermetrics {
        timestamp: Timestamp,
        gpu_util_percent: Option<f64>,
    },
    None {
        timestamp: Timestamp,
    },
}

impl Snapshot {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Snapshot::Nvidia { timestamp, .. } => *timestamp,
            Snapshot::Powermetrics { timestamp, .. } => *timestamp,
            Snapshot::None { timestamp } => *timestamp,
        }
    }

    // The device indices a scheduler may allocate against. NVIDIA reports one entry per card;
    // powermetrics reports Apple Silicon's single integrated GPU as device 0; a failed probe
    // reports no devices at all.
    pub fn gpu_indices(&self) -> Vec<GpuIndex> {
        match self {
            Snapshot::Nvidia { devices, .. } => devices.iter().map(|d| d.index).collect(),
            Snapshot::Powermetrics { .. } => vec![0],
            Snapshot::None { .. } => vec![],
        }
    }

    // Derived utilization for a single device: the per-device percentage for NVIDIA, the lone
    // powermetrics sample (0 otherwise), 0 for an unreachable backend.
    pub fn util_percent(&self, gpu: GpuIndex) -> f64 {
        match self {
            Snapshot::Nvidia { devices, .. } => devices
                .iter()
                .find(|d| d.index == gpu)
                .map(|d| d.gpu_util_percent)
                .unwrap_or(0.0),
            Snapshot::Powermetrics { gpu_util_percent, .. } => gpu_util_percent.unwrap_or(0.0),
            Snapshot::None { .. } => 0.0,
        }
    }

    pub fn mem_util_percent(&self, gpu: GpuIndex) -> Option<f64> {
        match self {
            Snapshot::Nvidia { devices, .. } => {
                devices.iter().find(|d| d.index == gpu).map(|d| d.mem_util_percent)
            }
            Snapshot::Powermetrics { .. } | Snapshot::None { .. } => None,
        }
    }

    // Derived utilization used by the Monitor's delta-throttling: the maximum across devices for
    // NVIDIA, the lone sample for powermetrics, 0 for an unreachable backend.
    pub fn derived_utilization(&self) -> f64 {
        match self {
            Snapshot::Nvidia { devices, .. } => devices
                .iter()
                .map(|d| d.gpu_util_percent)
                .fold(0.0_f64, f64::max),
            Snapshot::Powermetrics { gpu_util_percent, .. } => gpu_util_percent.unwrap_or(0.0),
            Snapshot::None { .. } => 0.0,
        }
    }
}

const NVIDIA_TIMEOUT_SECONDS: u64 = 2; // rounds the 1.5s budget up to safe_command's whole-second granularity
const POWERMETRICS_TIMEOUT_SECONDS: u64 = 15;

fn probe_nvidia(now: Timestamp) -> Option<Snapshot> {
    let out = match crate::command::safe_command(
        "nvidia-smi --query-gpu=index,memory.used,memory.total,utilization.gpu,utilization.memory --format=csv,noheader,nounits",
        NVIDIA_TIMEOUT_SECONDS,
    ) {
        Ok(out) => out,
        Err(e) => {
            tracing::debug!(error = %e, "nvidia-smi probe failed");
            return None;
        }
    };

    let devices: Vec<NvidiaDevice> = out
        .lines()
        .filter_map(|line| parse_nvidia_line(line.trim()))
        .collect();

    if devices.is_empty() {
        tracing::debug!("nvidia-smi produced no parseable device rows");
        None
    } else {
        Some(Snapshot::Nvidia { timestamp: now, devices })
    }
}

fn parse_nvidia_line(line: &str) -> Option<NvidiaDevice> {
    if line.is_empty() {
        return None;
    }
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        tracing::debug!(line, "malformed nvidia-smi row, skipping");
        return None;
    }
    let device = (|| {
        Some(NvidiaDevice {
            index: parts[0].parse().ok()?,
            mem_used_mb: parts[1].parse().ok()?,
            mem_total_mb: parts[2].parse().ok()?,
            gpu_util_percent: parts[3].parse().ok()?,
            mem_util_percent: parts[4].parse().ok()?,
        })
    })();
    if device.is_none() {
        tracing::debug!(line, "malformed nvidia-smi row, skipping");
    }
    device
}

#[cfg(target_os = "macos")]
fn is_apple_silicon() -> bool {
    std::env::consts::ARCH == "aarch64"
}

#[cfg(not(target_os = "macos"))]
fn is_apple_silicon() -> bool {
    false
}

fn probe_powermetrics(now: Timestamp) -> Option<Snapshot> {
    if !is_apple_silicon() {
        return None;
    }
    let is_root = unsafe { libc::geteuid() } == 0;
    let command = if is_root {
        "powermetrics --samplers gpu_power -n 1"
    } else {
        "sudo powermetrics --samplers gpu_power -n 1"
    };
    let out = match crate::command::safe_command(command, POWERMETRICS_TIMEOUT_SECONDS) {
        Ok(out) => out,
        Err(e) => {
            tracing::debug!(error = %e, "powermetrics probe failed");
            return None;
        }
    };

    let util = out.lines().find_map(|line| {
        let line = line.trim();
        let lower = line.to_lowercase();
        if !lower.starts_with("gpu hw active residency:") {
            return None;
        }
        let after_colon = line.splitn(2, ':').nth(1)?.trim();
        let percent_str = after_colon.split('%').next()?.trim();
        percent_str.parse::<f64>().ok()
    });

    Some(Snapshot::Powermetrics {
        timestamp: now,
        gpu_util_percent: util,
    })
}

// Pure, synchronous, bounded, and never fails: a bad tool invocation collapses to `Snapshot::None`
// rather than propagating an error, matching spec.md §4.1 ("the probe never raises"). Each backend
// can be compiled out independently via the `nvidia`/`powermetrics` cargo features, for builds
// targeting a host where one backend's tooling will never be present.
pub fn probe() -> Snapshot {
    let now = crate::time::unix_now();

    #[cfg(feature = "nvidia")]
    if let Some(snap) = probe_nvidia(now) {
        return snap;
    }
    #[cfg(feature = "powermetrics")]
    if let Some(snap) = probe_powermetrics(now) {
        return snap;
    }

    Snapshot::None { timestamp: now }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_nvidia_csv_line() {
        let dev = parse_nvidia_line("0, 1024, 8192, 42, 17").unwrap();
        assert_eq!(dev.index, 0);
        assert_eq!(dev.mem_used_mb, 1024.0);
        assert_eq!(dev.mem_total_mb, 8192.0);
        assert_eq!(dev.gpu_util_percent, 42.0);
        assert_eq!(dev.mem_util_percent, 17.0);
    }

    #[test]
    fn rejects_malformed_nvidia_csv_line() {
        assert!(parse_nvidia_line("").is_none());
        assert!(parse_nvidia_line("0, 1024").is_none());
        assert!(parse_nvidia_line("not, a, number, here, either").is_none());
    }

    #[test]
    fn nvidia_derived_utilization_is_max_across_devices() {
        let snap = Snapshot::Nvidia {
            timestamp: 0,
            devices: vec![
                NvidiaDevice { index: 0, gpu_util_percent: 10.0, mem_used_mb: 0.0, mem_total_mb: 1.0, mem_util_percent: 0.0 },
                NvidiaDevice { index: 1, gpu_util_percent: 70.0, mem_used_mb: 0.0, mem_total_mb: 1.0, mem_util_percent: 0.0 },
            ],
        };
        assert_eq!(snap.derived_utilization(), 70.0);
        assert_eq!(snap.gpu_indices(), vec![0, 1]);
    }

    #[test]
    fn powermetrics_derived_utilization_is_the_lone_sample() {
        let snap = Snapshot::Powermetrics { timestamp: 0, gpu_util_percent: Some(33.0) };
        assert_eq!(snap.derived_utilization(), 33.0);
        assert_eq!(snap.gpu_indices(), vec![0]);
    }

    #[test]
    fn none_backend_reports_zero_utilization_and_no_devices() {
        let snap = Snapshot::None { timestamp: 0 };
        assert_eq!(snap.derived_utilization(), 0.0);
        assert!(snap.gpu_indices().is_empty());
    }
}
