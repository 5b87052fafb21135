// Daemon configuration surface (spec.md §6's daemon flags). The teacher's own config parsing read
// a hand-rolled INI file; since this daemon's whole flag surface fits comfortably on a command
// line and the CLI tools (submit/cancel/status) already need `clap`, the daemon binary uses the
// same derive-based parser rather than introducing a second configuration mechanism.

use crate::policy::PolicyConfig;
use crate::types::GpuIndex;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gpusched", about = "Single-host GPU job scheduler daemon")]
pub struct DaemonConfig {
    /// Comma-separated GPU device indices to manage. Defaults to autodetecting every device the
    /// telemetry probe reports at startup.
    #[arg(long, value_delimiter = ',')]
    pub gpus: Option<Vec<GpuIndex>>,

    #[arg(long, default_value = "/tmp/gpusched/inbox")]
    pub inbox_dir: PathBuf,

    #[arg(long, default_value = "/tmp/gpusched/control")]
    pub control_dir: PathBuf,

    #[arg(long, default_value = "/tmp/gpusched/state")]
    pub state_dir: PathBuf,

    #[arg(long, default_value = "/tmp/gpusched")]
    pub log_dir: PathBuf,

    #[arg(long, default_value_t = 1)]
    pub snapshot_interval_seconds: u64,

    /// Coefficient subtracted from a job's nominal priority per second waited in queue.
    #[arg(long, default_value_t = 0.0)]
    pub aging_factor: f64,

    /// Percentage points derived utilization must move before the monitor notifies the core.
    #[arg(long, default_value_t = 10.0)]
    pub util_delta_threshold: f64,

    #[arg(long, default_value_t = PolicyConfig::default().static_util_threshold)]
    pub static_util_threshold: f64,

    #[arg(long, default_value_t = PolicyConfig::default().static_mem_threshold)]
    pub static_mem_threshold: f64,

    #[arg(long, default_value_t = PolicyConfig::default().history_window)]
    pub history_window: usize,

    #[arg(long, default_value_t = PolicyConfig::default().spike_delta)]
    pub spike_delta: f64,

    #[arg(long, default_value_t = PolicyConfig::default().cooldown_seconds)]
    pub cooldown_seconds: u64,
}

impl DaemonConfig {
    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            static_util_threshold: self.static_util_threshold,
            static_mem_threshold: self.static_mem_threshold,
            history_window: self.history_window,
            spike_delta: self.spike_delta,
            cooldown_seconds: self.cooldown_seconds,
        }
    }

    // Autodetects devices from a fresh telemetry probe when `--gpus` was not given.
    pub fn resolve_gpu_indices(&self) -> Vec<GpuIndex> {
        match &self.gpus {
            Some(gpus) => gpus.clone(),
            None => crate::telemetry::probe().gpu_indices(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_engine_defaults() {
        let cfg = DaemonConfig::parse_from(["gpusched"]);
        let policy = cfg.policy_config();
        let default_policy = PolicyConfig::default();
        assert_eq!(policy.static_util_threshold, default_policy.static_util_threshold);
        assert_eq!(policy.history_window, default_policy.history_window);
        assert_eq!(cfg.snapshot_interval_seconds, 1);
        assert!(cfg.gpus.is_none());
    }

    #[test]
    fn parses_explicit_gpu_list() {
        let cfg = DaemonConfig::parse_from(["gpusched", "--gpus", "0,1,2"]);
        assert_eq!(cfg.gpus, Some(vec![0, 1, 2]));
    }
}
