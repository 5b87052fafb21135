// Job model used by the scheduler.
//
// A Job is an immutable-identity, mutable-state entity (spec.md §3). Its status and the
// timestamp/pid/assignedGpu fields that accompany a status change are written exclusively by
// state_machine::transition -- nothing else in this crate may assign `status` directly.

use crate::types::{GpuIndex, JobId, Pid, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled)
    }
}

fn default_priority() -> i64 {
    10
}
fn default_required_gpus() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_status() -> JobStatus {
    JobStatus::Queued
}
fn default_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    // spec.md §6 lists only `command` as a required inbox field; an inbox file with no `id` gets
    // a freshly minted one here. The submit CLI always writes its own v4 id, so the common path
    // preserves whatever id the caller already handed out (see `from_inbox_submission`).
    #[serde(default = "default_id")]
    pub id: JobId,
    pub command: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_required_gpus")]
    pub required_gpus: u32,
    #[serde(default)]
    pub required_mem_mb: Option<u64>,
    #[serde(default = "default_true")]
    pub exclusive: bool,
    #[serde(default = "default_true")]
    pub preemptible: bool,
    #[serde(default)]
    pub max_runtime_seconds: Option<u64>,
    #[serde(default = "default_status")]
    pub status: JobStatus,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub finished_at: Option<Timestamp>,
    #[serde(default)]
    pub assigned_gpu: GpuIndex,
    #[serde(default)]
    pub pid: Option<Pid>,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

// Parameters required to submit a job; everything else takes the defaults from spec.md §6 ("default
// fields" for the inbox interface).
pub struct NewJob {
    pub command: String,
    pub priority: i64,
    pub required_gpus: u32,
    pub required_mem_mb: Option<u64>,
    pub exclusive: bool,
    pub preemptible: bool,
    pub max_runtime_seconds: Option<u64>,
}

impl Default for NewJob {
    fn default() -> Self {
        NewJob {
            command: String::new(),
            priority: default_priority(),
            required_gpus: default_required_gpus(),
            required_mem_mb: None,
            exclusive: true,
            preemptible: true,
            max_runtime_seconds: None,
        }
    }
}

impl Job {
    pub fn new(spec: NewJob) -> Job {
        Job {
            id: uuid::Uuid::new_v4().to_string(),
            command: spec.command,
            priority: spec.priority,
            required_gpus: spec.required_gpus.max(1),
            required_mem_mb: spec.required_mem_mb,
            exclusive: spec.exclusive,
            preemptible: spec.preemptible,
            max_runtime_seconds: spec.max_runtime_seconds,
            status: JobStatus::Queued,
            created_at: crate::time::unix_now(),
            started_at: None,
            finished_at: None,
            assigned_gpu: 0,
            pid: None,
            meta: HashMap::new(),
        }
    }

    // Normalizes a `Job` freshly parsed from an inbox file into a new Queued submission: the id,
    // command, and the other submission-time fields from the file are kept as-is (the submit CLI
    // is the one place that mints `id`, per spec.md §3's "globally unique" note -- the daemon
    // never mints its own), but every piece of lifecycle state is reset, since a file dropped in
    // `inbox/` is always a brand-new submission regardless of what its `status`/timestamp fields
    // happened to contain.
    pub fn from_inbox_submission(mut parsed: Job, now: Timestamp) -> Job {
        parsed.status = JobStatus::Queued;
        parsed.created_at = now;
        parsed.started_at = None;
        parsed.finished_at = None;
        parsed.assigned_gpu = 0;
        parsed.pid = None;
        parsed
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Job> {
        serde_json::from_str(s)
    }

    // Watchdog check: has this job been running longer than its maxRuntimeSeconds deadline?
    // Jobs without a deadline never time out.
    pub fn has_exceeded_runtime(&self, now: Timestamp) -> bool {
        match (self.max_runtime_seconds, self.started_at) {
            (Some(max), Some(started)) => now.saturating_sub(started) >= max,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_job_has_spec_defaults() {
        let job = Job::new(NewJob {
            command: "sleep 1".to_string(),
            ..Default::default()
        });
        assert_eq!(job.priority, 10);
        assert_eq!(job.required_gpus, 1);
        assert!(job.exclusive);
        assert!(job.preemptible);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.assigned_gpu, 0);
        assert!(job.pid.is_none());
        // RFC 4122 v4 string form: 8-4-4-4-12 hex digits.
        assert_eq!(job.id.len(), 36);
    }

    #[test]
    fn json_round_trip_preserves_value() {
        let job = Job::new(NewJob {
            command: "python train.py".to_string(),
            priority: 3,
            required_gpus: 2,
            ..Default::default()
        });
        let encoded = job.to_json().unwrap();
        let decoded = Job::from_json(&encoded).unwrap();
        assert_eq!(job, decoded);
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let raw = r#"{"id":"x","command":"echo hi","futureField":{"nested":true}}"#;
        let job = Job::from_json(raw).expect("tolerant of unknown keys");
        assert_eq!(job.command, "echo hi");
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let raw = r#"{"priority": 1}"#;
        assert!(Job::from_json(raw).is_err());
    }

    #[test]
    fn watchdog_fires_after_deadline() {
        let mut job = Job::new(NewJob {
            command: "sleep 100".to_string(),
            max_runtime_seconds: Some(2),
            ..Default::default()
        });
        job.started_at = Some(100);
        assert!(!job.has_exceeded_runtime(101));
        assert!(job.has_exceeded_runtime(102));
        assert!(job.has_exceeded_runtime(150));
    }

    #[test]
    fn watchdog_never_fires_without_deadline() {
        let mut job = Job::new(NewJob {
            command: "sleep 100".to_string(),
            ..Default::default()
        });
        job.started_at = Some(0);
        assert!(!job.has_exceeded_runtime(1_000_000));
    }

    proptest::proptest! {
        // spec.md §8: "Round-trip: fromJson(toJson(job)) = job for every reachable job value."
        #[test]
        fn round_trip_holds_for_arbitrary_job_values(
            command in ".{0,40}",
            priority in -1_000_i64..1_000,
            required_gpus in 1_u32..8,
            required_mem_mb in proptest::option::of(1_u64..1_000_000),
            exclusive in any::<bool>(),
            preemptible in any::<bool>(),
            max_runtime_seconds in proptest::option::of(1_u64..100_000),
            status_idx in 0_u8..6,
            created_at in 0_u64..4_000_000_000,
            started_at in proptest::option::of(0_u64..4_000_000_000),
            finished_at in proptest::option::of(0_u64..4_000_000_000),
            assigned_gpu in 0_u32..8,
            pid in proptest::option::of(1_u32..65536),
        ) {
            let status = [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Paused,
                JobStatus::Finished,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ][status_idx as usize];

            let job = Job {
                id: uuid::Uuid::new_v4().to_string(),
                command,
                priority,
                required_gpus,
                required_mem_mb,
                exclusive,
                preemptible,
                max_runtime_seconds,
                status,
                created_at,
                started_at,
                finished_at,
                assigned_gpu,
                pid,
                meta: HashMap::new(),
            };

            let encoded = job.to_json().unwrap();
            let decoded = Job::from_json(&encoded).unwrap();
            prop_assert_eq!(job, decoded);
        }
    }
}
