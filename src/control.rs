// Control surface (spec.md §6): the file-based inbox/cancel/snapshot protocol that lets external
// tools talk to a running daemon without a socket or RPC framework.
//
// Grounded on the original prototype's `serve.py`/`submit.py`/`cancel.py`/`status.py` quartet of
// tiny filesystem-polling scripts. The snapshot writer resolves spec.md §9's open question
// ("snapshot writes are not atomic... implementations should use temp-file + rename") by writing
// to a sibling `.tmp` file and renaming it into place, which is atomic on the same filesystem.

use crate::error::ControlSurfaceError;
use crate::job::Job;
use crate::scheduler::SchedulerCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub struct ControlSurface {
    pub inbox_dir: PathBuf,
    pub control_dir: PathBuf,
    pub state_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Debug, Serialize)]
struct StateSnapshot {
    queued: Vec<Job>,
    running: Vec<Job>,
}

impl ControlSurface {
    pub fn new(inbox_dir: PathBuf, control_dir: PathBuf, state_dir: PathBuf) -> std::io::Result<ControlSurface> {
        std::fs::create_dir_all(&inbox_dir)?;
        std::fs::create_dir_all(&control_dir)?;
        std::fs::create_dir_all(&state_dir)?;
        Ok(ControlSurface { inbox_dir, control_dir, state_dir })
    }

    // Reads every `*.json` file in `inbox/`, submits what parses, and unlinks on success. A
    // malformed file is logged and left in place so an operator can inspect it; sweep will just
    // keep skipping it until it is fixed or removed by hand.
    pub fn sweep_inbox(&self, core: &SchedulerCore) -> std::io::Result<()> {
        for entry in read_json_files(&self.inbox_dir)? {
            let path = entry;
            match std::fs::read_to_string(&path).map_err(ControlSurfaceError::from).and_then(|raw| {
                Job::from_json(&raw).map_err(ControlSurfaceError::from)
            }) {
                Ok(parsed) => {
                    let job_id = parsed.id.clone();
                    let job = Job::from_inbox_submission(parsed, crate::time::unix_now());
                    if !core.submit_parsed_job(job) {
                        tracing::warn!(job_id = %job_id, "duplicate job id in inbox, skipping");
                    }
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "malformed inbox file, leaving in place");
                }
            }
        }
        Ok(())
    }

    // Reads every `cancel_{jobId}.json` in `control/`, cancels the named job, and unlinks
    // unconditionally -- a cancel request for an unknown or already-terminal job is not an error.
    pub fn sweep_control(&self, core: &SchedulerCore) -> std::io::Result<()> {
        for path in read_json_files(&self.control_dir)? {
            match std::fs::read_to_string(&path)
                .map_err(ControlSurfaceError::from)
                .and_then(|raw| serde_json::from_str::<CancelRequest>(&raw).map_err(ControlSurfaceError::from))
            {
                Ok(req) => {
                    core.cancel_job(&req.job_id, crate::time::unix_now());
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "malformed control file, leaving in place");
                }
            }
        }
        Ok(())
    }

    // Writes state/snapshot.json via temp-file + rename so a concurrent `status` read never
    // observes a half-written file.
    pub fn write_snapshot(&self, queued: Vec<Job>, running: Vec<Job>) -> std::io::Result<()> {
        let snapshot = StateSnapshot { queued, running };
        let body = serde_json::to_vec_pretty(&snapshot)?;
        let final_path = self.state_dir.join("snapshot.json");
        let tmp_path = self.state_dir.join("snapshot.json.tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

// Reads a snapshot written by write_snapshot, tolerating a missing or partially-written file --
// callers (the status CLI) treat either as "no data yet" rather than an error.
pub fn read_snapshot(state_dir: &Path) -> Option<(Vec<Job>, Vec<Job>)> {
    let raw = std::fs::read_to_string(state_dir.join("snapshot.json")).ok()?;
    let snapshot: StateSnapshot = serde_json::from_str(&raw).ok()?;
    Some((snapshot.queued, snapshot.running))
}

fn read_json_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Monitor;
    use crate::policy::{PolicyConfig, PolicyEngine};
    use crate::queue::QueueManager;
    use crate::supervisor::ProcessSupervisor;
    use std::sync::Arc;
    use std::time::Duration;

    fn surface_and_core(root: &Path) -> (ControlSurface, SchedulerCore) {
        let surface = ControlSurface::new(
            root.join("inbox"),
            root.join("control"),
            root.join("state"),
        )
        .unwrap();
        let core = SchedulerCore::new(
            vec![0],
            Arc::new(QueueManager::new(0.0)),
            Arc::new(PolicyEngine::new(PolicyConfig::default())),
            Arc::new(ProcessSupervisor::new(root.join("logs"))),
            Arc::new(Monitor::new(Duration::from_secs(1), 10.0)),
        );
        (surface, core)
    }

    #[test]
    fn sweep_inbox_submits_and_unlinks_valid_file() {
        let root = tempfile::tempdir().unwrap();
        let (surface, core) = surface_and_core(root.path());
        let file_path = surface.inbox_dir.join("a.json");
        std::fs::write(&file_path, r#"{"command":"echo hi"}"#).unwrap();

        surface.sweep_inbox(&core).unwrap();

        assert!(!file_path.exists());
        assert_eq!(core.queue().get_queued_jobs().len(), 1);
    }

    #[test]
    fn sweep_inbox_leaves_malformed_file_in_place() {
        let root = tempfile::tempdir().unwrap();
        let (surface, core) = surface_and_core(root.path());
        let file_path = surface.inbox_dir.join("bad.json");
        std::fs::write(&file_path, "{not json").unwrap();

        surface.sweep_inbox(&core).unwrap();

        assert!(file_path.exists());
        assert_eq!(core.queue().get_queued_jobs().len(), 0);
    }

    #[test]
    fn sweep_inbox_preserves_the_submitted_job_id() {
        let root = tempfile::tempdir().unwrap();
        let (surface, core) = surface_and_core(root.path());
        let file_path = surface.inbox_dir.join("a.json");
        std::fs::write(&file_path, r#"{"id":"fixed-id-123","command":"echo hi"}"#).unwrap();

        surface.sweep_inbox(&core).unwrap();

        assert_eq!(core.queue().get_job("fixed-id-123").unwrap().command, "echo hi");
    }

    #[test]
    fn sweep_inbox_skips_a_duplicate_job_id() {
        let root = tempfile::tempdir().unwrap();
        let (surface, core) = surface_and_core(root.path());
        core.submit_job(crate::job::NewJob {
            command: "sh -c 'exit 0'".to_string(),
            ..Default::default()
        });
        let existing_id = core.queue().get_queued_jobs()[0].id.clone();

        let file_path = surface.inbox_dir.join("dup.json");
        std::fs::write(&file_path, format!(r#"{{"id":"{existing_id}","command":"echo clobber"}}"#)).unwrap();

        surface.sweep_inbox(&core).unwrap();

        assert!(!file_path.exists());
        // the original job survives untouched; the duplicate submission was skipped, not merged.
        assert_eq!(core.queue().get_job(&existing_id).unwrap().command, "sh -c 'exit 0'");
    }

    #[test]
    fn sweep_control_cancels_named_job() {
        let root = tempfile::tempdir().unwrap();
        let (surface, core) = surface_and_core(root.path());
        let id = core.submit_job(crate::job::NewJob {
            command: "sleep 5".to_string(),
            ..Default::default()
        });

        let file_path = surface.control_dir.join(format!("cancel_{id}.json"));
        std::fs::write(&file_path, format!(r#"{{"jobId":"{id}"}}"#)).unwrap();

        surface.sweep_control(&core).unwrap();

        assert!(!file_path.exists());
        assert_eq!(core.queue().get_job(&id).unwrap().status, crate::job::JobStatus::Cancelled);
    }

    #[test]
    fn snapshot_round_trips_through_temp_rename() {
        let root = tempfile::tempdir().unwrap();
        let (surface, _core) = surface_and_core(root.path());
        let job = crate::job::Job::new(crate::job::NewJob {
            command: "echo hi".to_string(),
            ..Default::default()
        });
        surface.write_snapshot(vec![job.clone()], vec![]).unwrap();

        let (queued, running) = read_snapshot(&surface.state_dir).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, job.id);
        assert!(running.is_empty());
        assert!(!surface.state_dir.join("snapshot.json.tmp").exists());
    }

    #[test]
    fn missing_snapshot_is_none_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(read_snapshot(&root.path().join("state")).is_none());
    }
}
