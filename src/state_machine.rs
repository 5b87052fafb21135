// Job lifecycle transition table (spec.md §3):
//
//   Queued  -> Running, Cancelled
//   Running -> Paused, Finished, Failed, Cancelled
//   Paused  -> Running, Cancelled
//   Finished, Failed, Cancelled are terminal: no outgoing transitions.
//
// This is the only place in the crate allowed to assign `Job::status`; every caller that wants to
// move a job between states goes through one of the convenience wrappers below so that the
// timestamp/pid/assignedGpu bookkeeping for that transition can never be forgotten at a call site.

use crate::error::IllegalTransition;
use crate::job::{Job, JobStatus};
use crate::types::{GpuIndex, Pid};

fn transition(job: &mut Job, to: JobStatus) -> Result<(), IllegalTransition> {
    let from = job.status;
    let allowed = matches!(
        (from, to),
        (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Cancelled)
            | (JobStatus::Running, JobStatus::Paused)
            | (JobStatus::Running, JobStatus::Finished)
            | (JobStatus::Running, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Cancelled)
            | (JobStatus::Paused, JobStatus::Running)
            | (JobStatus::Paused, JobStatus::Cancelled)
    );
    if !allowed {
        return Err(IllegalTransition { from, to });
    }
    job.status = to;
    Ok(())
}

// Queued -> Running. Records the assigned GPU and pid handed out by the allocator/supervisor, and
// stamps startedAt the first time the job ever runs (a job resumed out of Paused keeps its
// original startedAt, see `resume`).
pub fn start(job: &mut Job, now: u64, gpu: GpuIndex, pid: Pid) -> Result<(), IllegalTransition> {
    transition(job, JobStatus::Running)?;
    job.assigned_gpu = gpu;
    job.pid = Some(pid);
    if job.started_at.is_none() {
        job.started_at = Some(now);
    }
    Ok(())
}

// Running -> Paused, on preemption. The pid is cleared: the supervisor has sent SIGSTOP to the
// process group, but the process is no longer "owned" by an active scheduling slot until resumed.
pub fn pause(job: &mut Job) -> Result<(), IllegalTransition> {
    transition(job, JobStatus::Paused)
}

// Paused -> Running, when a GPU frees up again for a preempted job. startedAt is left untouched so
// maxRuntimeSeconds measures wall-clock time since the job's very first start, including time
// spent paused.
pub fn resume(job: &mut Job, gpu: GpuIndex, pid: Pid) -> Result<(), IllegalTransition> {
    transition(job, JobStatus::Running)?;
    job.assigned_gpu = gpu;
    job.pid = Some(pid);
    Ok(())
}

// Running -> Finished, on a zero exit code.
pub fn finish(job: &mut Job, now: u64) -> Result<(), IllegalTransition> {
    transition(job, JobStatus::Finished)?;
    job.finished_at = Some(now);
    job.pid = None;
    job.assigned_gpu = 0;
    Ok(())
}

// Running -> Failed, on any non-zero exit code or a supervisor-detected crash. Spec.md is explicit
// that this mapping is strict: there is no "unknown" exit status, every non-zero code is Failed.
pub fn fail(job: &mut Job, now: u64) -> Result<(), IllegalTransition> {
    transition(job, JobStatus::Failed)?;
    job.finished_at = Some(now);
    job.pid = None;
    job.assigned_gpu = 0;
    Ok(())
}

// Queued -> Failed directly, for a job whose spawn attempt failed before it ever ran. Spec.md's
// error-handling table requires this ("child spawn failure: release GPUs, transition to Failed")
// even though the lifecycle table has no Queued->Failed edge -- a job that never started has no
// Running state to fail out of, and Finished would misreport a launch failure as success.
pub fn fail_to_launch(job: &mut Job, now: u64) -> Result<(), IllegalTransition> {
    if job.status != JobStatus::Queued {
        return Err(IllegalTransition { from: job.status, to: JobStatus::Failed });
    }
    job.status = JobStatus::Failed;
    job.finished_at = Some(now);
    job.pid = None;
    job.assigned_gpu = 0;
    Ok(())
}

// Queued|Running|Paused -> Cancelled, from the control surface or the CLI.
pub fn cancel(job: &mut Job, now: u64) -> Result<(), IllegalTransition> {
    transition(job, JobStatus::Cancelled)?;
    job.finished_at = Some(now);
    job.pid = None;
    job.assigned_gpu = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;

    fn queued() -> Job {
        Job::new(NewJob {
            command: "echo hi".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn happy_path_through_to_finish() {
        let mut job = queued();
        start(&mut job, 10, 0, 100).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(10));
        assert_eq!(job.pid, Some(100));

        pause(&mut job).unwrap();
        assert_eq!(job.status, JobStatus::Paused);

        resume(&mut job, 1, 200).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(10)); // unchanged across pause/resume
        assert_eq!(job.assigned_gpu, 1);

        finish(&mut job, 20).unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.finished_at, Some(20));
        assert!(job.pid.is_none());
        assert_eq!(job.assigned_gpu, 0);
    }

    #[test]
    fn terminal_transitions_clear_assigned_gpu() {
        let mut job = queued();
        start(&mut job, 0, 3, 1).unwrap();
        assert_eq!(job.assigned_gpu, 3);
        fail(&mut job, 1).unwrap();
        assert_eq!(job.assigned_gpu, 0);

        let mut job = queued();
        start(&mut job, 0, 2, 1).unwrap();
        cancel(&mut job, 1).unwrap();
        assert_eq!(job.assigned_gpu, 0);

        let mut job = queued();
        fail_to_launch(&mut job, 1).unwrap();
        assert_eq!(job.assigned_gpu, 0);
    }

    #[test]
    fn non_zero_exit_maps_to_failed() {
        let mut job = queued();
        start(&mut job, 0, 0, 1).unwrap();
        fail(&mut job, 5).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn cancel_reachable_from_every_non_terminal_state() {
        let mut job = queued();
        cancel(&mut job, 1).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let mut job = queued();
        start(&mut job, 0, 0, 1).unwrap();
        cancel(&mut job, 2).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let mut job = queued();
        start(&mut job, 0, 0, 1).unwrap();
        pause(&mut job).unwrap();
        cancel(&mut job, 3).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let mut job = queued();
        start(&mut job, 0, 0, 1).unwrap();
        finish(&mut job, 1).unwrap();

        assert_eq!(
            start(&mut job, 1, 0, 2),
            Err(IllegalTransition { from: JobStatus::Finished, to: JobStatus::Running })
        );
        assert_eq!(
            cancel(&mut job, 1),
            Err(IllegalTransition { from: JobStatus::Finished, to: JobStatus::Cancelled })
        );
    }

    #[test]
    fn fail_to_launch_only_applies_to_queued_jobs() {
        let mut job = queued();
        fail_to_launch(&mut job, 5).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.finished_at, Some(5));

        let mut job = queued();
        start(&mut job, 0, 0, 1).unwrap();
        assert!(fail_to_launch(&mut job, 1).is_err());
    }

    #[test]
    fn queued_cannot_pause_or_finish_directly() {
        let mut job = queued();
        assert!(pause(&mut job).is_err());
        assert!(finish(&mut job, 0).is_err());
        assert!(fail(&mut job, 0).is_err());
    }

    #[derive(Debug, Clone, Copy)]
    enum Action {
        Start,
        Pause,
        Resume,
        Finish,
        Fail,
        Cancel,
    }

    fn apply(action: Action, job: &mut Job, now: u64) -> Result<(), IllegalTransition> {
        match action {
            Action::Start => start(job, now, 0, 1),
            Action::Pause => pause(job),
            Action::Resume => resume(job, 0, 1),
            Action::Finish => finish(job, now),
            Action::Fail => fail(job, now),
            Action::Cancel => cancel(job, now),
        }
    }

    proptest::proptest! {
        // spec.md §8: "the status trajectory is a prefix of some path in the legal-transition
        // DAG." Every wrapper either applies a legal edge or leaves status untouched (returning
        // Err); once a terminal state is reached, every subsequent action must be rejected and
        // leave the job exactly as it was.
        #[test]
        fn random_action_sequences_never_leave_the_legal_dag(
            actions in proptest::collection::vec(0_u8..6, 0..20),
            now in 0_u64..1_000_000,
        ) {
            let mut job = queued();
            let mut terminal_seen = false;
            for code in actions {
                let action = [Action::Start, Action::Pause, Action::Resume, Action::Finish, Action::Fail, Action::Cancel][code as usize];
                let before = job.status;
                if terminal_seen {
                    proptest::prop_assert!(apply(action, &mut job, now).is_err());
                    proptest::prop_assert_eq!(job.status, before);
                    continue;
                }
                if apply(action, &mut job, now).is_err() {
                    proptest::prop_assert_eq!(job.status, before);
                } else {
                    proptest::prop_assert_ne!(job.status, before);
                }
                if job.status.is_terminal() {
                    terminal_seen = true;
                    proptest::prop_assert!(job.pid.is_none());
                    proptest::prop_assert!(job.finished_at.is_some());
                }
            }
        }
    }
}
