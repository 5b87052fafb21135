// Process supervisor (spec.md §4.3).
//
// Grounded on the original prototype's `runner.py`: a pid->child table and a pid->job table behind
// one lock (re-architected per spec.md §9's redesign flag into a struct held by the core, instead
// of the prototype's module-level globals), GPU binding via `CUDA_VISIBLE_DEVICES`, `setsid`
// process-group isolation, SIGSTOP/SIGCONT pause/resume, SIGUSR1 cooperative preemption, and the
// SIGTERM-then-SIGKILL escalation in `terminateJob`.
//
// User job commands are POSIX-tokenized and exec'd directly -- never through a shell -- which is
// why this module uses std::process::Command rather than the `subprocess`-based
// command::safe_command helper that fixed internal telemetry commands go through.

use crate::error::SupervisorError;
use crate::types::{GpuIndex, JobId, Pid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

struct Inner {
    children: HashMap<Pid, Child>,
    job_by_pid: HashMap<Pid, JobId>,
}

pub struct ProcessSupervisor {
    log_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl ProcessSupervisor {
    pub fn new(log_dir: PathBuf) -> ProcessSupervisor {
        ProcessSupervisor {
            log_dir,
            inner: Mutex::new(Inner {
                children: HashMap::new(),
                job_by_pid: HashMap::new(),
            }),
        }
    }

    fn log_path(&self, job_id: &str) -> PathBuf {
        self.log_dir.join(format!("{job_id}.log"))
    }

    // Spawn `command`, bound to `gpu`, isolated into its own session/process group. Never invokes
    // a shell: `command` is tokenized with POSIX quoting rules before exec.
    pub fn spawn(&self, job_id: &str, command: &str, gpu: GpuIndex) -> Result<Pid, SupervisorError> {
        std::fs::create_dir_all(&self.log_dir)?;
        let log_path = self.log_path(job_id);
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let log_file_err = log_file.try_clone()?;

        let argv = shlex::split(command)
            .ok_or_else(|| SupervisorError::SpawnFailed("cannot tokenize command".to_string()))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SupervisorError::SpawnFailed("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("CUDA_VISIBLE_DEVICES", gpu.to_string())
            .stdin(Stdio::null())
            .stdout(log_file)
            .stderr(log_file_err);
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;
        let pid = child.id();

        let mut inner = self.inner.lock();
        inner.children.insert(pid, child);
        inner.job_by_pid.insert(pid, job_id.to_string());
        Ok(pid)
    }

    // Non-blocking: None while still running, Some(exit code) once reaped. A process that exited
    // via signal rather than a normal exit code is reported as a non-zero placeholder so callers
    // applying spec.md's strict "non-zero exit => Failed" mapping see it as a failure, never as
    // still-running.
    pub fn poll(&self, pid: Pid) -> Option<i32> {
        let mut inner = self.inner.lock();
        let child = inner.children.get_mut(&pid)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(1);
                inner.children.remove(&pid);
                inner.job_by_pid.remove(&pid);
                Some(code)
            }
            _ => None,
        }
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        self.inner.lock().children.contains_key(&pid)
    }

    // Signals the whole process group, since spawn() placed the child in its own session.
    fn send_signal(&self, pid: Pid, sig: libc::c_int) -> bool {
        unsafe { libc::kill(-(pid as libc::pid_t), sig) == 0 }
    }

    pub fn pause(&self, pid: Pid) -> bool {
        self.send_signal(pid, libc::SIGSTOP)
    }

    pub fn resume(&self, pid: Pid) -> bool {
        self.send_signal(pid, libc::SIGCONT)
    }

    pub fn send_preempt(&self, pid: Pid) -> bool {
        self.send_signal(pid, libc::SIGUSR1)
    }

    // SIGTERM, poll every 250ms up to `timeout`; if still alive, SIGKILL and poll for another 2s.
    // Returns the exit code on reap, None if the process could not be reaped at all.
    pub fn terminate(&self, pid: Pid, timeout: Duration) -> Option<i32> {
        if !self.is_alive(pid) {
            return None;
        }
        self.send_signal(pid, libc::SIGTERM);

        if let Some(code) = self.wait_up_to(pid, timeout) {
            return Some(code);
        }

        self.send_signal(pid, libc::SIGKILL);
        self.wait_up_to(pid, Duration::from_secs(2))
    }

    fn wait_up_to(&self, pid: Pid, timeout: Duration) -> Option<i32> {
        let step = Duration::from_millis(250);
        let mut waited = Duration::ZERO;
        while waited < timeout {
            if let Some(code) = self.poll(pid) {
                return Some(code);
            }
            std::thread::sleep(step);
            waited += step;
        }
        None
    }

    pub fn read_job_log_tail(&self, job_id: &str, max_bytes: u64) -> Vec<u8> {
        let path = self.log_path(job_id);
        let mut file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        let size = match file.seek(SeekFrom::End(0)) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let to_read = max_bytes.min(size);
        if file.seek(SeekFrom::Start(size - to_read)).is_err() {
            return Vec::new();
        }
        let mut buf = Vec::with_capacity(to_read as usize);
        let _ = file.take(to_read).read_to_end(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_poll_and_read_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let sup = ProcessSupervisor::new(dir.path().to_path_buf());
        let pid = sup.spawn("job-a", "sh -c 'echo hello; exit 0'", 0).unwrap();

        let mut exit_code = None;
        for _ in 0..50 {
            if let Some(code) = sup.poll(pid) {
                exit_code = Some(code);
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(exit_code, Some(0));

        let tail = sup.read_job_log_tail("job-a", 4096);
        assert!(String::from_utf8_lossy(&tail).contains("hello"));
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sup = ProcessSupervisor::new(dir.path().to_path_buf());
        let pid = sup.spawn("job-b", "sh -c 'exit 3'", 0).unwrap();

        let mut exit_code = None;
        for _ in 0..50 {
            if let Some(code) = sup.poll(pid) {
                exit_code = Some(code);
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(exit_code, Some(3));
    }

    #[test]
    fn terminate_reaps_a_long_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let sup = ProcessSupervisor::new(dir.path().to_path_buf());
        let pid = sup.spawn("job-c", "sleep 30", 0).unwrap();
        assert!(sup.is_alive(pid));

        let code = sup.terminate(pid, Duration::from_millis(500));
        assert!(code.is_some());
        assert!(!sup.is_alive(pid));
    }
}
