// Priority queue + per-GPU running set (spec.md §4 component 5, "Queue Manager").
//
// Grounded on the original prototype's `QueueManager` (heap of (priority, createdAt, id), a job
// map, and a running-jobs-per-GPU map) -- generalized here for aging, multi-GPU allocation and
// non-exclusive device sharing, which the prototype's heap never computed. The prototype guarded
// its state with a reentrant lock; here a single plain mutex is enough, since every public method
// is a sole acquisition point and none call back into each other while holding it.

use crate::job::{Job, JobStatus};
use crate::state_machine;
use crate::types::{GpuIndex, JobId, Pid, Timestamp};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;

// (effectivePriority, createdAt, id) ordering per spec.md §4.5: lower priority wins ties broken by
// earlier createdAt, then lexicographic id. `f64` has no total order in general, but
// effectivePriority is always a finite value here (priority and the aging term are both bounded),
// so a partial_cmp().unwrap() is safe.
#[derive(Debug, Clone, PartialEq)]
struct HeapKey {
    effective_priority: f64,
    created_at: Timestamp,
    id: JobId,
}

impl Eq for HeapKey {}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.effective_priority
            .partial_cmp(&other.effective_priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

struct Inner {
    jobs: HashMap<JobId, Job>,
    queued: Vec<JobId>, // rebuilt into priority order fresh on every allocation attempt
    running_by_gpu: HashMap<GpuIndex, Vec<JobId>>,
    aging_factor: f64,
}

pub struct QueueManager {
    inner: Mutex<Inner>,
}

impl QueueManager {
    pub fn new(aging_factor: f64) -> QueueManager {
        QueueManager {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                queued: Vec::new(),
                running_by_gpu: HashMap::new(),
                aging_factor,
            }),
        }
    }

    pub fn add_job(&self, job: Job) {
        let mut inner = self.inner.lock();
        inner.queued.push(job.id.clone());
        inner.jobs.insert(job.id.clone(), job);
    }

    pub fn remove_job(&self, job_id: &str) {
        let mut inner = self.inner.lock();
        inner.queued.retain(|id| id != job_id);
        inner.jobs.remove(job_id);
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().jobs.get(job_id).cloned()
    }

    // Rebuild the effective-priority ordering over currently Queued jobs and attempt to admit the
    // best candidate onto the configured devices. Returns the job and the GPUs allocated to it,
    // having already moved the job out of the queue and into the running set -- the caller is
    // responsible for actually starting the process and calling state_machine::start.
    //
    // Per spec.md §4.5 step 2, "free" is relative to the candidate under consideration: an
    // exclusive candidate only fits an empty device, while a non-exclusive candidate may also
    // join a device whose current occupants are all non-exclusive. Two different queued jobs can
    // therefore see two different free sets, so this is computed per candidate rather than once
    // up front.
    pub fn find_and_assign(&self, all_gpu_indices: &[GpuIndex], now: Timestamp) -> Option<(Job, Vec<GpuIndex>)> {
        let mut inner = self.inner.lock();
        if all_gpu_indices.is_empty() {
            return None;
        }

        let aging_factor = inner.aging_factor;
        let mut candidates: Vec<HeapKey> = inner
            .queued
            .iter()
            .filter_map(|id| {
                let job = inner.jobs.get(id)?;
                if job.status != JobStatus::Queued {
                    return None;
                }
                let waited = now.saturating_sub(job.created_at) as f64;
                Some(HeapKey {
                    effective_priority: job.priority as f64 - waited * aging_factor,
                    created_at: job.created_at,
                    id: job.id.clone(),
                })
            })
            .collect();
        candidates.sort();

        for key in candidates {
            let (required_gpus, exclusive) = match inner.jobs.get(&key.id) {
                Some(job) => (job.required_gpus as usize, job.exclusive),
                None => continue,
            };
            let free: Vec<GpuIndex> = all_gpu_indices
                .iter()
                .copied()
                .filter(|gpu| match inner.running_by_gpu.get(gpu) {
                    None => true,
                    Some(ids) if ids.is_empty() => true,
                    Some(ids) => {
                        !exclusive
                            && ids.iter().all(|id| inner.jobs.get(id).map(|j| !j.exclusive).unwrap_or(true))
                    }
                })
                .collect();
            if required_gpus <= free.len() {
                let allocated: Vec<GpuIndex> = free[..required_gpus].to_vec();
                for gpu in &allocated {
                    inner.running_by_gpu.entry(*gpu).or_default().push(key.id.clone());
                }
                inner.queued.retain(|id| id != &key.id);
                let job = inner.jobs.get(&key.id).cloned().expect("checked above");
                return Some((job, allocated));
            }
        }
        None
    }

    // A coarse check for "is any device free for anything at all" -- a device qualifies if empty
    // or if every occupant is non-exclusive. Used as a cheap pre-filter before bothering to rebuild
    // the heap; `find_and_assign` re-derives the exact per-candidate free set itself, since an
    // exclusive candidate can't actually use a device this function calls free.
    pub fn free_gpus(&self, all_gpu_indices: &[GpuIndex]) -> Vec<GpuIndex> {
        let inner = self.inner.lock();
        all_gpu_indices
            .iter()
            .copied()
            .filter(|gpu| match inner.running_by_gpu.get(gpu) {
                None => true,
                Some(ids) => ids.is_empty()
                    || ids.iter().all(|id| {
                        inner.jobs.get(id).map(|j| !j.exclusive).unwrap_or(true)
                    }),
            })
            .collect()
    }

    fn release_locked(inner: &mut Inner, job_id: &str) {
        for jobs in inner.running_by_gpu.values_mut() {
            jobs.retain(|id| id != job_id);
        }
        inner.running_by_gpu.retain(|_, jobs| !jobs.is_empty());
    }

    // Remove `job_id` from every GPU's running set (job finished, failed, was cancelled, or is
    // being preempted).
    pub fn release(&self, job_id: &str) {
        let mut inner = self.inner.lock();
        Self::release_locked(&mut inner, job_id);
    }

    // Put a preempted job back onto the queue with a fresh createdAt, per spec.md's preemption
    // scenario ("requeued with new createdAt").
    pub fn requeue(&self, job_id: &str, now: Timestamp) {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.jobs.get_mut(job_id) {
            job.status = JobStatus::Queued;
            job.created_at = now;
            job.pid = None;
        }
        if !inner.queued.iter().any(|id| id == job_id) {
            inner.queued.push(job_id.to_string());
        }
    }

    // Puts a job that failed the policy admission check back onto the queue exactly as it was --
    // no createdAt refresh, since spec.md reserves that reset for preemption's restart-from-scratch
    // semantics (§4.5, §4.7 scenario 2), not for a job that simply failed a policy check this pass.
    // `find_and_assign` already popped the id out of `queued`; this just pushes it back.
    pub fn return_to_queue(&self, job_id: &str) {
        let mut inner = self.inner.lock();
        if !inner.queued.iter().any(|id| id == job_id) {
            inner.queued.push(job_id.to_string());
        }
    }

    // Cancels `job_id` as a single critical section: look up the job, terminate its process (if
    // any) while still holding the lock, apply the state-machine transition, and release its GPUs,
    // all under one lock acquisition. Per spec.md §4.7, cancelJob runs "under the mutex" as one
    // atomic unit; doing the lookup, the termination, and the status/running-set update as
    // separate lock acquisitions would let the scheduler loop's own completions/preemption pass
    // observe and mutate the job in between, so whichever side writes last would clobber the
    // other's status update. `terminate` is only invoked while Running or Paused, with the lock
    // held, so the loop's own queue operations cannot race with it.
    //
    // Returns the job's status after cancellation, or None if no such job exists or it was already
    // terminal.
    pub fn cancel_job<F: FnOnce(Pid)>(&self, job_id: &str, now: Timestamp, terminate: F) -> Option<JobStatus> {
        let mut inner = self.inner.lock();
        let mut job = inner.jobs.get(job_id)?.clone();
        if job.status.is_terminal() {
            return None;
        }
        if matches!(job.status, JobStatus::Running | JobStatus::Paused) {
            if let Some(pid) = job.pid {
                terminate(pid);
            }
        }
        state_machine::cancel(&mut job, now).expect("non-terminal -> Cancelled is legal");
        let status = job.status;
        inner.queued.retain(|id| id != job_id);
        Self::release_locked(&mut inner, job_id);
        inner.jobs.insert(job.id.clone(), job);
        Some(status)
    }

    pub fn get_running_jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut seen: HashMap<&JobId, ()> = HashMap::new();
        let mut out = Vec::new();
        for ids in inner.running_by_gpu.values() {
            for id in ids {
                if seen.insert(id, ()).is_none() {
                    if let Some(job) = inner.jobs.get(id) {
                        out.push(job.clone());
                    }
                }
            }
        }
        out
    }

    pub fn get_running_on_gpu(&self, gpu: GpuIndex) -> Vec<Job> {
        let inner = self.inner.lock();
        inner
            .running_by_gpu
            .get(&gpu)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    pub fn peek_highest_priority_queued(&self, now: Timestamp) -> Option<Job> {
        let inner = self.inner.lock();
        let aging_factor = inner.aging_factor;
        inner
            .queued
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.status == JobStatus::Queued)
            .min_by(|a, b| {
                let wa = now.saturating_sub(a.created_at) as f64;
                let wb = now.saturating_sub(b.created_at) as f64;
                let ea = a.priority as f64 - wa * aging_factor;
                let eb = b.priority as f64 - wb * aging_factor;
                ea.partial_cmp(&eb)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }

    pub fn get_queued_jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        inner
            .queued
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.status == JobStatus::Queued)
            .cloned()
            .collect()
    }

    // Replace a job's stored record in place (used after state_machine transitions that the
    // caller applied to its own owned copy).
    pub fn update_job(&self, job: Job) {
        let mut inner = self.inner.lock();
        inner.jobs.insert(job.id.clone(), job);
    }
}
