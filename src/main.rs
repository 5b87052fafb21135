use clap::Parser;
use gpusched::config::DaemonConfig;
use gpusched::scheduler::SchedulerCore;
use gpusched::{control, interrupt, log, monitor, policy, queue, supervisor};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    log::init();
    let config = DaemonConfig::parse();
    interrupt::handle_interruptions();

    let gpu_indices = config.resolve_gpu_indices();
    tracing::info!(?gpu_indices, "starting gpusched");

    let control_surface = match control::ControlSurface::new(
        config.inbox_dir.clone(),
        config.control_dir.clone(),
        config.state_dir.clone(),
    ) {
        Ok(surface) => surface,
        Err(e) => {
            tracing::error!(error = %e, "failed to set up control surface directories");
            std::process::exit(1);
        }
    };

    let queue = Arc::new(queue::QueueManager::new(config.aging_factor));
    let policy = Arc::new(policy::PolicyEngine::new(config.policy_config()));
    let supervisor = Arc::new(supervisor::ProcessSupervisor::new(config.log_dir.clone()));
    let monitor = Arc::new(monitor::Monitor::new(Duration::from_secs(2), config.util_delta_threshold));

    let core = Arc::new(SchedulerCore::new(
        gpu_indices,
        Arc::clone(&queue),
        policy,
        supervisor,
        monitor,
    ));

    let core_for_loop = Arc::clone(&core);
    let scheduler_thread = std::thread::spawn(move || core_for_loop.run());

    let snapshot_interval = Duration::from_secs(config.snapshot_interval_seconds.max(1));
    let mut last_snapshot = std::time::Instant::now() - snapshot_interval;

    while !interrupt::is_interrupted() {
        if let Err(e) = control_surface.sweep_inbox(&core) {
            tracing::warn!(error = %e, "inbox sweep failed");
        }
        if let Err(e) = control_surface.sweep_control(&core) {
            tracing::warn!(error = %e, "control sweep failed");
        }
        if last_snapshot.elapsed() >= snapshot_interval {
            let queued = queue.get_queued_jobs();
            let running = queue.get_running_jobs();
            if let Err(e) = control_surface.write_snapshot(queued, running) {
                tracing::warn!(error = %e, "snapshot write failed");
            }
            last_snapshot = std::time::Instant::now();
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("stop signal received, shutting down");
    core.stop();
    let _ = scheduler_thread.join();
}
