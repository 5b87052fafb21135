// Prints the daemon's last published state/snapshot.json (spec.md §6). Grounded on the original
// prototype's `status.py`, which polled the same file on a fixed interval.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gpusched-status", about = "Show the last known state of a gpusched daemon")]
struct Args {
    #[arg(long, default_value = "/tmp/gpusched/state")]
    state_dir: PathBuf,
}

fn main() {
    let args = Args::parse();

    let Some((queued, running)) = gpusched::control::read_snapshot(&args.state_dir) else {
        println!("no snapshot available yet");
        return;
    };

    println!("RUNNING ({})", running.len());
    for job in &running {
        println!(
            "  {}  gpu={}  pid={:?}  priority={}  {}",
            job.id, job.assigned_gpu, job.pid, job.priority, job.command
        );
    }

    println!("QUEUED ({})", queued.len());
    for job in &queued {
        println!("  {}  priority={}  {}", job.id, job.priority, job.command);
    }
}
