// Submits a job to a running daemon by dropping a JSON file into its inbox directory (spec.md §6).
// Grounded on the original prototype's `submit.py`, which wrote the same kind of file before the
// daemon's scheduling loop ever saw it.

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gpusched-submit", about = "Submit a job to a gpusched daemon")]
struct Args {
    #[arg(long, default_value = "/tmp/gpusched/inbox")]
    inbox_dir: PathBuf,

    /// Shell-like command line to execute, tokenized with POSIX word-splitting rules (no shell is
    /// ever invoked on it).
    #[arg(long)]
    cmd: String,

    #[arg(long, default_value_t = 10)]
    priority: i64,

    #[arg(long, default_value_t = 1)]
    gpus: u32,

    #[arg(long = "mem")]
    mem_mb: Option<u64>,

    #[arg(long, default_value_t = true, overrides_with = "no_exclusive")]
    exclusive: bool,
    #[arg(long = "no-exclusive", default_value_t = false, overrides_with = "exclusive")]
    no_exclusive: bool,

    #[arg(long, default_value_t = true, overrides_with = "no_preemptible")]
    preemptible: bool,
    #[arg(long = "no-preemptible", default_value_t = false, overrides_with = "preemptible")]
    no_preemptible: bool,

    #[arg(long)]
    max_runtime_seconds: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.inbox_dir)?;

    let id = uuid::Uuid::new_v4().to_string();
    let body = json!({
        "id": id,
        "command": args.cmd,
        "priority": args.priority,
        "requiredGpus": args.gpus,
        "requiredMemMb": args.mem_mb,
        "exclusive": args.exclusive && !args.no_exclusive,
        "preemptible": args.preemptible && !args.no_preemptible,
        "maxRuntimeSeconds": args.max_runtime_seconds,
    });

    let path = args.inbox_dir.join(format!("{id}.json"));
    std::fs::write(&path, serde_json::to_vec_pretty(&body)?)?;

    println!("{id}");
    Ok(())
}
