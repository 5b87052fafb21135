// Requests cancellation of a job by dropping a cancel_{jobId}.json file into the daemon's control
// directory (spec.md §6). Grounded on the original prototype's `cancel.py`.

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gpusched-cancel", about = "Cancel a job on a gpusched daemon")]
struct Args {
    #[arg(long, default_value = "/tmp/gpusched/control")]
    control_dir: PathBuf,

    #[arg(long = "job-id")]
    job_id: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.control_dir)?;

    let body = json!({ "jobId": args.job_id });
    let path = args.control_dir.join(format!("cancel_{}.json", args.job_id));
    std::fs::write(&path, serde_json::to_vec_pretty(&body)?)?;

    Ok(())
}
