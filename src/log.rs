// Structured logging setup. `GPUSCHED_DEBUG=1` turns on verbose telemetry-probe diagnostics (spec
// §6's "Environment variables") by lowering the default filter to DEBUG; otherwise the daemon logs
// at INFO.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let verbose = std::env::var("GPUSCHED_DEBUG").as_deref() == Ok("1");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
