use anyhow::Result;
use eid_login::cli::{self, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let action = cli::start()?;

    let result = action.execute().await;
    telemetry::shutdown_tracer();
    let code = result?;

    // a cancelled prompt may still hold a blocking thread on stdin; don't wait for it
    std::process::exit(i32::from(code));
}
