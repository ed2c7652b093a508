//! Native execution process. Reads one JSON request per line on stdin,
//! dispatches synchronously, writes exactly one response line on stdout.
//! All diagnostics go to stderr; stdout carries nothing but the protocol.

use desktop_agent::adapter::Dispatcher;
use desktop_agent::backend::platform_backend;
use desktop_agent::executor::ActionExecutor;
use desktop_agent::observer::Observer;
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    // The kill switch is armed before anything else and never interacts
    // with the request loop below.
    #[cfg(target_os = "macos")]
    desktop_agent::macos::events::start_kill_switch();

    let mut dispatcher = Dispatcher::new(
        platform_backend(),
        Observer::from_env(),
        ActionExecutor::from_env(),
    );

    info!("adapter ready");

    let stdin = io::stdin();
    let stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatcher.handle_line(&line);
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &response)?;
        out.write_all(b"\n")?;
        out.flush()?;

        if dispatcher.shutdown_requested() {
            info!("terminate acknowledged; shutting down");
            break;
        }
    }

    Ok(())
}
