// Logging macros must be defined before the modules that use them
#[macro_use]
mod logging;

pub mod discovery;
pub mod extcap;
pub mod io;
pub mod settings;

pub use logging::{Logger, Severity};

use std::path::PathBuf;

// ============================================================================
// Entry point
// ============================================================================

/// Environment variable Wireshark sets to the extcap directory
pub const EXTCAP_LOC_VAR: &str = "EXTCAP_LOC";

/// Run one extcap invocation from the process arguments and environment.
/// Returns the process exit code.
pub async fn run() -> i32 {
    let location = std::env::var_os(EXTCAP_LOC_VAR).map(PathBuf::from);
    let log = Logger::for_location(location.as_deref());
    let settings = settings::load_settings(location.as_deref(), &log);

    tlog!(
        log,
        "[main] {} {} started",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let mut stdout = std::io::stdout();
    extcap::run_extcap(std::env::args_os(), settings, log, &mut stdout).await
}
