//! SafeEject - safe removal of USB drives.
//!
//! Thin binary entry point. All logic lives in the `safeeject-core`
//! and `safeeject-cli` crates.

use clap::Parser;
use safeeject_cli::Cli;
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialise structured logging.
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("SafeEject starting");
    start(cli)
}

#[cfg(windows)]
fn start(cli: Cli) -> anyhow::Result<ExitCode> {
    use safeeject_core::platform;

    let elevated = platform::is_elevated();
    tracing::debug!("Elevated: {elevated}");

    if cli.elevate && !elevated {
        let args: Vec<String> = std::env::args()
            .skip(1)
            .filter(|a| a != "--elevate")
            .collect();
        platform::relaunch_elevated(&args)
            .map_err(|e| anyhow::anyhow!("elevation was refused: {e}"))?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = cli.config();
    let mut stdout = std::io::stdout().lock();
    let code = safeeject_cli::run(&cli.command, platform::windows_system(), config, &mut stdout)?;
    Ok(ExitCode::from(code as u8))
}

#[cfg(not(windows))]
fn start(_cli: Cli) -> anyhow::Result<ExitCode> {
    anyhow::bail!("SafeEject controls Windows storage devices and cannot run on this platform")
}
