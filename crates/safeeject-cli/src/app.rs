/// Command-line interface: argument parsing and command dispatch.
///
/// Every command runs through a [`Session`], so the CLI sees the same
/// worker threads, debounce, and events as any other frontend would.
use crate::render;
use crate::state::{Outcome, Session};
use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use safeeject_core::model::EjectPolicy;
use safeeject_core::{EjectError, Ejector, EjectorConfig, SystemContext};
use std::io::Write;
use std::time::Duration;

/// Upper bound on how long a single eject, mount, or lock scan may take.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "SafeEject")]
#[command(about = "Safely eject, force-eject, and remount USB drives", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Relaunch with administrator rights before running the command
    #[arg(long, global = true)]
    pub elevate: bool,

    /// Timeout in seconds for listing disks through diskpart
    #[arg(long, env = "SAFEEJECT_LIST_TIMEOUT", global = true, default_value_t = 10)]
    pub list_timeout: u64,

    /// Milliseconds a process gets to exit before it is force-killed
    #[arg(long, env = "SAFEEJECT_KILL_GRACE_MS", global = true, default_value_t = 1000)]
    pub kill_grace_ms: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List removable drives
    List {
        /// Also list attached USB disks with no mounted volume
        #[arg(long, short)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Eject a drive
    Eject {
        /// Drive letter, e.g. E or E:
        #[arg(value_parser = parse_letter)]
        letter: char,

        /// Refuse if any process has files open, then lock before ejecting
        #[arg(long)]
        verified: bool,
    },

    /// Terminate every process using a drive, then eject it
    ForceEject {
        #[arg(value_parser = parse_letter)]
        letter: char,
    },

    /// Bring an offline USB disk online and give it a letter
    Mount {
        /// Physical disk number as shown by `list --all`
        disk: u32,
    },

    /// Show processes holding files open on a drive
    Locks {
        #[arg(value_parser = parse_letter)]
        letter: char,
    },

    /// Terminate a process by PID
    Kill { pid: u32 },

    /// Reprint the drive list whenever a device arrives or leaves
    Watch {
        /// Stop after this many seconds instead of running until interrupted
        #[arg(long)]
        seconds: Option<u64>,
    },
}

/// Accept `E`, `e`, `E:`, or `E:\`.
pub fn parse_letter(s: &str) -> Result<char, String> {
    let trimmed = s.trim().trim_end_matches(['\\', '/']).trim_end_matches(':');
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Ok(c.to_ascii_uppercase()),
        _ => Err(format!("'{s}' is not a drive letter")),
    }
}

impl Cli {
    /// Core configuration with command-line overrides applied.
    pub fn config(&self) -> EjectorConfig {
        EjectorConfig {
            list_timeout: Duration::from_secs(self.list_timeout),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
            ..EjectorConfig::default()
        }
    }
}

/// Run `command` against `system`, writing human output to `out`.
///
/// Returns the process exit code: 0 on success, 1 when the operation
/// itself failed.
pub fn run(
    command: &Command,
    system: SystemContext,
    config: EjectorConfig,
    out: &mut dyn Write,
) -> anyhow::Result<i32> {
    let mut session = Session::new(Ejector::new(system, config));

    match command {
        Command::List { all, json } => {
            session.refresh(*all);
            if *json {
                let text = render::device_json(&session.volumes, &session.unmounted)
                    .context("serialising device list")?;
                writeln!(out, "{text}")?;
            } else {
                write!(
                    out,
                    "{}",
                    render::device_table(&session.volumes, &session.unmounted)
                )?;
            }
            Ok(0)
        }
        Command::Eject { letter, verified } => {
            let policy = if *verified {
                EjectPolicy::Verified
            } else {
                EjectPolicy::Fast
            };
            if !session.eject(*letter, policy) {
                writeln!(out, "{letter}: an eject is already running")?;
                return Ok(1);
            }
            finish_eject(&mut session, *letter, out)
        }
        Command::ForceEject { letter } => {
            if !session.force_eject(*letter) {
                writeln!(out, "{letter}: an eject is already running")?;
                return Ok(1);
            }
            finish_eject(&mut session, *letter, out)
        }
        Command::Mount { disk } => {
            session.mount(*disk);
            let disk = *disk;
            if !session.wait_until(
                OPERATION_TIMEOUT,
                |s| s.mount_results.contains_key(&disk),
                |_, _| {},
            ) {
                bail!("disk {disk}: mount did not finish in {OPERATION_TIMEOUT:?}");
            }
            match session.mount_results.get(&disk) {
                Some(Outcome::Mounted(letter)) => {
                    writeln!(out, "Disk {disk} mounted as {letter}:")?;
                    Ok(0)
                }
                Some(Outcome::MountFailed(e)) => {
                    writeln!(out, "Disk {disk}: {e}")?;
                    if *e == EjectError::AccessDenied {
                        writeln!(out, "Run again with --elevate.")?;
                    }
                    Ok(1)
                }
                _ => Ok(1),
            }
        }
        Command::Locks { letter } => {
            if !session.ejector().is_ejectable(*letter) {
                writeln!(out, "{}", EjectError::VolumeInaccessible(*letter))?;
                return Ok(1);
            }
            session.scan_locks(*letter);
            let letter = *letter;
            if !session.wait_until(
                OPERATION_TIMEOUT,
                |s| s.locks.contains_key(&letter),
                |_, _| {},
            ) {
                bail!("{letter}: lock scan did not finish in {OPERATION_TIMEOUT:?}");
            }
            let processes = session.locks.get(&letter).cloned().unwrap_or_default();
            write!(out, "{}", render::lock_report(letter, &processes))?;
            Ok(0)
        }
        Command::Kill { pid } => match session.ejector().kill_process(*pid) {
            Ok(()) => {
                writeln!(out, "Terminated {pid}")?;
                Ok(0)
            }
            Err(e) => {
                writeln!(out, "Cannot terminate {pid}: {e}")?;
                Ok(1)
            }
        },
        Command::Watch { seconds } => watch(&mut session, seconds.map(Duration::from_secs), out),
    }
}

/// Print progress for `letter` until its sequence finishes.
fn finish_eject(session: &mut Session, letter: char, out: &mut dyn Write) -> anyhow::Result<i32> {
    let mut write_err = None;
    let finished = session.wait_until(
        OPERATION_TIMEOUT,
        |s| s.eject_results.contains_key(&letter),
        |_, pass| {
            for (l, percent) in &pass.progress {
                if *l == letter && write_err.is_none() {
                    if let Err(e) = writeln!(out, "{letter}: {}", render::progress_bar(*percent)) {
                        write_err = Some(e);
                    }
                }
            }
        },
    );
    if let Some(e) = write_err {
        return Err(e.into());
    }
    if !finished {
        bail!("{letter}: eject did not finish in {OPERATION_TIMEOUT:?}");
    }

    match session.eject_results.get(&letter) {
        Some(Outcome::Ejected(msg)) => {
            writeln!(out, "{msg}. It is now safe to unplug the device.")?;
            Ok(0)
        }
        Some(Outcome::EjectFailed(EjectError::LockedByProcess(procs))) => {
            write!(out, "{}", render::lock_report(letter, procs))?;
            writeln!(
                out,
                "Close these programs or run `SafeEject force-eject {letter}`."
            )?;
            Ok(1)
        }
        Some(Outcome::EjectFailed(e)) => {
            writeln!(out, "{letter}: {} ({e})", e.short_label())?;
            Ok(1)
        }
        _ => Ok(1),
    }
}

fn watch(session: &mut Session, limit: Option<Duration>, out: &mut dyn Write) -> anyhow::Result<i32> {
    session
        .start_watching()
        .map_err(|e| anyhow::anyhow!("cannot watch for device changes: {e}"))?;
    session.refresh(true);
    write!(
        out,
        "{}",
        render::device_table(&session.volumes, &session.unmounted)
    )?;

    // Effectively forever when no limit is given.
    let limit = limit.unwrap_or(Duration::from_secs(u64::from(u32::MAX)));
    let mut write_err = None;
    session.wait_until(
        limit,
        |_| false,
        |s, pass| {
            if !pass.refreshed || write_err.is_some() {
                return;
            }
            let stamp = s
                .last_refresh
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            let result = write!(
                out,
                "\n[{stamp}] devices changed\n{}",
                render::device_table(&s.volumes, &s.unmounted)
            );
            if let Err(e) = result {
                write_err = Some(e);
            }
        },
    );
    session.stop_watching();
    match write_err {
        Some(e) => Err(e.into()),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_parse_in_common_forms() {
        assert_eq!(parse_letter("e"), Ok('E'));
        assert_eq!(parse_letter("E:"), Ok('E'));
        assert_eq!(parse_letter(r"E:\"), Ok('E'));
        assert!(parse_letter("EF").is_err());
        assert!(parse_letter("1").is_err());
        assert!(parse_letter("").is_err());
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["SafeEject", "eject", "e:", "--verified"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Eject {
                letter: 'E',
                verified: true
            }
        );

        let cli = Cli::try_parse_from(["SafeEject", "-vv", "list", "--all", "--json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command, Command::List { all: true, json: true });

        let cli = Cli::try_parse_from(["SafeEject", "force-eject", "F", "--elevate"]).unwrap();
        assert!(cli.elevate);
        assert_eq!(cli.command, Command::ForceEject { letter: 'F' });

        assert!(Cli::try_parse_from(["SafeEject", "eject", "12"]).is_err());
    }

    #[test]
    fn config_overrides_apply() {
        let cli = Cli::try_parse_from([
            "SafeEject",
            "--list-timeout",
            "3",
            "--kill-grace-ms",
            "250",
            "locks",
            "E",
        ])
        .unwrap();
        let config = cli.config();
        assert_eq!(config.list_timeout, Duration::from_secs(3));
        assert_eq!(config.kill_grace, Duration::from_millis(250));
        assert_eq!(config.eject_debounce, EjectorConfig::default().eject_debounce);
    }
}
