/// End-to-end tests for `Session` and command dispatch.
///
/// These exercise the real coordinator, worker threads, and rendering
/// against the in-memory simulated system, so every command runs exactly
/// as it would on Windows minus the hardware.
///
/// **Scope:**
///   - Device refresh, with and without unmounted disks
///   - Eject lifecycle through events (progress, result, refresh)
///   - Lock reporting on refused verified ejects
///   - Mount, locks, kill, and list commands via `run`
use safeeject_cli::state::{Outcome, Session};
use safeeject_cli::{run, Command};
use safeeject_core::model::EjectPolicy;
use safeeject_core::monitor::DeviceEventKind;
use safeeject_core::sim::{SimDisk, SimDrive, SimProcess, SimSystem};
use safeeject_core::system::DriveKind;
use safeeject_core::{EjectError, Ejector, EjectorConfig};
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;
const WAIT: Duration = Duration::from_secs(10);

// ── Helpers ───────────────────────────────────────────────────────────────────

fn stick_on_e() -> SimSystem {
    let sim = SimSystem::new();
    sim.add_drive(SimDrive::new('C', DriveKind::Fixed).filesystem("NTFS"));
    sim.add_drive(
        SimDrive::new('E', DriveKind::Removable)
            .label("STICK")
            .capacity(16 * GIB, 4 * GIB),
    );
    sim.add_disk(SimDisk::usb(1, "SanDisk Cruzer", 16 * GIB).partition(&['E']));
    sim
}

fn session(sim: &SimSystem) -> Session {
    Session::new(Ejector::new(sim.context(), EjectorConfig::immediate()))
}

/// Run a command and capture `(exit code, output)`.
fn run_command(sim: &SimSystem, command: Command) -> (i32, String) {
    let mut out = Vec::new();
    let code = run(&command, sim.context(), EjectorConfig::immediate(), &mut out).unwrap();
    (code, String::from_utf8(out).unwrap())
}

// ── Session ───────────────────────────────────────────────────────────────────

#[test]
fn refresh_lists_mounted_and_unmounted() {
    let sim = stick_on_e();
    sim.add_disk(SimDisk::usb(2, "Kingston", 8 * GIB));
    let mut s = session(&sim);

    s.refresh(false);
    assert_eq!(s.volumes.len(), 1);
    assert!(s.unmounted.is_empty());
    assert!(s.last_refresh.is_some());

    s.refresh(true);
    assert_eq!(s.unmounted.len(), 1);
    assert_eq!(s.unmounted[0].disk_index, Some(2));
}

#[test]
fn eject_lifecycle_updates_state() {
    let sim = stick_on_e();
    let mut s = session(&sim);
    s.refresh(false);

    assert!(s.eject('E', EjectPolicy::Verified));
    assert_eq!(s.progress.get(&'E'), Some(&0));

    let mut seen = Vec::new();
    assert!(s.wait_until(
        WAIT,
        |s| s.eject_results.contains_key(&'E'),
        |_, pass| seen.extend(pass.progress.iter().map(|(_, p)| *p)),
    ));
    assert_eq!(seen, vec![20, 40, 60, 80, 90, 100]);
    assert_eq!(
        s.eject_results.get(&'E'),
        Some(&Outcome::Ejected("E: removed".into()))
    );
    assert!(s.progress.is_empty());

    // The refresh that follows drops the ejected volume.
    assert!(s.wait_until(WAIT, |s| s.volumes.is_empty(), |_, _| {}));
}

#[test]
fn second_eject_is_debounced() {
    let sim = stick_on_e();
    let mut s = session(&sim);

    assert!(s.eject('E', EjectPolicy::Fast));
    assert!(!s.eject('E', EjectPolicy::Fast));
    assert!(!s.force_eject('E'));
}

#[test]
fn locked_eject_records_locking_processes() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(300, "photoshop.exe").open(r"E:\art.psd"));
    let mut s = session(&sim);

    assert!(s.eject('E', EjectPolicy::Verified));
    assert!(s.wait_until(WAIT, |s| s.eject_results.contains_key(&'E'), |_, _| {}));
    assert!(matches!(
        s.eject_results.get(&'E'),
        Some(Outcome::EjectFailed(EjectError::LockedByProcess(_)))
    ));
    assert_eq!(s.locks.get(&'E').map(Vec::len), Some(1));
}

#[test]
fn watching_refreshes_after_device_change() {
    let sim = stick_on_e();
    let mut s = session(&sim);
    s.start_watching().unwrap();
    s.refresh(false);
    assert_eq!(s.volumes.len(), 1);

    sim.add_drive(SimDrive::new('F', DriveKind::Removable));
    sim.emit_device_event(DeviceEventKind::Arrival);

    let mut changed = false;
    assert!(s.wait_until(
        WAIT,
        |s| s.volumes.len() == 2,
        |_, pass| changed |= pass.devices_changed,
    ));
    assert!(changed);
    s.stop_watching();
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[test]
fn list_command_prints_table_and_json() {
    let sim = stick_on_e();

    let (code, out) = run_command(&sim, Command::List { all: false, json: false });
    assert_eq!(code, 0);
    assert!(out.starts_with("DRIVE"));
    assert!(out.contains("STICK"));
    assert!(out.contains("75%"));

    let (code, out) = run_command(&sim, Command::List { all: true, json: true });
    assert_eq!(code, 0);
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(json["volumes"][0]["label"], "STICK");
}

#[test]
fn eject_command_reports_success() {
    let sim = stick_on_e();
    let (code, out) = run_command(
        &sim,
        Command::Eject {
            letter: 'E',
            verified: false,
        },
    );
    assert_eq!(code, 0, "{out}");
    assert!(out.contains(" 50%"));
    assert!(out.contains("E: removed. It is now safe to unplug the device."));
}

#[test]
fn eject_command_suggests_force_when_locked() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(5, "explorer.exe").open(r"E:\"));
    let (code, out) = run_command(
        &sim,
        Command::Eject {
            letter: 'E',
            verified: true,
        },
    );
    assert_eq!(code, 1);
    assert!(out.contains("explorer.exe"));
    assert!(out.contains("force-eject E"));
}

#[test]
fn force_eject_command_kills_and_ejects() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(5, "vlc.exe").open(r"E:\clip.mp4"));
    let (code, _) = run_command(&sim, Command::ForceEject { letter: 'E' });
    assert_eq!(code, 0);
    assert!(!sim.process_alive(5));
}

#[test]
fn busy_eject_command_prints_reason() {
    let sim = stick_on_e();
    sim.refuse_open('E', 32);
    let (code, out) = run_command(
        &sim,
        Command::Eject {
            letter: 'E',
            verified: false,
        },
    );
    assert_eq!(code, 1);
    assert!(out.contains("in use"));
}

#[test]
fn mount_command_prints_letter() {
    let sim = stick_on_e();
    sim.add_disk(SimDisk::usb(3, "Offline", 8 * GIB));
    let (code, out) = run_command(&sim, Command::Mount { disk: 3 });
    assert_eq!(code, 0);
    assert_eq!(out.trim(), "Disk 3 mounted as D:");
}

#[test]
fn mount_command_hints_at_elevation() {
    let sim = stick_on_e();
    sim.fail_utility(5);
    let (code, out) = run_command(&sim, Command::Mount { disk: 3 });
    assert_eq!(code, 1);
    assert!(out.contains("--elevate"));
}

#[test]
fn locks_command_reports_idle_and_missing_volumes() {
    let sim = stick_on_e();
    let (code, out) = run_command(&sim, Command::Locks { letter: 'E' });
    assert_eq!(code, 0);
    assert_eq!(out, "No processes are using E:\n");

    let (code, _) = run_command(&sim, Command::Locks { letter: 'Q' });
    assert_eq!(code, 1);
}

#[test]
fn kill_command() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(44, "hung.exe"));
    assert_eq!(run_command(&sim, Command::Kill { pid: 44 }).0, 0);
    assert!(!sim.process_alive(44));
    assert_eq!(run_command(&sim, Command::Kill { pid: 44 }).0, 1);
}

#[test]
fn watch_command_stops_after_limit() {
    let sim = stick_on_e();
    let (code, out) = run_command(&sim, Command::Watch { seconds: Some(0) });
    assert_eq!(code, 0);
    assert!(out.contains("STICK"));
    assert_eq!(sim.listener_count(), 0);
}
