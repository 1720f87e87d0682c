/// End-to-end eject, lock, and mount tests.
///
/// Each test drives an [`Ejector`] over a [`SimSystem`] and then inspects
/// the simulated OS: which handle operations ran, which scripts the
/// partitioning utility received, which processes are still alive.
use safeeject_core::model::EjectPolicy;
use safeeject_core::sim::{SimDisk, SimDrive, SimProcess, SimSystem, VolumeStep};
use safeeject_core::system::DriveKind;
use safeeject_core::{EjectError, Ejector, EjectorConfig};

const GIB: u64 = 1024 * 1024 * 1024;
const ERROR_INVALID_PARAMETER: u32 = 87;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn ejector(sim: &SimSystem) -> Ejector {
    Ejector::new(sim.context(), EjectorConfig::immediate())
}

/// C: system drive plus a USB stick on E: (disk 1).
fn stick_on_e() -> SimSystem {
    let sim = SimSystem::new();
    sim.add_drive(SimDrive::new('C', DriveKind::Fixed).filesystem("NTFS"));
    sim.add_drive(SimDrive::new('E', DriveKind::Removable).label("STICK"));
    sim.add_disk(SimDisk::usb(1, "SanDisk Cruzer", 16 * GIB).partition(&['E']));
    sim
}

fn collect_progress(
    run: impl FnOnce(&mut dyn FnMut(u8)) -> Result<String, EjectError>,
) -> (Result<String, EjectError>, Vec<u8>) {
    let mut seen = Vec::new();
    let result = run(&mut |p| seen.push(p));
    (result, seen)
}

// ── Eject ───────────────────────────────────────────────────────────────────

#[test]
fn verified_eject_removes_volume() {
    let sim = stick_on_e();
    let ej = ejector(&sim);

    let (result, progress) = collect_progress(|p| ej.eject('e', EjectPolicy::Verified, p));
    assert_eq!(result.unwrap(), "E: removed");
    assert_eq!(progress, vec![20, 40, 60, 80, 90, 100]);
    assert_eq!(
        sim.volume_calls('E'),
        vec![
            VolumeStep::Flush,
            VolumeStep::AllowRemoval,
            VolumeStep::Lock,
            VolumeStep::Dismount,
            VolumeStep::Eject,
        ]
    );
    assert!(sim.handle_closed('E'));
    assert!(ej.list_volumes().is_empty());
    assert!(!ej.is_ejectable('E'));
}

#[test]
fn fast_eject_skips_lock_and_removal_steps() {
    let sim = stick_on_e();
    let ej = ejector(&sim);

    let (result, progress) = collect_progress(|p| ej.eject('E', EjectPolicy::Fast, p));
    assert!(result.is_ok());
    assert_eq!(progress, vec![50, 90, 100]);
    assert_eq!(
        sim.volume_calls('E'),
        vec![VolumeStep::Flush, VolumeStep::Dismount, VolumeStep::Eject]
    );
}

#[test]
fn verified_eject_refuses_locked_volume() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(4321, "WINWORD.EXE").open(r"E:\report.docx"));
    let ej = ejector(&sim);

    let (result, progress) = collect_progress(|p| ej.eject('E', EjectPolicy::Verified, p));
    match result {
        Err(EjectError::LockedByProcess(procs)) => {
            assert_eq!(procs.len(), 1);
            assert_eq!(procs[0].pid, 4321);
            assert_eq!(&*procs[0].name, "WINWORD.EXE");
            assert_eq!(procs[0].files, vec![r"E:\report.docx".to_string()]);
        }
        other => panic!("expected LockedByProcess, got {other:?}"),
    }
    assert!(progress.is_empty());
    assert_eq!(sim.open_count('E'), 0, "volume must not be touched");
}

#[test]
fn fast_eject_ignores_locks() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(4321, "notepad.exe").open(r"E:\notes.txt"));
    let ej = ejector(&sim);

    let (result, _) = collect_progress(|p| ej.eject('E', EjectPolicy::Fast, p));
    assert!(result.is_ok());
    assert!(sim.process_alive(4321));
}

#[test]
fn busy_volume_is_classified() {
    let sim = stick_on_e();
    sim.refuse_open('E', 32);
    let ej = ejector(&sim);

    let (result, progress) = collect_progress(|p| ej.eject('E', EjectPolicy::Fast, p));
    assert_eq!(result, Err(EjectError::DeviceBusy));
    assert!(progress.is_empty());
}

#[test]
fn refused_eject_keeps_volume_and_closes_handle() {
    let sim = stick_on_e();
    sim.refuse_step('E', VolumeStep::Eject, 1117);
    let ej = ejector(&sim);

    let (result, progress) = collect_progress(|p| ej.eject('E', EjectPolicy::Verified, p));
    assert_eq!(result, Err(EjectError::SequenceStepFailed(1117)));
    assert_eq!(progress.last(), Some(&90));
    assert!(sim.handle_closed('E'));
    assert_eq!(ej.list_volumes().len(), 1);
}

#[test]
fn missing_volume_is_inaccessible() {
    let sim = stick_on_e();
    let ej = ejector(&sim);

    let (result, _) = collect_progress(|p| ej.eject('Q', EjectPolicy::Verified, p));
    assert_eq!(result, Err(EjectError::VolumeInaccessible('Q')));
}

#[test]
fn force_eject_kills_lockers_first() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(10, "explorer.exe"));
    sim.add_process(SimProcess::new(11, "vlc.exe").open(r"E:\movie.mkv"));
    sim.add_process(SimProcess::new(12, "portable.exe").exe(r"E:\apps\portable.exe"));
    let ej = ejector(&sim);

    let (result, progress) = collect_progress(|p| ej.force_eject('E', p));
    assert!(result.is_ok());
    assert_eq!(progress, vec![50, 90, 100]);
    assert!(sim.process_alive(10));
    assert!(!sim.process_alive(11));
    assert!(!sim.process_alive(12));
}

#[test]
fn force_eject_continues_past_unkillable_process() {
    let sim = stick_on_e();
    sim.add_process(
        SimProcess::new(20, "MsMpEng.exe")
            .open(r"E:\scan.tmp")
            .protected(),
    );
    let ej = ejector(&sim);

    let (result, _) = collect_progress(|p| ej.force_eject('E', p));
    assert!(result.is_ok());
    assert!(sim.process_alive(20));
    assert_eq!(sim.volume_calls('E').last(), Some(&VolumeStep::Eject));
}

// ── Locks ───────────────────────────────────────────────────────────────────

#[test]
fn lock_scan_on_idle_volume_is_empty() {
    let sim = stick_on_e();
    sim.add_process(SimProcess::new(1, "svchost.exe").open(r"C:\Windows\x.log"));

    let ej = ejector(&sim);
    assert!(ej.find_locks('E').is_empty());
    assert_eq!(ej.verify_safe_to_eject('E'), Ok(()));
}

#[test]
fn lock_scan_stops_at_first_match_and_skips_uninspectable() {
    let sim = stick_on_e();
    sim.add_process(
        SimProcess::new(7, "copy.exe")
            .open(r"C:\temp\a")
            .open(r"\\?\E:\big.iso")
            .open(r"E:\second.bin")
            .open(r"E:\third.bin"),
    );
    sim.add_process(
        SimProcess::new(8, "System")
            .open(r"E:\$Extend")
            .uninspectable(),
    );

    let locks = ejector(&sim).find_locks('e');
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].pid, 7);
    assert_eq!(locks[0].files, vec![r"\\?\E:\big.iso".to_string()]);
    assert_eq!(sim.open_file_reads(7), 2);
}

#[test]
fn kill_missing_process_is_reported() {
    let sim = stick_on_e();
    let ej = ejector(&sim);
    assert!(matches!(ej.kill_process(999), Err(EjectError::Unknown(_))));

    sim.add_process(SimProcess::new(5, "csrss.exe").protected());
    assert_eq!(ej.kill_process(5), Err(EjectError::AccessDenied));
}

// ── Mount ───────────────────────────────────────────────────────────────────

#[test]
fn mount_uses_auto_assigned_letter() {
    let sim = stick_on_e();
    sim.add_disk(SimDisk::usb(3, "Offline Stick", 8 * GIB).auto_letter('G'));
    let ej = ejector(&sim);

    assert_eq!(ej.mount(3), Ok('G'));
    let scripts = sim.scripts();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].starts_with("select disk 3\nonline disk\n"));
    assert!(ej.is_ejectable('G'));
}

#[test]
fn mount_assigns_lowest_free_letter() {
    let sim = SimSystem::new();
    sim.add_drive(SimDrive::new('C', DriveKind::Fixed).filesystem("NTFS"));
    sim.add_disk(SimDisk::usb(3, "Offline Stick", 8 * GIB));
    let ej = ejector(&sim);

    assert_eq!(ej.mount(3), Ok('D'));
    let scripts = sim.scripts();
    assert_eq!(scripts.len(), 2);
    assert_eq!(
        scripts[1],
        "select disk 3\nselect partition 1\nassign letter=D\n"
    );
    assert!(ej.list_volumes().iter().any(|v| v.letter == 'D'));
}

#[test]
fn mount_skips_letters_in_use() {
    let sim = stick_on_e();
    sim.add_drive(SimDrive::new('D', DriveKind::CdRom));
    sim.add_disk(SimDisk::usb(3, "Offline Stick", 8 * GIB));

    assert_eq!(ejector(&sim).mount(3), Ok('F'));
}

#[test]
fn mount_fails_when_no_letter_confirms() {
    let sim = stick_on_e();
    sim.add_disk(SimDisk::usb(3, "Offline Stick", 8 * GIB));
    sim.accept_assign(false);

    assert_eq!(ejector(&sim).mount(3), Err(EjectError::AssignmentFailed));
    // Online script plus one attempt per free letter in D..=Z except E.
    assert_eq!(sim.scripts().len(), 1 + 22);
}

#[test]
fn mount_continues_past_a_failed_assignment() {
    let sim = SimSystem::new();
    sim.add_drive(SimDrive::new('C', DriveKind::Fixed).filesystem("NTFS"));
    sim.add_disk(SimDisk::usb(3, "Offline Stick", 8 * GIB));
    sim.fail_script("assign letter=D", ERROR_INVALID_PARAMETER);

    assert_eq!(ejector(&sim).mount(3), Ok('E'));
    let scripts = sim.scripts();
    assert_eq!(scripts.len(), 3);
    assert!(scripts[2].ends_with("assign letter=E\n"));
}

#[test]
fn mount_of_an_already_online_disk_still_assigns() {
    let sim = SimSystem::new();
    sim.add_drive(SimDrive::new('C', DriveKind::Fixed).filesystem("NTFS"));
    sim.add_disk(SimDisk::usb(3, "Letterless Stick", 8 * GIB));
    sim.fail_script("online disk", ERROR_INVALID_PARAMETER);

    assert_eq!(ejector(&sim).mount(3), Ok('D'));
    assert_eq!(sim.scripts().len(), 2);
}

#[test]
fn refused_assignment_is_access_denied() {
    let sim = stick_on_e();
    sim.add_disk(SimDisk::usb(3, "Offline Stick", 8 * GIB));
    sim.fail_script("assign letter=", 5);

    assert_eq!(ejector(&sim).mount(3), Err(EjectError::AccessDenied));
    // Online script plus the first assignment only.
    assert_eq!(sim.scripts().len(), 2);
}

#[test]
fn mount_without_privileges_is_access_denied() {
    let sim = stick_on_e();
    sim.fail_utility(5);

    assert_eq!(ejector(&sim).mount(3), Err(EjectError::AccessDenied));
}
