/// The low-level release sequence for one volume.
///
/// # Algorithm
///
/// 1. Open `\\.\X:` with read/write sharing permitted, so the open itself
///    never blocks on other readers.
/// 2. **Verified**: flush (20 %) → allow media removal (40 %) → exclusive
///    lock (60 %) → dismount (80 %).
///    **Fast**: flush and dismount after a single 50 % report.
/// 3. Eject media (90 %), then report 100 %.
///
/// Every step before the eject is best-effort: controllers differ in which
/// control codes they honour, so a refused step is logged and the sequence
/// continues. Only a failed open or a failed eject aborts, and both are
/// classified into an [`EjectError`]. The volume handle is dropped (closed)
/// on every exit path.
use crate::error::{EjectError, OsError};
use crate::model::EjectPolicy;
use crate::system::{VolumeHandle, VolumeIo};
use tracing::{debug, info, warn};

/// Phase of a running sequence, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EjectPhase {
    Requested,
    Flushing,
    AllowingRemoval,
    Locking,
    Dismounting,
    Ejecting,
    Succeeded,
    Failed,
}

/// Drives one eject sequence and its progress reports.
struct Sequence<'a> {
    letter: char,
    phase: EjectPhase,
    last_progress: u8,
    on_progress: &'a mut dyn FnMut(u8),
}

impl Sequence<'_> {
    fn enter(&mut self, phase: EjectPhase) {
        debug!("{}: {:?} -> {:?}", self.letter, self.phase, phase);
        self.phase = phase;
    }

    fn report(&mut self, percent: u8) {
        debug_assert!(percent >= self.last_progress, "progress must not go backwards");
        self.last_progress = percent;
        (self.on_progress)(percent);
    }

    /// Run a step whose failure is tolerated.
    fn best_effort(
        &mut self,
        phase: EjectPhase,
        handle: &mut dyn VolumeHandle,
        step: fn(&mut dyn VolumeHandle) -> Result<(), OsError>,
    ) -> bool {
        self.enter(phase);
        match step(handle) {
            Ok(()) => {
                debug!("{}: {:?} ok", self.letter, phase);
                true
            }
            Err(e) => {
                debug!("{}: {:?} refused ({e}), continuing", self.letter, phase);
                false
            }
        }
    }
}

/// Release `letter` under `policy`, reporting progress percentages.
///
/// Progress is monotonic. 100 is reported only on success.
pub fn eject_volume(
    volumes: &dyn VolumeIo,
    letter: char,
    policy: EjectPolicy,
    on_progress: &mut dyn FnMut(u8),
) -> Result<String, EjectError> {
    let letter = letter.to_ascii_uppercase();
    info!("Ejecting {letter}: ({policy:?})");

    let mut seq = Sequence {
        letter,
        phase: EjectPhase::Requested,
        last_progress: 0,
        on_progress,
    };

    let mut handle = volumes.open_volume(letter).map_err(|e| {
        seq.enter(EjectPhase::Failed);
        warn!("{letter}: open failed: {e}");
        EjectError::from_os(letter, e)
    })?;

    let dismounted = match policy {
        EjectPolicy::Verified => {
            seq.report(20);
            seq.best_effort(EjectPhase::Flushing, handle.as_mut(), |h| h.flush());
            seq.report(40);
            seq.best_effort(EjectPhase::AllowingRemoval, handle.as_mut(), |h| {
                h.allow_removal()
            });
            seq.report(60);
            seq.best_effort(EjectPhase::Locking, handle.as_mut(), |h| h.lock());
            seq.report(80);
            seq.best_effort(EjectPhase::Dismounting, handle.as_mut(), |h| h.dismount())
        }
        EjectPolicy::Fast => {
            seq.report(50);
            seq.best_effort(EjectPhase::Flushing, handle.as_mut(), |h| h.flush());
            seq.best_effort(EjectPhase::Dismounting, handle.as_mut(), |h| h.dismount())
        }
    };

    if !dismounted {
        // The volume may still be mounted; ejecting anyway matches the OS
        // behaviour for devices that reject dismount.
        warn!("{letter}: dismount was refused, ejecting media regardless");
    }

    seq.enter(EjectPhase::Ejecting);
    seq.report(90);
    if let Err(e) = handle.eject_media() {
        seq.enter(EjectPhase::Failed);
        warn!("{letter}: eject refused: {e}");
        return Err(EjectError::from_os(letter, e));
    }

    drop(handle);
    seq.enter(EjectPhase::Succeeded);
    seq.report(100);

    let msg = format!("{letter}: removed");
    info!("{msg}");
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION};
    use crate::sim::{SimDrive, SimSystem, VolumeStep};
    use crate::system::DriveKind;

    fn system() -> SimSystem {
        let sim = SimSystem::new();
        sim.add_drive(SimDrive::new('E', DriveKind::Removable));
        sim
    }

    fn run(sim: &SimSystem, policy: EjectPolicy) -> (Result<String, EjectError>, Vec<u8>) {
        let mut progress = Vec::new();
        let result = eject_volume(sim, 'E', policy, &mut |p| progress.push(p));
        (result, progress)
    }

    #[test]
    fn fast_progress_sequence() {
        let sim = system();
        let (result, progress) = run(&sim, EjectPolicy::Fast);
        assert!(result.is_ok());
        assert_eq!(progress, vec![50, 90, 100]);
        assert_eq!(
            sim.volume_calls('E'),
            vec![VolumeStep::Flush, VolumeStep::Dismount, VolumeStep::Eject]
        );
    }

    #[test]
    fn verified_progress_sequence() {
        let sim = system();
        let (result, progress) = run(&sim, EjectPolicy::Verified);
        assert!(result.is_ok());
        assert_eq!(progress, vec![20, 40, 60, 80, 90, 100]);
        assert_eq!(
            sim.volume_calls('E'),
            vec![
                VolumeStep::Flush,
                VolumeStep::AllowRemoval,
                VolumeStep::Lock,
                VolumeStep::Dismount,
                VolumeStep::Eject
            ]
        );
    }

    #[test]
    fn progress_matches_policy_table() {
        for policy in [EjectPolicy::Fast, EjectPolicy::Verified] {
            let sim = system();
            let (_, progress) = run(&sim, policy);
            assert_eq!(progress, policy.progress_steps());
        }
    }

    #[test]
    fn tolerated_steps_do_not_abort() {
        let sim = system();
        sim.refuse_step('E', VolumeStep::Flush, 1);
        sim.refuse_step('E', VolumeStep::AllowRemoval, 1);
        sim.refuse_step('E', VolumeStep::Lock, ERROR_ACCESS_DENIED);
        sim.refuse_step('E', VolumeStep::Dismount, 1);
        let (result, progress) = run(&sim, EjectPolicy::Verified);
        assert!(result.is_ok());
        assert_eq!(progress, vec![20, 40, 60, 80, 90, 100]);
        assert!(sim.volume_calls('E').contains(&VolumeStep::Eject));
    }

    #[test]
    fn failed_eject_is_fatal_and_stops_before_100() {
        let sim = system();
        sim.refuse_step('E', VolumeStep::Eject, ERROR_SHARING_VIOLATION);
        let (result, progress) = run(&sim, EjectPolicy::Fast);
        assert_eq!(result, Err(EjectError::DeviceBusy));
        assert_eq!(progress, vec![50, 90]);
        assert!(sim.handle_closed('E'));
    }

    #[test]
    fn open_failure_is_classified() {
        let sim = system();
        sim.refuse_open('E', ERROR_ACCESS_DENIED);
        let (result, progress) = run(&sim, EjectPolicy::Verified);
        assert_eq!(result, Err(EjectError::AccessDenied));
        assert!(progress.is_empty());
    }

    #[test]
    fn unknown_code_on_eject_keeps_code() {
        let sim = system();
        sim.refuse_step('E', VolumeStep::Eject, 1117);
        let (result, _) = run(&sim, EjectPolicy::Verified);
        assert_eq!(result, Err(EjectError::SequenceStepFailed(1117)));
    }

    #[test]
    fn handle_closed_on_success() {
        let sim = system();
        let _ = run(&sim, EjectPolicy::Fast);
        assert!(sim.handle_closed('E'));
    }
}
