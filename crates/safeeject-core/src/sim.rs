/// In-memory implementation of every OS seam.
///
/// `SimSystem` models drive letters, USB disks with partitions, the
/// partitioning utility, running processes, raw volume handles, and device
/// notifications. It lets the discovery and eject state machine run end to
/// end on any host, and lets tests inject refusals at any step.
///
/// Successful ejects remove the volume, and online/assign scripts create
/// one, so a refresh after an operation sees the new state.
use crate::error::{OsError, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND};
use crate::monitor::{DeviceEvent, DeviceEventKind, DeviceNotifier, NotifierHandle};
use crate::system::{
    physical_drive_id, DiskCatalog, DiskRecord, DriveApi, DriveKind, InterfaceKind,
    MountedPartition, OpenFiles, PartitionRecord, PartitionTable, ProcessEntry, ProcessTable,
    SpaceInfo, SystemContext, DiskUtility, VolumeHandle, VolumeInfo, VolumeIo,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ERROR_NOT_READY: u32 = 21;
const ERROR_INVALID_PARAMETER: u32 = 87;
const GIB: u64 = 1024 * 1024 * 1024;

/// A lettered root.
#[derive(Debug, Clone)]
pub struct SimDrive {
    pub letter: char,
    pub kind: DriveKind,
    pub label: String,
    pub filesystem: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub info_readable: bool,
    pub space_readable: bool,
    /// Listed by the mounted-partition table.
    pub in_partition_table: bool,
    /// Removable flag reported by the mounted-partition table.
    pub partition_removable: bool,
}

impl SimDrive {
    pub fn new(letter: char, kind: DriveKind) -> Self {
        Self {
            letter: letter.to_ascii_uppercase(),
            kind,
            label: "USB".into(),
            filesystem: "FAT32".into(),
            total_bytes: 16 * GIB,
            free_bytes: 8 * GIB,
            info_readable: true,
            space_readable: true,
            in_partition_table: true,
            partition_removable: kind == DriveKind::Removable,
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.into();
        self
    }

    pub fn filesystem(mut self, fs: &str) -> Self {
        self.filesystem = fs.into();
        self
    }

    pub fn capacity(mut self, total: u64, free: u64) -> Self {
        self.total_bytes = total;
        self.free_bytes = free;
        self
    }

    pub fn unreadable_info(mut self) -> Self {
        self.info_readable = false;
        self
    }

    pub fn unreadable_space(mut self) -> Self {
        self.space_readable = false;
        self
    }

    pub fn partition_listing(mut self, listed: bool, removable: bool) -> Self {
        self.in_partition_table = listed;
        self.partition_removable = removable;
        self
    }
}

/// A physical disk.
#[derive(Debug, Clone)]
pub struct SimDisk {
    pub index: u32,
    pub model: String,
    pub size_bytes: u64,
    pub usb: bool,
    pub removable_media: bool,
    /// Letters reachable through each partition.
    pub partitions: Vec<Vec<char>>,
    /// Letter the OS assigns on its own once the disk goes online.
    pub auto_letter: Option<char>,
}

impl SimDisk {
    pub fn usb(index: u32, model: &str, size_bytes: u64) -> Self {
        Self {
            index,
            model: model.into(),
            size_bytes,
            usb: true,
            removable_media: true,
            partitions: Vec::new(),
            auto_letter: None,
        }
    }

    pub fn internal(index: u32, model: &str, size_bytes: u64) -> Self {
        Self {
            usb: false,
            removable_media: false,
            ..Self::usb(index, model, size_bytes)
        }
    }

    pub fn partition(mut self, letters: &[char]) -> Self {
        self.partitions.push(letters.to_vec());
        self
    }

    pub fn fixed_media(mut self) -> Self {
        self.removable_media = false;
        self
    }

    pub fn auto_letter(mut self, letter: char) -> Self {
        self.auto_letter = Some(letter);
        self
    }
}

/// A running process.
#[derive(Debug, Clone)]
pub struct SimProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
    pub open_files: Vec<String>,
    pub inspectable: bool,
    pub killable: bool,
}

impl SimProcess {
    pub fn new(pid: u32, name: &str) -> Self {
        Self {
            pid,
            name: name.into(),
            exe: Some(PathBuf::from(format!(r"C:\Program Files\{name}"))),
            open_files: Vec::new(),
            inspectable: true,
            killable: true,
        }
    }

    pub fn exe(mut self, exe: &str) -> Self {
        self.exe = Some(PathBuf::from(exe));
        self
    }

    pub fn open(mut self, path: &str) -> Self {
        self.open_files.push(path.into());
        self
    }

    pub fn uninspectable(mut self) -> Self {
        self.inspectable = false;
        self
    }

    pub fn protected(mut self) -> Self {
        self.killable = false;
        self
    }
}

/// Operations performed on a simulated volume handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeStep {
    Flush,
    AllowRemoval,
    Lock,
    Dismount,
    Eject,
}

#[derive(Default)]
struct SimState {
    drives: BTreeMap<char, SimDrive>,
    disks: Vec<SimDisk>,
    boot_letter: Option<char>,
    catalog_error: Option<u32>,
    associations_error: Option<u32>,
    partitions_error: Option<u32>,
    drive_scan_error: Option<u32>,
    utility_error: Option<u32>,
    failing_scripts: Vec<(String, u32)>,
    list_disk_output: String,
    accept_assign: bool,
    scripts: Vec<String>,
    processes: Vec<SimProcess>,
    open_file_reads: HashMap<u32, usize>,
    refused_open: HashMap<char, u32>,
    refused_steps: HashMap<(char, VolumeStep), u32>,
    volume_calls: HashMap<char, Vec<VolumeStep>>,
    open_handles: HashMap<char, usize>,
    opens: HashMap<char, usize>,
    step_delay: Duration,
    sinks: HashMap<u64, Sender<DeviceEvent>>,
    next_sink: u64,
}

/// In-memory system. Clones share state.
#[derive(Clone, Default)]
pub struct SimSystem {
    state: Arc<Mutex<SimState>>,
}

impl SimSystem {
    pub fn new() -> Self {
        let sim = Self::default();
        sim.state.lock().accept_assign = true;
        sim
    }

    /// A context whose every seam is this simulation.
    pub fn context(&self) -> SystemContext {
        SystemContext {
            drives: Arc::new(self.clone()),
            catalog: Arc::new(self.clone()),
            partitions: Arc::new(self.clone()),
            utility: Arc::new(self.clone()),
            processes: Arc::new(self.clone()),
            volumes: Arc::new(self.clone()),
            notifier: Arc::new(self.clone()),
        }
    }

    // ── Drives and disks ────────────────────────────────────────────────

    pub fn add_drive(&self, drive: SimDrive) {
        self.state.lock().drives.insert(drive.letter, drive);
    }

    pub fn remove_drive(&self, letter: char) {
        let mut st = self.state.lock();
        st.drives.remove(&letter);
        detach_letter(&mut st.disks, letter);
    }

    pub fn drive_count(&self) -> usize {
        self.state.lock().drives.len()
    }

    pub fn add_disk(&self, disk: SimDisk) {
        self.state.lock().disks.push(disk);
    }

    pub fn set_boot_letter(&self, letter: char) {
        self.state.lock().boot_letter = Some(letter);
    }

    pub fn fail_catalog(&self, code: u32) {
        self.state.lock().catalog_error = Some(code);
    }

    /// Fail partition and volume associations while disks still list.
    pub fn fail_associations(&self, code: u32) {
        self.state.lock().associations_error = Some(code);
    }

    pub fn fail_partition_table(&self, code: u32) {
        self.state.lock().partitions_error = Some(code);
    }

    pub fn fail_drive_scan(&self, code: u32) {
        self.state.lock().drive_scan_error = Some(code);
    }

    // ── Partitioning utility ────────────────────────────────────────────

    pub fn set_list_disk_output(&self, output: &str) {
        self.state.lock().list_disk_output = output.into();
    }

    pub fn fail_utility(&self, code: u32) {
        self.state.lock().utility_error = Some(code);
    }

    /// Fail, with `code`, every script containing `fragment`. Failed scripts
    /// have no effect.
    pub fn fail_script(&self, fragment: &str, code: u32) {
        self.state.lock().failing_scripts.push((fragment.into(), code));
    }

    /// Whether explicit letter assignments take effect.
    pub fn accept_assign(&self, accept: bool) {
        self.state.lock().accept_assign = accept;
    }

    /// Every script run so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().scripts.clone()
    }

    // ── Processes ───────────────────────────────────────────────────────

    pub fn add_process(&self, process: SimProcess) {
        self.state.lock().processes.push(process);
    }

    pub fn process_alive(&self, pid: u32) -> bool {
        self.state.lock().processes.iter().any(|p| p.pid == pid)
    }

    /// How many open-file paths were pulled for `pid`.
    pub fn open_file_reads(&self, pid: u32) -> usize {
        self.state
            .lock()
            .open_file_reads
            .get(&pid)
            .copied()
            .unwrap_or(0)
    }

    // ── Volume handles ──────────────────────────────────────────────────

    pub fn refuse_open(&self, letter: char, code: u32) {
        self.state.lock().refused_open.insert(letter, code);
    }

    pub fn refuse_step(&self, letter: char, step: VolumeStep, code: u32) {
        self.state.lock().refused_steps.insert((letter, step), code);
    }

    /// Slow every handle operation down by `delay`.
    pub fn set_step_delay(&self, delay: Duration) {
        self.state.lock().step_delay = delay;
    }

    pub fn volume_calls(&self, letter: char) -> Vec<VolumeStep> {
        self.state
            .lock()
            .volume_calls
            .get(&letter)
            .cloned()
            .unwrap_or_default()
    }

    /// How many times `letter` was opened.
    pub fn open_count(&self, letter: char) -> usize {
        self.state.lock().opens.get(&letter).copied().unwrap_or(0)
    }

    /// Whether `letter` was opened at least once and every handle is closed.
    pub fn handle_closed(&self, letter: char) -> bool {
        let st = self.state.lock();
        st.opens.get(&letter).copied().unwrap_or(0) > 0
            && st.open_handles.get(&letter).copied().unwrap_or(0) == 0
    }

    // ── Notifications ───────────────────────────────────────────────────

    /// Deliver a device notification to every running listener.
    pub fn emit_device_event(&self, kind: DeviceEventKind) {
        let sinks: Vec<Sender<DeviceEvent>> = self.state.lock().sinks.values().cloned().collect();
        for sink in sinks {
            let _ = sink.send(DeviceEvent::now(kind));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().sinks.len()
    }
}

fn detach_letter(disks: &mut [SimDisk], letter: char) {
    for disk in disks {
        for partition in &mut disk.partitions {
            partition.retain(|&l| l != letter);
        }
    }
}

fn attach_letter(st: &mut SimState, disk_index: u32, letter: char) {
    st.drives
        .entry(letter)
        .or_insert_with(|| SimDrive::new(letter, DriveKind::Removable));
    if let Some(disk) = st.disks.iter_mut().find(|d| d.index == disk_index) {
        match disk.partitions.first_mut() {
            Some(first) => first.push(letter),
            None => disk.partitions.push(vec![letter]),
        }
    }
}

fn partition_id(disk_index: u32, n: usize) -> String {
    format!("Disk #{disk_index}, Partition #{n}")
}

impl DriveApi for SimSystem {
    fn logical_drive_letters(&self) -> Result<Vec<char>, OsError> {
        let st = self.state.lock();
        if let Some(code) = st.drive_scan_error {
            return Err(OsError::new(code));
        }
        Ok(st.drives.keys().copied().collect())
    }

    fn drive_kind(&self, letter: char) -> DriveKind {
        self.state
            .lock()
            .drives
            .get(&letter.to_ascii_uppercase())
            .map(|d| d.kind)
            .unwrap_or(DriveKind::NoRootDir)
    }

    fn volume_info(&self, letter: char) -> Result<VolumeInfo, OsError> {
        let st = self.state.lock();
        match st.drives.get(&letter.to_ascii_uppercase()) {
            Some(d) if d.info_readable => Ok(VolumeInfo {
                label: d.label.clone(),
                filesystem: d.filesystem.clone(),
            }),
            Some(_) => Err(OsError::new(ERROR_NOT_READY)),
            None => Err(OsError::new(ERROR_PATH_NOT_FOUND)),
        }
    }

    fn space(&self, letter: char) -> Result<SpaceInfo, OsError> {
        let st = self.state.lock();
        match st.drives.get(&letter.to_ascii_uppercase()) {
            Some(d) if d.space_readable => Ok(SpaceInfo {
                total_bytes: d.total_bytes,
                free_bytes: d.free_bytes,
            }),
            Some(_) => Err(OsError::new(ERROR_NOT_READY)),
            None => Err(OsError::new(ERROR_PATH_NOT_FOUND)),
        }
    }

    fn root_exists(&self, letter: char) -> bool {
        self.state
            .lock()
            .drives
            .contains_key(&letter.to_ascii_uppercase())
    }

    fn physical_drive_exists(&self, index: u32) -> bool {
        self.state.lock().disks.iter().any(|d| d.index == index)
    }

    fn boot_letter(&self) -> char {
        self.state.lock().boot_letter.unwrap_or('C')
    }
}

impl DiskCatalog for SimSystem {
    fn disks_by_interface(&self, interface: InterfaceKind) -> Result<Vec<DiskRecord>, OsError> {
        let st = self.state.lock();
        if let Some(code) = st.catalog_error {
            return Err(OsError::new(code));
        }
        Ok(st
            .disks
            .iter()
            .filter(|d| d.usb == (interface == InterfaceKind::Usb))
            .map(|d| DiskRecord {
                id: physical_drive_id(d.index),
                index: Some(d.index),
                model: d.model.clone(),
                size_bytes: d.size_bytes,
                interface: if d.usb {
                    InterfaceKind::Usb
                } else {
                    InterfaceKind::Other
                },
                removable_media: d.removable_media,
            })
            .collect())
    }

    fn associated_partitions(&self, disk_id: &str) -> Result<Vec<PartitionRecord>, OsError> {
        let st = self.state.lock();
        if let Some(code) = st.catalog_error.or(st.associations_error) {
            return Err(OsError::new(code));
        }
        Ok(st
            .disks
            .iter()
            .filter(|d| physical_drive_id(d.index).eq_ignore_ascii_case(disk_id))
            .flat_map(|d| {
                (0..d.partitions.len()).map(move |n| PartitionRecord {
                    id: partition_id(d.index, n),
                    disk_index: Some(d.index),
                })
            })
            .collect())
    }

    fn associated_logical_volumes(&self, partition_id_str: &str) -> Result<Vec<char>, OsError> {
        let st = self.state.lock();
        if let Some(code) = st.catalog_error.or(st.associations_error) {
            return Err(OsError::new(code));
        }
        for disk in &st.disks {
            for (n, letters) in disk.partitions.iter().enumerate() {
                if partition_id(disk.index, n) == partition_id_str {
                    return Ok(letters.clone());
                }
            }
        }
        Ok(Vec::new())
    }
}

impl PartitionTable for SimSystem {
    fn mounted_partitions(&self) -> Result<Vec<MountedPartition>, OsError> {
        let st = self.state.lock();
        if let Some(code) = st.partitions_error {
            return Err(OsError::new(code));
        }
        Ok(st
            .drives
            .values()
            .filter(|d| d.in_partition_table)
            .map(|d| MountedPartition {
                letter: d.letter,
                filesystem: d.filesystem.clone(),
                removable: d.partition_removable,
            })
            .collect())
    }
}

impl DiskUtility for SimSystem {
    fn run_script(&self, script: &str, _timeout: Duration) -> Result<String, OsError> {
        let mut st = self.state.lock();
        st.scripts.push(script.to_string());
        if let Some(code) = st.utility_error {
            return Err(OsError::new(code));
        }
        let refused = st
            .failing_scripts
            .iter()
            .find(|(fragment, _)| script.contains(fragment.as_str()))
            .map(|(_, code)| *code);
        if let Some(code) = refused {
            return Err(OsError::new(code));
        }

        let mut selected: Option<u32> = None;
        let mut out = String::new();
        for line in script.lines().map(str::trim) {
            if line == "list disk" {
                out.push_str(&st.list_disk_output);
            } else if let Some(n) = line.strip_prefix("select disk ") {
                selected = n.trim().parse().ok();
            } else if line == "online disk" {
                let Some(index) = selected else { continue };
                let auto = st
                    .disks
                    .iter()
                    .find(|d| d.index == index)
                    .and_then(|d| d.auto_letter);
                if let Some(letter) = auto {
                    attach_letter(&mut st, index, letter);
                }
                out.push_str("DiskPart successfully onlined the selected disk.\n");
            } else if let Some(letter) = line.strip_prefix("assign letter=") {
                let (Some(index), Some(letter)) = (selected, letter.chars().next()) else {
                    continue;
                };
                if st.accept_assign {
                    attach_letter(&mut st, index, letter.to_ascii_uppercase());
                    out.push_str("DiskPart successfully assigned the drive letter.\n");
                } else {
                    out.push_str("Virtual Disk Service error: access denied.\n");
                }
            }
        }
        Ok(out)
    }
}

impl ProcessTable for SimSystem {
    fn processes(&self) -> Vec<ProcessEntry> {
        self.state
            .lock()
            .processes
            .iter()
            .map(|p| ProcessEntry {
                pid: p.pid,
                name: p.name.clone(),
                exe: p.exe.clone(),
            })
            .collect()
    }

    fn open_files(&self, pid: u32) -> Result<OpenFiles<'_>, OsError> {
        let files = {
            let st = self.state.lock();
            let process = st
                .processes
                .iter()
                .find(|p| p.pid == pid)
                .ok_or(OsError::new(ERROR_INVALID_PARAMETER))?;
            if !process.inspectable {
                return Err(OsError::new(ERROR_ACCESS_DENIED));
            }
            process.open_files.clone()
        };
        let state = Arc::clone(&self.state);
        Ok(Box::new(files.into_iter().inspect(move |_| {
            *state.lock().open_file_reads.entry(pid).or_default() += 1;
        })))
    }

    fn terminate(&self, pid: u32, _grace: Duration) -> Result<(), OsError> {
        let mut st = self.state.lock();
        let pos = st
            .processes
            .iter()
            .position(|p| p.pid == pid)
            .ok_or(OsError::new(ERROR_FILE_NOT_FOUND))?;
        if !st.processes[pos].killable {
            return Err(OsError::new(ERROR_ACCESS_DENIED));
        }
        st.processes.remove(pos);
        Ok(())
    }
}

struct SimHandle {
    letter: char,
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn step(&mut self, step: VolumeStep) -> Result<(), OsError> {
        let delay = self.state.lock().step_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let mut st = self.state.lock();
        st.volume_calls.entry(self.letter).or_default().push(step);
        if let Some(&code) = st.refused_steps.get(&(self.letter, step)) {
            return Err(OsError::new(code));
        }
        if step == VolumeStep::Eject {
            st.drives.remove(&self.letter);
            detach_letter(&mut st.disks, self.letter);
        }
        Ok(())
    }
}

impl VolumeHandle for SimHandle {
    fn flush(&mut self) -> Result<(), OsError> {
        self.step(VolumeStep::Flush)
    }

    fn allow_removal(&mut self) -> Result<(), OsError> {
        self.step(VolumeStep::AllowRemoval)
    }

    fn lock(&mut self) -> Result<(), OsError> {
        self.step(VolumeStep::Lock)
    }

    fn dismount(&mut self) -> Result<(), OsError> {
        self.step(VolumeStep::Dismount)
    }

    fn eject_media(&mut self) -> Result<(), OsError> {
        self.step(VolumeStep::Eject)
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        if let Some(n) = st.open_handles.get_mut(&self.letter) {
            *n = n.saturating_sub(1);
        }
    }
}

impl VolumeIo for SimSystem {
    fn open_volume(&self, letter: char) -> Result<Box<dyn VolumeHandle>, OsError> {
        let letter = letter.to_ascii_uppercase();
        let mut st = self.state.lock();
        if let Some(&code) = st.refused_open.get(&letter) {
            return Err(OsError::new(code));
        }
        if !st.drives.contains_key(&letter) {
            return Err(OsError::new(ERROR_FILE_NOT_FOUND));
        }
        *st.opens.entry(letter).or_default() += 1;
        *st.open_handles.entry(letter).or_default() += 1;
        Ok(Box::new(SimHandle {
            letter,
            state: Arc::clone(&self.state),
        }))
    }
}

impl DeviceNotifier for SimSystem {
    fn spawn(&self, sink: Sender<DeviceEvent>) -> Result<NotifierHandle, OsError> {
        let id = {
            let mut st = self.state.lock();
            let id = st.next_sink;
            st.next_sink += 1;
            st.sinks.insert(id, sink);
            id
        };

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("safeeject-sim-notifier".to_owned())
            .spawn(move || {
                let _ = stop_rx.recv();
            })?;

        let state = Arc::clone(&self.state);
        let shutdown = Box::new(move || {
            state.lock().sinks.remove(&id);
            let _ = stop_tx.send(());
        });
        Ok(NotifierHandle::new(shutdown, thread))
    }
}
