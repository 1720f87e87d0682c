//! Physical disk catalog backed by WMI (`ROOT\CIMV2`).
//!
//! Disks come from `Win32_DiskDrive`, and the disk → partition → logical
//! disk chain is walked through the `Win32_DiskDriveToDiskPartition` and
//! `Win32_LogicalDiskToPartition` association classes. Catalog identifiers
//! are the WMI `DeviceID` values (`\\.\PHYSICALDRIVE1`, `Disk #1, Partition #0`).
//!
//! Only the USB check has a second source: when the WMI service is
//! unreachable, the bus type is read from the device itself with
//! `IOCTL_STORAGE_QUERY_PROPERTY`.
use super::{ioctl, open_device, read_u32};
use crate::error::OsError;
use crate::system::{
    physical_drive_id, DiskCatalog, DiskRecord, InterfaceKind, PartitionRecord,
};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;
use wmi::{FilterValue, WMIConnection, WMIError};

const CIMV2: &str = r"ROOT\CIMV2";

/// Reported for every WMI failure; the detail goes to the log.
const RPC_S_SERVER_UNAVAILABLE: u32 = 1722;

const IOCTL_STORAGE_QUERY_PROPERTY: u32 = 0x002D_1400;
const BUS_TYPE_USB: u32 = 7;
// STORAGE_DEVICE_DESCRIPTOR.BusType
const DESC_BUS_TYPE: usize = 28;

/// WMI reports `uint64` properties as strings on some systems.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum WmiU64 {
    Number(u64),
    Text(String),
}

impl WmiU64 {
    fn value(&self) -> u64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename = "Win32_DiskDrive")]
struct WmiDiskDrive {
    #[serde(rename = "DeviceID")]
    device_id: String,
    #[serde(rename = "Index")]
    index: Option<u32>,
    #[serde(rename = "Model")]
    model: Option<String>,
    #[serde(rename = "Size")]
    size: Option<WmiU64>,
    #[serde(rename = "InterfaceType")]
    interface_type: Option<String>,
    #[serde(rename = "MediaType")]
    media_type: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_DiskPartition")]
struct WmiDiskPartition {
    #[serde(rename = "DeviceID")]
    device_id: String,
    #[serde(rename = "DiskIndex")]
    disk_index: Option<u32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_LogicalDisk")]
struct WmiLogicalDisk {
    #[serde(rename = "DeviceID")]
    device_id: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_DiskDriveToDiskPartition")]
struct DiskDriveToDiskPartition {}

#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_LogicalDiskToPartition")]
struct LogicalDiskToPartition {}

pub struct WmiCatalog;

fn wmi_error(e: WMIError) -> OsError {
    debug!("WMI query failed: {e}");
    OsError::new(RPC_S_SERVER_UNAVAILABLE)
}

fn connect() -> Result<WMIConnection, OsError> {
    WMIConnection::with_namespace_path(CIMV2).map_err(wmi_error)
}

/// WQL object path for `class` keyed by `DeviceID`, with backslashes and
/// quotes escaped.
fn object_path(class: &str, device_id: &str) -> String {
    let escaped = device_id.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{class}.DeviceID=\"{escaped}\"")
}

fn interface_of(drive: &WmiDiskDrive) -> InterfaceKind {
    match drive.interface_type.as_deref() {
        Some(t) if t.eq_ignore_ascii_case("USB") => InterfaceKind::Usb,
        _ => InterfaceKind::Other,
    }
}

fn disk_record(drive: WmiDiskDrive) -> DiskRecord {
    let interface = interface_of(&drive);
    let removable_media = drive
        .media_type
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().contains("removable"));
    DiskRecord {
        id: drive.device_id,
        index: drive.index,
        model: drive.model.unwrap_or_default().trim().to_string(),
        size_bytes: drive.size.as_ref().map_or(0, WmiU64::value),
        interface,
        removable_media,
    }
}

/// `E:` → `E`
fn letter_of(device_id: &str) -> Option<char> {
    let mut chars = device_id.chars();
    match (chars.next(), chars.next()) {
        (Some(c), Some(':')) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

/// Bus type straight from the device, for when WMI is unavailable.
fn bus_is_usb(index: u32) -> Result<bool, OsError> {
    let handle = open_device(&physical_drive_id(index), 0)?;
    // STORAGE_PROPERTY_QUERY { StorageDeviceProperty, PropertyStandardQuery }.
    let query = [0u8; 12];
    let mut out = vec![0u8; 512];
    let n = ioctl(&handle, IOCTL_STORAGE_QUERY_PROPERTY, Some(&query), Some(&mut out))? as usize;
    Ok(read_u32(&out[..n.min(out.len())], DESC_BUS_TYPE) == Some(BUS_TYPE_USB))
}

impl DiskCatalog for WmiCatalog {
    fn disks_by_interface(&self, interface: InterfaceKind) -> Result<Vec<DiskRecord>, OsError> {
        let wmi = connect()?;
        let drives: Vec<WmiDiskDrive> = match interface {
            InterfaceKind::Usb => {
                let filters = HashMap::from([(
                    "InterfaceType".to_string(),
                    FilterValue::String("USB".to_string()),
                )]);
                wmi.filtered_query(&filters).map_err(wmi_error)?
            }
            InterfaceKind::Other => wmi.query().map_err(wmi_error)?,
        };
        Ok(drives
            .into_iter()
            .map(disk_record)
            .filter(|d| d.interface == interface)
            .collect())
    }

    fn associated_partitions(&self, disk_id: &str) -> Result<Vec<PartitionRecord>, OsError> {
        let wmi = connect()?;
        let partitions = wmi
            .associators::<WmiDiskPartition, DiskDriveToDiskPartition>(&object_path(
                "Win32_DiskDrive",
                disk_id,
            ))
            .map_err(wmi_error)?;
        Ok(partitions
            .into_iter()
            .map(|p| PartitionRecord {
                id: p.device_id,
                disk_index: p.disk_index,
            })
            .collect())
    }

    fn associated_logical_volumes(&self, partition_id: &str) -> Result<Vec<char>, OsError> {
        let wmi = connect()?;
        let disks = wmi
            .associators::<WmiLogicalDisk, LogicalDiskToPartition>(&object_path(
                "Win32_DiskPartition",
                partition_id,
            ))
            .map_err(wmi_error)?;
        Ok(disks.iter().filter_map(|d| letter_of(&d.device_id)).collect())
    }

    fn is_usb_disk(&self, index: u32) -> bool {
        match self.disks_by_interface(InterfaceKind::Usb) {
            Ok(disks) => disks.iter().any(|d| d.index == Some(index)),
            Err(e) => {
                debug!("PHYSICALDRIVE{index}: WMI unavailable ({e}), asking the device");
                bus_is_usb(index).unwrap_or(false)
            }
        }
    }
}
