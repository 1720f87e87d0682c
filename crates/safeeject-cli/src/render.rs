/// Plain-text and JSON rendering of devices, progress, and lock reports.
use safeeject_core::model::{LockingProcess, UnmountedDisk, UsageLevel, Volume};
use serde::Serialize;
use std::fmt::Write as _;

const BAR_WIDTH: usize = 20;

/// `[##########----------]  50%`
pub fn progress_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = BAR_WIDTH * percent as usize / 100;
    format!(
        "[{}{}] {percent:>3}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled)
    )
}

fn usage_marker(level: UsageLevel) -> &'static str {
    match level {
        UsageLevel::Ok => "",
        UsageLevel::Warning => " !",
        UsageLevel::Critical => " !!",
    }
}

/// One row per volume, then one per unmounted disk.
pub fn device_table(volumes: &[Volume], unmounted: &[UnmountedDisk]) -> String {
    if volumes.is_empty() && unmounted.is_empty() {
        return "No removable drives found.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} {:<24} {:<10} {:>10} {:>10} {:>6}",
        "DRIVE", "LABEL", "FS", "SIZE", "FREE", "USED"
    );
    for v in volumes {
        let _ = writeln!(
            out,
            "{:<6} {:<24} {:<10} {:>10} {:>10} {:>5}%{}",
            format!("{}:", v.letter),
            truncate(&v.label, 24),
            v.filesystem,
            v.total_display(),
            v.free_display(),
            v.usage_percent(),
            usage_marker(v.usage_level()),
        );
    }
    for d in unmounted {
        let disk = d
            .disk_index
            .map_or_else(|| "disk ?".to_string(), |i| format!("disk {i}"));
        let _ = writeln!(
            out,
            "{:<6} {:<24} {:<10} {:>10} {:>10}",
            format!("{}:", d.letter()),
            truncate(&d.label, 24),
            d.filesystem(),
            d.total_display(),
            disk,
        );
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
        t.push('~');
        t
    }
}

/// Processes holding files open on `letter`.
pub fn lock_report(letter: char, processes: &[LockingProcess]) -> String {
    if processes.is_empty() {
        return format!("No processes are using {letter}:\n");
    }
    let mut out = format!("{} process(es) are using {letter}:\n", processes.len());
    for p in processes {
        let _ = writeln!(out, "  {:>6}  {}", p.pid, p.name);
        for f in &p.files {
            let _ = writeln!(out, "          {f}");
        }
    }
    out
}

#[derive(Serialize)]
struct DeviceReport<'a> {
    volumes: &'a [Volume],
    unmounted: &'a [UnmountedDisk],
}

pub fn device_json(volumes: &[Volume], unmounted: &[UnmountedDisk]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&DeviceReport { volumes, unmounted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use safeeject_core::model::DiscoverySource;

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(progress_bar(0), format!("[{}]   0%", "-".repeat(20)));
        assert_eq!(progress_bar(50), format!("[{}{}]  50%", "#".repeat(10), "-".repeat(10)));
        assert_eq!(progress_bar(100), format!("[{}] 100%", "#".repeat(20)));
        assert_eq!(progress_bar(250), progress_bar(100));
    }

    #[test]
    fn empty_table_has_message() {
        assert_eq!(device_table(&[], &[]), "No removable drives found.\n");
    }

    #[test]
    fn table_lists_volumes_and_unmounted() {
        let v = Volume::new('E', "STICK", "FAT32", 1000, 50, DiscoverySource::DriveScan);
        let d = UnmountedDisk::new(Some(2), "Kingston DataTraveler", 0);
        let table = device_table(&[v], &[d]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("E:"));
        assert!(lines[1].ends_with("95% !!"));
        assert!(lines[2].starts_with("?:"));
        assert!(lines[2].contains("unmounted"));
        assert!(lines[2].ends_with("disk 2"));
    }

    #[test]
    fn long_labels_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc~");
        assert_eq!(truncate("abc", 4), "abc");
    }

    #[test]
    fn lock_report_lists_files() {
        let p = LockingProcess {
            pid: 42,
            name: "vlc.exe".into(),
            exe: "C:\\vlc.exe".into(),
            files: vec!["E:\\movie.mkv".into()],
        };
        let report = lock_report('E', &[p]);
        assert!(report.starts_with("1 process(es) are using E:"));
        assert!(report.contains("vlc.exe"));
        assert!(report.contains("E:\\movie.mkv"));
        assert_eq!(lock_report('E', &[]), "No processes are using E:\n");
    }

    #[test]
    fn json_has_both_lists() {
        let v = Volume::new('E', "STICK", "FAT32", 1000, 50, DiscoverySource::DriveScan);
        let json = device_json(&[v], &[]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["volumes"][0]["letter"], "E");
        assert_eq!(parsed["volumes"][0]["used_bytes"], 950);
        assert!(parsed["unmounted"].as_array().unwrap().is_empty());
    }
}
