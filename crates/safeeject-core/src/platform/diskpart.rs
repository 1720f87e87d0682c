/// Runs `diskpart.exe` scripts.
///
/// The script is fed through stdin; stdout is collected on a reader thread
/// so a chatty run cannot block on a full pipe. A run that outlives its
/// timeout is killed and reported as `WAIT_TIMEOUT`. Output is in the OEM
/// code page, as for any console program.
use crate::error::OsError;
use crate::system::DiskUtility;
use std::io::{Read, Write};
use std::os::windows::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use windows::Win32::Globalization::{
    GetOEMCP, MultiByteToWideChar, MULTI_BYTE_TO_WIDE_CHAR_FLAGS,
};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;
const WAIT_TIMEOUT: u32 = 258;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Diskpart;

/// Decode console output written in `code_page`.
fn decode(raw: &[u8], code_page: u32) -> String {
    if raw.is_ascii() {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let flags = MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0);
    let len = unsafe { MultiByteToWideChar(code_page, flags, raw, None) };
    if len <= 0 {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let mut wide = vec![0u16; len as usize];
    let written = unsafe { MultiByteToWideChar(code_page, flags, raw, Some(&mut wide)) };
    String::from_utf16_lossy(&wide[..written.clamp(0, len) as usize])
}

impl DiskUtility for Diskpart {
    fn run_script(&self, script: &str, timeout: Duration) -> Result<String, OsError> {
        debug!("diskpart script:\n{script}");
        let mut child = Command::new("diskpart.exe")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
            stdin.write_all(b"exit\n")?;
        }

        let reader = child.stdout.take().map(|mut stdout| {
            thread::Builder::new()
                .name("safeeject-diskpart".to_owned())
                .spawn(move || {
                    let mut raw = Vec::new();
                    let _ = stdout.read_to_end(&mut raw);
                    raw
                })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                warn!("diskpart did not finish in {timeout:?}, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(OsError::new(WAIT_TIMEOUT));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let raw = match reader {
            Some(Ok(handle)) => handle.join().unwrap_or_default(),
            Some(Err(e)) => return Err(e.into()),
            None => Vec::new(),
        };
        let output = decode(&raw, unsafe { GetOEMCP() });

        match status.code() {
            Some(0) => Ok(output),
            Some(code) => {
                debug!("diskpart exited with {code}:\n{output}");
                Err(OsError::new(code as u32))
            }
            None => Err(OsError::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CP850: u32 = 850;

    #[test]
    fn ascii_passes_through() {
        let row = "  Disk 1    Offline   14 GB";
        assert_eq!(decode(row.as_bytes(), CP850), row);
    }

    #[test]
    fn oem_bytes_are_decoded() {
        // "Disco 1    Não" with the cp850 byte for 'ã'.
        let raw = b"Disco 1    N\xC6o";
        assert_eq!(decode(raw, CP850), "Disco 1    N\u{e3}o");
    }
}
