/// Elevation checks for Windows.
///
/// Bringing disks online and assigning letters require administrator
/// privileges; the binary can relaunch itself through the UAC prompt.
use super::wide;
use crate::error::OsError;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND};
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};
use windows::Win32::UI::Shell::ShellExecuteW;
use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

/// Check whether the current process is running with elevated (admin) privileges.
pub fn is_elevated() -> bool {
    unsafe {
        let mut token_handle = HANDLE::default();
        let process = GetCurrentProcess();

        if OpenProcessToken(process, TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION::default();
        let mut return_length = 0u32;

        let result = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );

        let _ = CloseHandle(token_handle);

        result.is_ok() && elevation.TokenIsElevated != 0
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains([' ', '\t', '"']) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Start the current executable again through the UAC "runas" verb with
/// `args`. The caller should exit once this returns `Ok`.
pub fn relaunch_elevated(args: &[String]) -> Result<(), OsError> {
    let exe = std::env::current_exe()?;
    let exe_wide = wide(&exe.to_string_lossy());
    let params = args.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" ");
    let params_wide = wide(&params);
    let verb = wide("runas");

    let instance = unsafe {
        ShellExecuteW(
            HWND::default(),
            PCWSTR(verb.as_ptr()),
            PCWSTR(exe_wide.as_ptr()),
            PCWSTR(params_wide.as_ptr()),
            PCWSTR::null(),
            SW_SHOWNORMAL,
        )
    };

    // Values above 32 mean success; lower values are error codes.
    let code = instance.0 as usize;
    if code > 32 {
        tracing::info!("Relaunched elevated: {params}");
        Ok(())
    } else {
        Err(OsError::new(code as u32))
    }
}
