/// `WM_DEVICECHANGE` listener.
///
/// A hidden top-level window (broadcasts are not delivered to message-only
/// windows) runs its message loop on a dedicated thread. The window
/// procedure forwards arrival and removal broadcasts to the sink stored in
/// a thread-local. Shutdown posts `WM_CLOSE`, which destroys the window and
/// ends the loop.
use super::wide;
use crate::error::OsError;
use crate::monitor::{DeviceEvent, DeviceEventKind, DeviceNotifier, NotifierHandle};
use crossbeam_channel::{bounded, Sender};
use std::cell::RefCell;
use std::thread;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    PostMessageW, PostQuitMessage, RegisterClassW, TranslateMessage, MSG, WINDOW_EX_STYLE,
    WM_CLOSE, WM_DESTROY, WM_DEVICECHANGE, WNDCLASSW, WS_OVERLAPPED,
};

const CLASS_NAME: &str = "SafeEjectDeviceListener";
const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;

thread_local! {
    static SINK: RefCell<Option<Sender<DeviceEvent>>> = const { RefCell::new(None) };
}

pub struct WindowNotifier;

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_DEVICECHANGE => {
            if let Some(kind) = DeviceEventKind::from_broadcast(wparam.0 as u32) {
                SINK.with(|sink| {
                    if let Some(tx) = sink.borrow().as_ref() {
                        let _ = tx.send(DeviceEvent::now(kind));
                    }
                });
            }
            LRESULT(1)
        }
        WM_CLOSE => {
            let _ = DestroyWindow(hwnd);
            LRESULT(0)
        }
        WM_DESTROY => {
            PostQuitMessage(0);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// Create the listener window on the current thread.
fn create_window() -> Result<HWND, OsError> {
    let instance = unsafe { GetModuleHandleW(None) }?;
    let class_name = wide(CLASS_NAME);

    let class = WNDCLASSW {
        lpfnWndProc: Some(window_proc),
        hInstance: instance.into(),
        lpszClassName: PCWSTR(class_name.as_ptr()),
        ..Default::default()
    };
    if unsafe { RegisterClassW(&class) } == 0 {
        let err = OsError::last();
        if err.code != ERROR_CLASS_ALREADY_EXISTS {
            return Err(err);
        }
    }

    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class_name.as_ptr()),
            PCWSTR(class_name.as_ptr()),
            WS_OVERLAPPED,
            0,
            0,
            0,
            0,
            None,
            None,
            instance,
            None,
        )
    }?;
    Ok(hwnd)
}

impl DeviceNotifier for WindowNotifier {
    fn spawn(&self, sink: Sender<DeviceEvent>) -> Result<NotifierHandle, OsError> {
        // HWND is a raw pointer; it crosses threads as an integer.
        let (ready_tx, ready_rx) = bounded::<Result<isize, OsError>>(1);

        let thread = thread::Builder::new()
            .name("safeeject-devnotify".to_owned())
            .spawn(move || {
                let hwnd = match create_window() {
                    Ok(hwnd) => hwnd,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                SINK.with(|s| *s.borrow_mut() = Some(sink));
                let _ = ready_tx.send(Ok(hwnd.0 as isize));

                let mut msg = MSG::default();
                unsafe {
                    while GetMessageW(&mut msg, None, 0, 0).as_bool() {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                }
                SINK.with(|s| s.borrow_mut().take());
                tracing::debug!("Device listener window closed");
            })?;

        let raw = match ready_rx.recv() {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(OsError::new(0));
            }
        };

        let shutdown = Box::new(move || {
            let hwnd = HWND(raw as *mut std::ffi::c_void);
            unsafe {
                let _ = PostMessageW(hwnd, WM_CLOSE, WPARAM(0), LPARAM(0));
            }
        });
        Ok(NotifierHandle::new(shutdown, thread))
    }
}
