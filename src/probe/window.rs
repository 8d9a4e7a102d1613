// window.rs: Hidden probe window and COM release guard.

use std::ptr;

use winapi::shared::minwindef::HINSTANCE;
use winapi::shared::windef::HWND;
use winapi::shared::winerror::ERROR_CLASS_ALREADY_EXISTS;
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::libloaderapi::GetModuleHandleA;
use winapi::um::unknwnbase::IUnknown;
use winapi::um::winuser::{
    CreateWindowExA, DefWindowProcA, DestroyWindow, RegisterClassExA, UnregisterClassA,
    CS_HREDRAW, CS_VREDRAW, WNDCLASSEXA, WS_OVERLAPPEDWINDOW,
};

use crate::error::HookError;

const CLASS_NAME: &[u8] = b"framescope_probe\0";
const WINDOW_TITLE: &[u8] = b"framescope probe\0";

/// A window that is created without `WS_VISIBLE` and never shown.
pub(super) struct DummyWindow {
    hwnd: HWND,
    instance: HINSTANCE,
}

impl DummyWindow {
    pub(super) fn create() -> Result<Self, HookError> {
        unsafe {
            let instance = GetModuleHandleA(ptr::null());
            let class = WNDCLASSEXA {
                cbSize: std::mem::size_of::<WNDCLASSEXA>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(DefWindowProcA),
                cbClsExtra: 0,
                cbWndExtra: 0,
                hInstance: instance,
                hIcon: ptr::null_mut(),
                hCursor: ptr::null_mut(),
                hbrBackground: ptr::null_mut(),
                lpszMenuName: ptr::null(),
                lpszClassName: CLASS_NAME.as_ptr() as _,
                hIconSm: ptr::null_mut(),
            };
            if RegisterClassExA(&class) == 0 {
                let err = GetLastError();
                if err != ERROR_CLASS_ALREADY_EXISTS {
                    return Err(HookError::Probe(format!("RegisterClassExA failed ({err})")));
                }
            }

            let hwnd = CreateWindowExA(
                0,
                CLASS_NAME.as_ptr() as _,
                WINDOW_TITLE.as_ptr() as _,
                WS_OVERLAPPEDWINDOW,
                0,
                0,
                100,
                100,
                ptr::null_mut(),
                ptr::null_mut(),
                instance,
                ptr::null_mut(),
            );
            if hwnd.is_null() {
                let err = GetLastError();
                UnregisterClassA(CLASS_NAME.as_ptr() as _, instance);
                return Err(HookError::Probe(format!("CreateWindowExA failed ({err})")));
            }
            Ok(Self { hwnd, instance })
        }
    }

    pub(super) fn hwnd(&self) -> HWND {
        self.hwnd
    }
}

impl Drop for DummyWindow {
    fn drop(&mut self) {
        unsafe {
            DestroyWindow(self.hwnd);
            UnregisterClassA(CLASS_NAME.as_ptr() as _, self.instance);
        }
    }
}

/// Releases one COM reference on drop.
pub(super) struct Com<T>(*mut T);

impl<T> Com<T> {
    /// `None` for a null interface pointer.
    pub(super) fn new(ptr: *mut T) -> Option<Self> {
        (!ptr.is_null()).then_some(Self(ptr))
    }

    pub(super) fn as_ptr(&self) -> *mut T {
        self.0
    }
}

impl<T> Drop for Com<T> {
    fn drop(&mut self) {
        // SAFETY: every COM interface starts with the IUnknown table.
        unsafe {
            (*(self.0 as *mut IUnknown)).Release();
        }
    }
}
