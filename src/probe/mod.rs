// probe/mod.rs: Present address discovery and per-runtime hook strategies.
//
// A strategy builds a throwaway device and swap chain on a hidden window,
// copies the swap chain's dispatch table and releases everything again. Only
// the captured addresses survive. Hooking then redirects the Present entry to
// `present::present_detour`.
//
//   IDXGISwapChain dispatch table (18 entries)
//     [0..3)   IUnknown
//     [3..8)   IDXGIObject / IDXGIDeviceSubObject
//     [8]      Present
//     [13]     ResizeBuffers

mod d3d11;
mod d3d12;
#[cfg(windows)]
mod window;

use std::ffi::c_void;
use std::sync::Arc;

pub use self::d3d11::D3D11Hook;
pub use self::d3d12::D3D12Hook;

use crate::detector::GraphicsRuntime;
use crate::detour::{DetourBackend, DetourRecord, ThreadExclusions};
use crate::error::HookError;
use crate::present;

pub const DXGI_SWAPCHAIN_METHOD_COUNT: usize = 18;
pub const PRESENT_INDEX: usize = 8;
pub const RESIZE_BUFFERS_INDEX: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeApi {
    D3D11,
    D3D12,
}

/// Creates a throwaway swap chain and returns its dispatch table entries.
pub trait Prober: Send {
    /// `window` is the target's window; used only when no private window can
    /// be created.
    fn swap_chain_methods(&self, api: ProbeApi, window: usize) -> Result<Vec<usize>, HookError>;
}

/// Copies the first `count` entries of a COM object's dispatch table.
///
/// # Safety
///
/// `instance` must point to a live COM object whose table has at least
/// `count` entries.
pub unsafe fn read_dispatch_table(instance: *const c_void, count: usize) -> Vec<usize> {
    let table = *(instance as *const *const usize);
    (0..count).map(|i| *table.add(i)).collect()
}

fn dispatch_entry(table: &[usize], index: usize) -> Result<usize, HookError> {
    if table.len() < DXGI_SWAPCHAIN_METHOD_COUNT {
        return Err(HookError::DispatchTableTooShort {
            len: table.len(),
            needed: DXGI_SWAPCHAIN_METHOD_COUNT,
        });
    }
    match table[index] {
        0 => Err(HookError::NullEntry(index)),
        address => Ok(address),
    }
}

/// The Present redirect both variants install.
struct PresentDetour {
    address: usize,
    record: Option<DetourRecord>,
}

impl PresentDetour {
    fn new(address: usize) -> Self {
        Self { address, record: None }
    }

    /// Installing twice keeps the first redirect.
    fn hook(
        &mut self,
        backend: &Arc<dyn DetourBackend>,
        exclusions: &Arc<ThreadExclusions>,
    ) -> Result<(), HookError> {
        if self.record.is_some() {
            return Ok(());
        }
        // SAFETY: `address` is Present of a live DXGI swap chain and the
        // detour has the same signature.
        let record = unsafe {
            DetourRecord::install(
                Arc::clone(backend),
                Arc::clone(exclusions),
                self.address,
                present::present_detour as usize,
                present::arm,
            )?
        }
        .on_disarm(present::disarm);
        self.record = Some(record);
        Ok(())
    }

    fn unhook(&mut self) -> Result<(), HookError> {
        let Some(record) = self.record.as_mut() else {
            return Ok(());
        };
        // disarms between disable and remove; on failure the record stays
        record.uninstall()?;
        self.record = None;
        Ok(())
    }

    fn is_hooked(&self) -> bool {
        self.record.is_some()
    }
}

/// Closed set of hook strategies, picked from the detected runtime.
pub enum HookStrategy {
    D3D11(D3D11Hook),
    D3D12(D3D12Hook),
}

impl HookStrategy {
    /// `None` for runtimes without a strategy.
    pub fn api_for(runtime: GraphicsRuntime) -> Option<ProbeApi> {
        match runtime {
            GraphicsRuntime::Direct3D11 | GraphicsRuntime::Direct3D11_1 => Some(ProbeApi::D3D11),
            GraphicsRuntime::Direct3D12 => Some(ProbeApi::D3D12),
            _ => None,
        }
    }

    pub fn probe(api: ProbeApi, prober: &dyn Prober, window: usize) -> Result<Self, HookError> {
        match api {
            ProbeApi::D3D11 => D3D11Hook::probe(prober, window).map(Self::D3D11),
            ProbeApi::D3D12 => D3D12Hook::probe(prober, window).map(Self::D3D12),
        }
    }

    pub fn hook(
        &mut self,
        backend: &Arc<dyn DetourBackend>,
        exclusions: &Arc<ThreadExclusions>,
    ) -> Result<(), HookError> {
        match self {
            Self::D3D11(hook) => hook.hook(backend, exclusions),
            Self::D3D12(hook) => hook.hook(backend, exclusions),
        }
    }

    pub fn unhook(&mut self) -> Result<(), HookError> {
        match self {
            Self::D3D11(hook) => hook.unhook(),
            Self::D3D12(hook) => hook.unhook(),
        }
    }

    pub fn is_hooked(&self) -> bool {
        match self {
            Self::D3D11(hook) => hook.is_hooked(),
            Self::D3D12(hook) => hook.is_hooked(),
        }
    }

    pub fn present_address(&self) -> usize {
        match self {
            Self::D3D11(hook) => hook.present_address(),
            Self::D3D12(hook) => hook.present_address(),
        }
    }
}

// ============================================================
// DXGI prober
// ============================================================

/// Probes with real devices on a private, never shown window.
#[cfg(windows)]
pub struct DxgiProber;

#[cfg(windows)]
impl Prober for DxgiProber {
    fn swap_chain_methods(&self, api: ProbeApi, window: usize) -> Result<Vec<usize>, HookError> {
        use winapi::shared::windef::HWND;

        let dummy = window::DummyWindow::create();
        let hwnd: HWND = match &dummy {
            Ok(dummy) => dummy.hwnd(),
            Err(e) => {
                log::warn!("{e}; probing on the target window");
                window as HWND
            }
        };
        if hwnd.is_null() {
            return Err(HookError::Probe("no window to create a swap chain on".into()));
        }

        // SAFETY: `hwnd` stays valid until `dummy` drops after the capture.
        unsafe {
            match api {
                ProbeApi::D3D11 => d3d11::capture_swap_chain_methods(hwnd),
                ProbeApi::D3D12 => d3d12::capture_swap_chain_methods(hwnd),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_to_strategy_mapping() {
        assert_eq!(HookStrategy::api_for(GraphicsRuntime::Direct3D11), Some(ProbeApi::D3D11));
        assert_eq!(HookStrategy::api_for(GraphicsRuntime::Direct3D11_1), Some(ProbeApi::D3D11));
        assert_eq!(HookStrategy::api_for(GraphicsRuntime::Direct3D12), Some(ProbeApi::D3D12));
        for runtime in [
            GraphicsRuntime::Direct3D9,
            GraphicsRuntime::Direct3D10,
            GraphicsRuntime::Direct3D10_1,
            GraphicsRuntime::Unknown,
        ] {
            assert_eq!(HookStrategy::api_for(runtime), None);
        }
    }

    #[test]
    fn test_read_dispatch_table_follows_vtable_pointer() {
        let vtable: Vec<usize> = (100..100 + DXGI_SWAPCHAIN_METHOD_COUNT).collect();
        let object = [vtable.as_ptr() as usize];
        let entries = unsafe {
            read_dispatch_table(object.as_ptr() as *const c_void, DXGI_SWAPCHAIN_METHOD_COUNT)
        };
        assert_eq!(entries, vtable);
        assert_eq!(entries[PRESENT_INDEX], 108);
    }

    #[test]
    fn test_short_or_null_tables_rejected() {
        assert!(matches!(
            dispatch_entry(&[1; 9], PRESENT_INDEX),
            Err(HookError::DispatchTableTooShort { len: 9, needed: 18 })
        ));
        let mut table = [7usize; DXGI_SWAPCHAIN_METHOD_COUNT];
        table[PRESENT_INDEX] = 0;
        assert!(matches!(
            dispatch_entry(&table, PRESENT_INDEX),
            Err(HookError::NullEntry(8))
        ));
    }
}
