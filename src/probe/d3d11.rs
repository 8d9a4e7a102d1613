// d3d11.rs: Hook strategy for the Direct3D 11 family.

use std::sync::Arc;

use super::{dispatch_entry, PresentDetour, ProbeApi, Prober, PRESENT_INDEX};
use crate::detour::{DetourBackend, ThreadExclusions};
use crate::error::HookError;

pub struct D3D11Hook {
    present: PresentDetour,
}

impl D3D11Hook {
    pub fn probe(prober: &dyn Prober, window: usize) -> Result<Self, HookError> {
        let table = prober.swap_chain_methods(ProbeApi::D3D11, window)?;
        let present = dispatch_entry(&table, PRESENT_INDEX)?;
        log::info!("got present address: {present:#x}");
        Ok(Self {
            present: PresentDetour::new(present),
        })
    }

    pub fn hook(
        &mut self,
        backend: &Arc<dyn DetourBackend>,
        exclusions: &Arc<ThreadExclusions>,
    ) -> Result<(), HookError> {
        self.present.hook(backend, exclusions)?;
        log::info!("Direct3D 11 hook applied");
        Ok(())
    }

    pub fn unhook(&mut self) -> Result<(), HookError> {
        if self.present.is_hooked() {
            self.present.unhook()?;
            log::info!("Direct3D 11 hook removed");
        }
        Ok(())
    }

    pub fn is_hooked(&self) -> bool {
        self.present.is_hooked()
    }

    pub fn present_address(&self) -> usize {
        self.present.address
    }
}

/// Creates a hardware device with a 100x100 windowed swap chain and copies
/// the swap chain's table.
#[cfg(windows)]
pub(super) unsafe fn capture_swap_chain_methods(
    window: winapi::shared::windef::HWND,
) -> Result<Vec<usize>, HookError> {
    use std::ptr;

    use winapi::shared::dxgi::{IDXGISwapChain, DXGI_SWAP_CHAIN_DESC, DXGI_SWAP_EFFECT_DISCARD};
    use winapi::shared::dxgiformat::DXGI_FORMAT_R8G8B8A8_UNORM;
    use winapi::shared::dxgitype::{
        DXGI_MODE_DESC, DXGI_MODE_SCALING_UNSPECIFIED, DXGI_MODE_SCANLINE_ORDER_UNSPECIFIED,
        DXGI_RATIONAL, DXGI_SAMPLE_DESC, DXGI_USAGE_RENDER_TARGET_OUTPUT,
    };
    use winapi::shared::minwindef::TRUE;
    use winapi::shared::winerror::FAILED;
    use winapi::um::d3d11::{
        D3D11CreateDeviceAndSwapChain, ID3D11Device, ID3D11DeviceContext,
        D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION,
    };
    use winapi::um::d3dcommon::D3D_DRIVER_TYPE_HARDWARE;

    use super::window::Com;
    use super::{read_dispatch_table, DXGI_SWAPCHAIN_METHOD_COUNT};

    let desc = DXGI_SWAP_CHAIN_DESC {
        BufferDesc: DXGI_MODE_DESC {
            Width: 100,
            Height: 100,
            RefreshRate: DXGI_RATIONAL {
                Numerator: 60,
                Denominator: 1,
            },
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ScanlineOrdering: DXGI_MODE_SCANLINE_ORDER_UNSPECIFIED,
            Scaling: DXGI_MODE_SCALING_UNSPECIFIED,
        },
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 1,
        OutputWindow: window,
        Windowed: TRUE,
        SwapEffect: DXGI_SWAP_EFFECT_DISCARD,
        Flags: 0,
    };

    let mut swap_chain: *mut IDXGISwapChain = ptr::null_mut();
    let mut device: *mut ID3D11Device = ptr::null_mut();
    let mut context: *mut ID3D11DeviceContext = ptr::null_mut();
    let hr = D3D11CreateDeviceAndSwapChain(
        ptr::null_mut(),
        D3D_DRIVER_TYPE_HARDWARE,
        ptr::null_mut(),
        D3D11_CREATE_DEVICE_BGRA_SUPPORT,
        ptr::null(),
        0,
        D3D11_SDK_VERSION,
        &desc,
        &mut swap_chain,
        &mut device,
        ptr::null_mut(),
        &mut context,
    );

    // guards first so partial results are released on every path
    let swap_chain = Com::new(swap_chain);
    let _device = Com::new(device);
    let _context = Com::new(context);

    if FAILED(hr) {
        return Err(HookError::Probe(format!(
            "D3D11CreateDeviceAndSwapChain failed ({:#010x})",
            hr as u32
        )));
    }
    let swap_chain =
        swap_chain.ok_or_else(|| HookError::Probe("no swap chain returned".into()))?;
    Ok(read_dispatch_table(
        swap_chain.as_ptr() as *const std::ffi::c_void,
        DXGI_SWAPCHAIN_METHOD_COUNT,
    ))
}
