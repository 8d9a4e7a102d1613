// d3d12.rs: Hook strategy for Direct3D 12.
//
// The ResizeBuffers address is captured alongside Present but not hooked.

use std::sync::Arc;

use super::{dispatch_entry, PresentDetour, ProbeApi, Prober, PRESENT_INDEX, RESIZE_BUFFERS_INDEX};
use crate::detour::{DetourBackend, ThreadExclusions};
use crate::error::HookError;

pub struct D3D12Hook {
    present: PresentDetour,
    resize_buffers: usize,
}

impl D3D12Hook {
    pub fn probe(prober: &dyn Prober, window: usize) -> Result<Self, HookError> {
        let table = prober.swap_chain_methods(ProbeApi::D3D12, window)?;
        let present = dispatch_entry(&table, PRESENT_INDEX)?;
        let resize_buffers = dispatch_entry(&table, RESIZE_BUFFERS_INDEX)?;
        log::info!("got present address: {present:#x}, resize buffers: {resize_buffers:#x}");
        Ok(Self {
            present: PresentDetour::new(present),
            resize_buffers,
        })
    }

    pub fn hook(
        &mut self,
        backend: &Arc<dyn DetourBackend>,
        exclusions: &Arc<ThreadExclusions>,
    ) -> Result<(), HookError> {
        self.present.hook(backend, exclusions)?;
        log::info!("Direct3D 12 hook applied");
        Ok(())
    }

    pub fn unhook(&mut self) -> Result<(), HookError> {
        if self.present.is_hooked() {
            self.present.unhook()?;
            log::info!("Direct3D 12 hook removed");
        }
        Ok(())
    }

    pub fn is_hooked(&self) -> bool {
        self.present.is_hooked()
    }

    pub fn present_address(&self) -> usize {
        self.present.address
    }

    pub fn resize_buffers_address(&self) -> usize {
        self.resize_buffers
    }
}

/// Creates a D3D12 device, a direct command queue and a flip-model swap
/// chain for `window`, then copies the swap chain's table.
#[cfg(windows)]
pub(super) unsafe fn capture_swap_chain_methods(
    window: winapi::shared::windef::HWND,
) -> Result<Vec<usize>, HookError> {
    use std::ptr;

    use winapi::ctypes::c_void;
    use winapi::shared::dxgi::{CreateDXGIFactory1, DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL};
    use winapi::shared::dxgi1_2::{
        IDXGISwapChain1, DXGI_ALPHA_MODE_UNSPECIFIED, DXGI_SCALING_STRETCH, DXGI_SWAP_CHAIN_DESC1,
    };
    use winapi::shared::dxgi1_4::IDXGIFactory4;
    use winapi::shared::dxgiformat::DXGI_FORMAT_B8G8R8A8_UNORM;
    use winapi::shared::dxgitype::{DXGI_SAMPLE_DESC, DXGI_USAGE_RENDER_TARGET_OUTPUT};
    use winapi::shared::minwindef::FALSE;
    use winapi::shared::winerror::FAILED;
    use winapi::um::d3d12::{
        D3D12CreateDevice, ID3D12CommandQueue, ID3D12Device, D3D12_COMMAND_LIST_TYPE_DIRECT,
        D3D12_COMMAND_QUEUE_DESC, D3D12_COMMAND_QUEUE_FLAG_NONE,
    };
    use winapi::um::d3dcommon::D3D_FEATURE_LEVEL_11_0;
    use winapi::um::unknwnbase::IUnknown;
    use winapi::um::winnt::HRESULT;
    use winapi::Interface;

    use super::window::Com;
    use super::{read_dispatch_table, DXGI_SWAPCHAIN_METHOD_COUNT};

    fn check(what: &str, hr: HRESULT) -> Result<(), HookError> {
        if FAILED(hr) {
            Err(HookError::Probe(format!("{what} failed ({:#010x})", hr as u32)))
        } else {
            Ok(())
        }
    }

    fn missing(what: &str) -> HookError {
        HookError::Probe(format!("{what} returned no object"))
    }

    let mut device: *mut c_void = ptr::null_mut();
    let hr = D3D12CreateDevice(
        ptr::null_mut(),
        D3D_FEATURE_LEVEL_11_0,
        &ID3D12Device::uuidof(),
        &mut device,
    );
    let device = Com::new(device as *mut ID3D12Device);
    check("D3D12CreateDevice", hr)?;
    let device = device.ok_or_else(|| missing("D3D12CreateDevice"))?;

    let queue_desc = D3D12_COMMAND_QUEUE_DESC {
        Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
        Priority: 0,
        Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
        NodeMask: 0,
    };
    let mut queue: *mut c_void = ptr::null_mut();
    let hr = (*device.as_ptr()).CreateCommandQueue(
        &queue_desc,
        &ID3D12CommandQueue::uuidof(),
        &mut queue,
    );
    let queue = Com::new(queue as *mut ID3D12CommandQueue);
    check("CreateCommandQueue", hr)?;
    let queue = queue.ok_or_else(|| missing("CreateCommandQueue"))?;

    let mut factory: *mut c_void = ptr::null_mut();
    let hr = CreateDXGIFactory1(&IDXGIFactory4::uuidof(), &mut factory);
    let factory = Com::new(factory as *mut IDXGIFactory4);
    check("CreateDXGIFactory1", hr)?;
    let factory = factory.ok_or_else(|| missing("CreateDXGIFactory1"))?;

    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: 100,
        Height: 100,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        Stereo: FALSE,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 2,
        Scaling: DXGI_SCALING_STRETCH,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
        AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
        Flags: 0,
    };
    let mut swap_chain: *mut IDXGISwapChain1 = ptr::null_mut();
    // for D3D12 the swap chain is bound to the command queue
    let hr = (*factory.as_ptr()).CreateSwapChainForHwnd(
        queue.as_ptr() as *mut IUnknown,
        window,
        &desc,
        ptr::null(),
        ptr::null_mut(),
        &mut swap_chain,
    );
    let swap_chain = Com::new(swap_chain);
    check("CreateSwapChainForHwnd", hr)?;
    let swap_chain = swap_chain.ok_or_else(|| missing("CreateSwapChainForHwnd"))?;

    Ok(read_dispatch_table(
        swap_chain.as_ptr() as *const std::ffi::c_void,
        DXGI_SWAPCHAIN_METHOD_COUNT,
    ))
}
