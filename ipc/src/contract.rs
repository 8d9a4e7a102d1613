//! Fixed export contract between the injector, the loader and the
//! instrumentation module. These names and signatures never change within an
//! ABI version.

/// Loader export invoked by the injector with the target's window handle.
pub const LOADER_START: &str = "StartHook";
/// Loader export invoked by the injector before ejecting.
pub const LOADER_STOP: &str = "StopHook";

/// Instrumentation module exports resolved by the loader.
pub const SESSION_START: &str = "framescope_session_start";
pub const SESSION_STOP: &str = "framescope_session_stop";
pub const ABI_VERSION_SYMBOL: &str = "framescope_abi_version";

/// Bumped whenever an export signature changes.
pub const ABI_VERSION: u32 = 1;

pub type SessionStartFn = unsafe extern "C" fn(window: usize) -> i32;
pub type SessionStopFn = unsafe extern "C" fn() -> i32;
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

pub const DEFAULT_CONTROL_CHANNEL: &str = "framescope";
pub const DEFAULT_SENSOR_CHANNEL: &str = "framescope-sensors";
