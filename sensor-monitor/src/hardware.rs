//! Hardware providers.
//!
//! [`SystemSource`] reads CPU load, memory and thermal components through
//! `sysinfo`, and NVIDIA GPUs through NVML when the driver library is present.

use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::Nvml;
use sysinfo::{Components, System};

use crate::classify::{HardwareKind, RawSensor, SensorType};
use crate::error::SensorError;

const BYTES_PER_MB: f32 = 1024.0 * 1024.0;
const BYTES_PER_GB: f32 = BYTES_PER_MB * 1024.0;

/// A set of hardware sensors refreshed on demand.
pub trait HardwareSource: Send {
    /// Refreshes every provider and returns the current sensor list.
    fn update(&mut self) -> Result<Vec<RawSensor>, SensorError>;
}

pub struct SystemSource {
    system: System,
    components: Components,
    nvml: Option<Nvml>,
}

impl SystemSource {
    pub fn new() -> Self {
        let mut system = System::new();
        // cpu usage is a delta, the first refresh only primes it
        system.refresh_cpu_usage();
        Self {
            system,
            components: Components::new_with_refreshed_list(),
            nvml: init_nvml(),
        }
    }

    fn gpu_sensors(&self, sensors: &mut Vec<RawSensor>) -> Result<(), SensorError> {
        let Some(nvml) = &self.nvml else {
            return Ok(());
        };
        let count = nvml.device_count().map_err(hardware)?;
        for index in 0..count {
            let device = nvml.device_by_index(index).map_err(hardware)?;
            let temperature = device.temperature(TemperatureSensor::Gpu).ok();
            sensors.push(RawSensor::new(
                HardwareKind::GpuNvidia,
                SensorType::Temperature,
                "GPU Core",
                temperature.map(|t| t as f32),
            ));
            let used = device.memory_info().ok().map(|m| m.used as f32 / BYTES_PER_MB);
            sensors.push(RawSensor::new(
                HardwareKind::GpuNvidia,
                SensorType::SmallData,
                "GPU Memory Used",
                used,
            ));
        }
        Ok(())
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareSource for SystemSource {
    fn update(&mut self) -> Result<Vec<RawSensor>, SensorError> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.components.refresh();

        let mut sensors = vec![
            RawSensor::new(
                HardwareKind::Cpu,
                SensorType::Load,
                "CPU Total",
                Some(self.system.global_cpu_usage()),
            ),
            RawSensor::new(
                HardwareKind::Memory,
                SensorType::Data,
                "Memory Used",
                Some(self.system.used_memory() as f32 / BYTES_PER_GB),
            ),
        ];

        for component in self.components.list() {
            let label = component.label();
            let temperature = component.temperature();
            sensors.push(RawSensor::new(
                component_hardware(label),
                SensorType::Temperature,
                label,
                temperature.is_finite().then_some(temperature),
            ));
        }

        self.gpu_sensors(&mut sensors)?;
        Ok(sensors)
    }
}

fn init_nvml() -> Option<Nvml> {
    match Nvml::init() {
        Ok(nvml) => {
            log::info!("NVML initialized");
            Some(nvml)
        }
        Err(e) => {
            log::info!("NVML unavailable, skipping NVIDIA sensors: {e}");
            None
        }
    }
}

fn hardware(e: nvml_wrapper::error::NvmlError) -> SensorError {
    SensorError::Hardware(e.to_string())
}

/// Guesses the owning hardware from a thermal component label.
///
/// NVIDIA GPUs are read through NVML, so GPU-looking components are
/// attributed to the other vendors.
pub fn component_hardware(label: &str) -> HardwareKind {
    let label = label.to_ascii_lowercase();
    const CPU: [&str; 6] = ["cpu", "core", "package", "tctl", "k10temp", "coretemp"];
    if label.contains("amdgpu") || label.contains("radeon") {
        HardwareKind::GpuAmd
    } else if label.contains("i915") || label.contains("xe gpu") {
        HardwareKind::GpuIntel
    } else if label.contains("gpu") {
        HardwareKind::GpuAmd
    } else if CPU.iter().any(|hint| label.contains(hint)) {
        HardwareKind::Cpu
    } else {
        HardwareKind::Other
    }
}
