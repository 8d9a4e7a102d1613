//! Maps raw hardware sensors onto the six reported kinds.

use framescope_ipc::{SensorKind, SensorReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareKind {
    Cpu,
    Memory,
    GpuNvidia,
    GpuAmd,
    GpuIntel,
    Other,
}

impl HardwareKind {
    pub fn is_gpu(self) -> bool {
        matches!(self, HardwareKind::GpuNvidia | HardwareKind::GpuAmd | HardwareKind::GpuIntel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    Temperature,
    Load,
    /// Gigabytes.
    Data,
    /// Megabytes.
    SmallData,
    Other,
}

/// One sensor as reported by a hardware provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSensor {
    pub hardware: HardwareKind,
    pub sensor: SensorType,
    pub name: String,
    /// `None` when the provider has no current value.
    pub value: Option<f32>,
}

impl RawSensor {
    pub fn new(
        hardware: HardwareKind,
        sensor: SensorType,
        name: impl Into<String>,
        value: Option<f32>,
    ) -> Self {
        Self { hardware, sensor, name: name.into(), value }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(needle)
}

/// Kind a sensor reports as, regardless of whether it has a value.
pub fn kind_of(sensor: &RawSensor) -> Option<SensorKind> {
    let name = sensor.name.as_str();
    match sensor.sensor {
        SensorType::Temperature if sensor.hardware == HardwareKind::Cpu => {
            Some(SensorKind::CpuTemperature)
        }
        SensorType::Temperature if sensor.hardware.is_gpu() => {
            if contains_ignore_case(name, "spot") {
                Some(SensorKind::GpuHotSpotTemperature)
            } else {
                Some(SensorKind::GpuTemperature)
            }
        }
        SensorType::Load
            if sensor.hardware == HardwareKind::Cpu && contains_ignore_case(name, "total") =>
        {
            Some(SensorKind::CpuLoad)
        }
        SensorType::Data
            if sensor.hardware == HardwareKind::Memory
                && name.eq_ignore_ascii_case("memory used") =>
        {
            Some(SensorKind::MemoryUsage)
        }
        SensorType::SmallData
            if sensor.hardware.is_gpu() && name.eq_ignore_ascii_case("gpu memory used") =>
        {
            Some(SensorKind::GpuMemoryUsage)
        }
        _ => None,
    }
}

/// `None` for unclassified sensors and sensors without a value.
pub fn classify(sensor: &RawSensor) -> Option<SensorReading> {
    let value = sensor.value?;
    kind_of(sensor).map(|kind| SensorReading::new(kind, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(hardware: HardwareKind, sensor: SensorType, name: &str) -> Option<SensorKind> {
        classify(&RawSensor::new(hardware, sensor, name, Some(1.0))).map(|r| r.kind)
    }

    #[test]
    fn test_temperatures() {
        use HardwareKind::*;
        assert_eq!(kind(Cpu, SensorType::Temperature, "Core #1"), Some(SensorKind::CpuTemperature));
        assert_eq!(kind(GpuNvidia, SensorType::Temperature, "GPU Core"), Some(SensorKind::GpuTemperature));
        assert_eq!(
            kind(GpuAmd, SensorType::Temperature, "GPU Hot Spot"),
            Some(SensorKind::GpuHotSpotTemperature)
        );
        assert_eq!(kind(Memory, SensorType::Temperature, "DIMM"), None);
    }

    #[test]
    fn test_cpu_load_needs_total() {
        assert_eq!(
            kind(HardwareKind::Cpu, SensorType::Load, "CPU Total"),
            Some(SensorKind::CpuLoad)
        );
        assert_eq!(kind(HardwareKind::Cpu, SensorType::Load, "CPU Core #3"), None);
        assert_eq!(kind(HardwareKind::GpuIntel, SensorType::Load, "GPU Total"), None);
    }

    #[test]
    fn test_memory_names_match_exactly() {
        assert_eq!(
            kind(HardwareKind::Memory, SensorType::Data, "Memory Used"),
            Some(SensorKind::MemoryUsage)
        );
        assert_eq!(kind(HardwareKind::Memory, SensorType::Data, "Virtual Memory Used"), None);
        assert_eq!(
            kind(HardwareKind::GpuNvidia, SensorType::SmallData, "GPU Memory Used"),
            Some(SensorKind::GpuMemoryUsage)
        );
        assert_eq!(kind(HardwareKind::GpuNvidia, SensorType::Data, "GPU Memory Used"), None);
        assert_eq!(kind(HardwareKind::Other, SensorType::SmallData, "GPU Memory Used"), None);
    }

    #[test]
    fn test_missing_value_is_skipped() {
        let sensor = RawSensor::new(HardwareKind::Cpu, SensorType::Temperature, "Package", None);
        assert_eq!(kind_of(&sensor), Some(SensorKind::CpuTemperature));
        assert_eq!(classify(&sensor), None);
    }
}
