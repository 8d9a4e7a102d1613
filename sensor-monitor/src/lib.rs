//! Sensor monitor process: samples hardware sensors while the host asks for
//! them and streams classified readings over the sensor channel.

pub mod classify;
pub mod error;
pub mod hardware;
pub mod monitor;

pub use classify::{classify, HardwareKind, RawSensor, SensorType};
pub use error::SensorError;
pub use hardware::{HardwareSource, SystemSource};
pub use monitor::{CommandSource, Monitor, MonitorOptions, MonitorState, ReadingSink};
