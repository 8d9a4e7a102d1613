//! Sensor channel protocol.
//!
//! Host → monitor: `Command`/`Start`, `Command`/`Stop` (pushed).
//! Monitor → host: one message per reading, header = [`SensorKind`] name,
//! body = decimal value.

use std::fmt;

use crate::message::Message;

pub const COMMAND: &str = "Command";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorKind {
    CpuTemperature,
    CpuLoad,
    MemoryUsage,
    GpuTemperature,
    GpuHotSpotTemperature,
    GpuMemoryUsage,
}

impl SensorKind {
    pub const ALL: [SensorKind; 6] = [
        SensorKind::CpuTemperature,
        SensorKind::CpuLoad,
        SensorKind::MemoryUsage,
        SensorKind::GpuTemperature,
        SensorKind::GpuHotSpotTemperature,
        SensorKind::GpuMemoryUsage,
    ];

    /// Message header for readings of this kind.
    pub fn header(self) -> &'static str {
        match self {
            SensorKind::CpuTemperature => "CpuTemperature",
            SensorKind::CpuLoad => "CpuLoad",
            SensorKind::MemoryUsage => "MemoryUsage",
            SensorKind::GpuTemperature => "GpuTemperature",
            SensorKind::GpuHotSpotTemperature => "GpuHotSpotTemperature",
            SensorKind::GpuMemoryUsage => "GpuMemoryUsage",
        }
    }

    pub fn from_header(header: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.header().eq_ignore_ascii_case(header))
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub value: f32,
}

impl SensorReading {
    pub fn new(kind: SensorKind, value: f32) -> Self {
        Self { kind, value }
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.kind.header(), self.value.to_string())
    }

    /// `None` for unknown headers and bodies that are not a finite decimal.
    pub fn from_message(message: &Message) -> Option<Self> {
        let kind = SensorKind::from_header(&message.header)?;
        let value = message.body.trim().parse::<f32>().ok().filter(|v| v.is_finite())?;
        Some(Self { kind, value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    Start,
    Stop,
}

impl SensorCommand {
    pub fn body(self) -> &'static str {
        match self {
            SensorCommand::Start => "Start",
            SensorCommand::Stop => "Stop",
        }
    }

    pub fn to_message(self) -> Message {
        Message::new(COMMAND, self.body())
    }

    pub fn from_message(message: &Message) -> Option<Self> {
        if !message.header_is(COMMAND) {
            return None;
        }
        let body = message.body.trim();
        if body.eq_ignore_ascii_case("start") {
            Some(SensorCommand::Start)
        } else if body.eq_ignore_ascii_case("stop") {
            Some(SensorCommand::Stop)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_message_uses_kind_header() {
        let message = SensorReading::new(SensorKind::GpuHotSpotTemperature, 81.5).to_message();
        assert_eq!(message.header, "GpuHotSpotTemperature");
        assert_eq!(message.body, "81.5");
        assert_eq!(
            SensorReading::from_message(&message),
            Some(SensorReading::new(SensorKind::GpuHotSpotTemperature, 81.5))
        );
    }

    #[test]
    fn test_reading_rejects_unknown_header_and_bad_value() {
        assert_eq!(SensorReading::from_message(&Message::new("FanSpeed", "1200")), None);
        assert_eq!(SensorReading::from_message(&Message::new("CpuLoad", "high")), None);
    }

    #[test]
    fn test_kind_header_lookup_is_case_insensitive() {
        assert_eq!(SensorKind::from_header("cpuload"), Some(SensorKind::CpuLoad));
        assert_eq!(SensorKind::from_header("GPUMEMORYUSAGE"), Some(SensorKind::GpuMemoryUsage));
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            SensorCommand::from_message(&Message::new("command", "start")),
            Some(SensorCommand::Start)
        );
        assert_eq!(
            SensorCommand::from_message(&SensorCommand::Stop.to_message()),
            Some(SensorCommand::Stop)
        );
        assert_eq!(SensorCommand::from_message(&Message::new("Command", "pause")), None);
        assert_eq!(SensorCommand::from_message(&Message::new("CpuLoad", "start")), None);
    }
}
