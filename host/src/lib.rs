//! Controller side of framescope.
//!
//! A benchmark run wires these together:
//!
//! 1. [`ControlServer::start`] and [`SensorAggregator::start`] claim the two
//!    channels before anything connects to them.
//! 2. [`attach`] injects the loader and starts the hook session through an
//!    [`Injector`].
//! 3. [`ControlServer::begin_recording`] and
//!    [`SensorAggregator::start_monitoring`] open the measurement window.
//! 4. Closing the window yields [`FrameStats`] and a [`SensorSummary`].
//! 5. [`detach`] stops the session and ejects the loader.

pub mod config;
pub mod control;
pub mod error;
pub mod injector;
pub mod sensors;
pub mod stats;

pub use config::HostConfig;
pub use control::ControlServer;
pub use error::HostError;
pub use injector::{attach, detach, Injector};
pub use sensors::{SensorAggregator, SensorSummary};
pub use stats::FrameStats;
