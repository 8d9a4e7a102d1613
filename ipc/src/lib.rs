//! Local message channel shared by every framescope process.
//!
//! A channel is a named, duplex, single-client pipe (`\\.\pipe\<name>` on
//! Windows, a Unix domain socket in the temp directory elsewhere). Every unit
//! on the wire is a `(header, body)` [`Message`]. Clients talk to servers
//! strictly request/response: one request in flight, one response back.
//! Servers may additionally push one-way messages to their client.
//!
//! ```text
//! target process                               host process
//! ┌──────────────┐  request (Log / FT / Dir)  ┌──────────────┐
//! │  IpcClient   │ ─────────────────────────► │  IpcServer   │
//! │  read loop   │ ◄───────────────────────── │  read loop   │──► MessageHandler
//! └──────────────┘   response / push          └──────────────┘
//! ```

pub mod client;
pub mod contract;
pub mod control;
pub mod error;
pub mod message;
pub mod sensor;
pub mod server;
mod transport;

pub use client::IpcClient;
pub use control::{ControlEvents, ControlHandler};
pub use error::{IpcError, Result};
pub use message::{Frame, FrameKind, Message, MessageCodec};
pub use sensor::{SensorCommand, SensorKind, SensorReading};
pub use server::{IpcServer, MessageHandler};
