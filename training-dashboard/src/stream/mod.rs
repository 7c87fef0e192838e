//! Live training update stream.
//!
//! - [`message`]: frame parsing with field-alias resolution
//! - [`connection`]: connection events and the WebSocket transport
//! - [`ingest`]: the `Connecting -> Streaming -> Closed` state machine

pub mod connection;
pub mod ingest;
pub mod message;

pub use connection::{ChannelConnection, Connection, ConnectionEvent, EventSender, WsConnection};
pub use ingest::{ConnectionState, IngestSnapshot, IngestStats, StreamIngest};
pub use message::{FrameError, TrainingUpdate, ATTENTION_ALIASES, LOSS_ALIASES, STEP_ALIASES};
