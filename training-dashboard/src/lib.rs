//! Training Dashboard
//!
//! This crate provides:
//! - A live WebSocket feed of `{step, loss, attention_weights}` training updates
//! - A step x loss chart that grows as updates arrive
//! - An attention heatmap with head selection, log scaling and downsampling
//!   of large matrices
//! - A validated parameter form that starts training jobs over HTTP
//!
//! # Binaries
//!
//! - `train-dashboard` - Terminal dashboard (or `--plain` line output) for a
//!   running training server

pub mod attention_viz;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod form;
pub mod loss_series;
pub mod stream;

pub use attention_viz::{
    normalize, render, CanonicalAttention, ColorMap, HeatmapGrid, RenderOptions, VizError,
    VizResult,
};
pub use client::{ClientError, JobId, TrainingClient, TrainingParams};
pub use config::DashboardConfig;
pub use dashboard::{Action, Dashboard, JobStatus};
pub use error::{DashboardError, DashboardResult};
pub use form::{Field, FieldErrors, ParamForm};
pub use loss_series::{LossPoint, LossSeries};
pub use stream::{
    ChannelConnection, Connection, ConnectionEvent, ConnectionState, EventSender, FrameError,
    IngestSnapshot, IngestStats, StreamIngest, TrainingUpdate, WsConnection,
};
