//! Stream ingest: connection lifecycle and derived training state.
//!
//! [`StreamIngest`] owns the connection, the loss series and the current
//! attention tensor. Callers read immutable [`IngestSnapshot`]s, either by
//! polling [`StreamIngest::snapshot`] or by subscribing to the snapshots
//! published after every state change.
//!
//! # States
//!
//! - **Connecting**: until the first frame carrying both step and loss
//! - **Streaming**: frames update the loss series and/or attention
//! - **Closed**: disposed, remote close, or transport error

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::connection::{Connection, ConnectionEvent};
use super::message::TrainingUpdate;
use crate::attention_viz::CanonicalAttention;
use crate::loss_series::{LossPoint, LossSeries};

/// Upper bound on events handled per [`StreamIngest::pump`] call, so a
/// flood of frames cannot starve the redraw.
const MAX_EVENTS_PER_PUMP: usize = 1024;

/// Lifecycle state of the ingest connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Closed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        }
    }
}

/// Frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Frames received while not closed.
    pub frames: u64,
    /// Frames dropped because they failed to parse.
    pub rejected: u64,
    /// Frames that appended a loss point.
    pub loss_updates: u64,
    /// Frames that replaced the attention tensor.
    pub attention_updates: u64,
}

/// Read-only view of ingest state at one point in time.
#[derive(Debug, Clone)]
pub struct IngestSnapshot {
    pub state: ConnectionState,
    pub loss: LossSeries,
    pub attention: Option<Arc<CanonicalAttention>>,
    pub last_update: Option<DateTime<Utc>>,
    pub stats: IngestStats,
}

impl IngestSnapshot {
    /// True until the first step+loss frame arrives on a live connection.
    pub fn is_loading(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    /// Latest loss point, if any.
    pub fn latest(&self) -> Option<LossPoint> {
        self.loss.latest()
    }
}

/// Connection owner and state machine for inbound training updates.
pub struct StreamIngest<C: Connection> {
    connection: Option<C>,
    state: ConnectionState,
    loss: LossSeries,
    attention: Option<Arc<CanonicalAttention>>,
    last_update: Option<DateTime<Utc>>,
    stats: IngestStats,
    subscribers: Vec<Sender<IngestSnapshot>>,
}

impl<C: Connection> StreamIngest<C> {
    /// Take ownership of `connection` and enter `Connecting`.
    pub fn new(connection: C) -> Self {
        Self {
            connection: Some(connection),
            state: ConnectionState::Connecting,
            loss: LossSeries::new(),
            attention: None,
            last_update: None,
            stats: IngestStats::default(),
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Current state as an immutable snapshot.
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            state: self.state,
            loss: self.loss.clone(),
            attention: self.attention.clone(),
            last_update: self.last_update,
            stats: self.stats,
        }
    }

    /// Receive a snapshot after every state change.
    pub fn subscribe(&mut self) -> Receiver<IngestSnapshot> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Handle every event available within `timeout`.
    ///
    /// Waits up to `timeout` for the first event, then drains whatever is
    /// already queued. Returns the number of events handled.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let mut handled = 0;
        let mut wait = timeout;
        while handled < MAX_EVENTS_PER_PUMP && self.state != ConnectionState::Closed {
            let Some(connection) = self.connection.as_mut() else {
                break;
            };
            let Some(event) = connection.next_event(wait) else {
                break;
            };
            self.handle_event(event);
            handled += 1;
            wait = Duration::ZERO;
        }
        handled
    }

    /// Apply one connection event. Returns true if state changed.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> bool {
        if self.state == ConnectionState::Closed {
            tracing::debug!(?event, "ignoring event after close");
            return false;
        }

        match event {
            ConnectionEvent::Opened => {
                tracing::info!("training stream connected");
                false
            }
            ConnectionEvent::Frame(text) => self.handle_frame(&text),
            ConnectionEvent::Error(reason) => {
                tracing::warn!(%reason, state = self.state.label(), "training stream error");
                self.close_connection();
                true
            }
            ConnectionEvent::Closed => {
                tracing::info!("training stream closed by remote");
                self.close_connection();
                true
            }
        }
    }

    fn handle_frame(&mut self, text: &str) -> bool {
        self.stats.frames += 1;

        let update = match TrainingUpdate::parse(text) {
            Ok(update) => update,
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!(error = %e, "dropping malformed training frame");
                return false;
            }
        };

        let mut changed = false;

        if let Some(point) = update.loss_point() {
            self.loss = self.loss.append(point);
            self.stats.loss_updates += 1;
            if self.state == ConnectionState::Connecting {
                tracing::info!(step = point.step, "first training update received");
                self.state = ConnectionState::Streaming;
            }
            changed = true;
        }

        if let Some(attention) = update.attention {
            tracing::debug!(heads = attention.head_count(), "attention replaced");
            self.attention = Some(Arc::new(attention));
            self.stats.attention_updates += 1;
            changed = true;
        }

        if changed {
            self.last_update = Some(Utc::now());
            self.publish();
        }
        changed
    }

    /// Release the connection and stop processing frames.
    ///
    /// Safe to call any number of times from any state; the connection is
    /// closed exactly once.
    pub fn dispose(&mut self) {
        if self.connection.is_none() && self.state == ConnectionState::Closed {
            return;
        }
        tracing::debug!(state = self.state.label(), "disposing training stream");
        self.close_connection();
    }

    /// Drop all derived state and start over on a fresh connection.
    pub fn reconnect(&mut self, connection: C) {
        self.dispose();
        tracing::info!("reconnecting training stream");
        self.connection = Some(connection);
        self.state = ConnectionState::Connecting;
        self.loss = LossSeries::new();
        self.attention = None;
        self.last_update = None;
        self.stats = IngestStats::default();
        self.publish();
    }

    fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.publish();
        }
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

impl<C: Connection> Drop for StreamIngest<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}
