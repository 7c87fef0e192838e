//! Dashboard composition root.
//!
//! [`Dashboard`] wires a [`StreamIngest`] to the chart panels and owns the
//! UI-only state: selected head, log-scale toggle, colour map, sidebar
//! visibility, the parameter form and the job submission status. It holds
//! no terminal handles, so key handling and state transitions are testable
//! without a TTY; drawing lives in [`ui`].
//!
//! # Hotkeys
//!
//! Sidebar open: type to edit, `Up`/`Down` move, `Enter` submits, `Esc`/`Tab` close.
//! Sidebar closed: `q`/`Esc` quit, `Left`/`Right` head, `l` log scale,
//! `c` colour map, `r` reconnect, `Tab` open sidebar.

pub mod ui;

use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::attention_viz::{render, ColorMap, HeatmapGrid, RenderOptions, VizResult};
use crate::client::{ClientError, JobId, TrainingParams};
use crate::config::DashboardConfig;
use crate::form::ParamForm;
use crate::stream::{Connection, IngestSnapshot, StreamIngest};

pub use ui::{run, run_plain};

/// Where the last job submission stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Submitting,
    Started(JobId),
    Failed(String),
}

/// Side effects the event loop must perform for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Submit(TrainingParams),
    Reconnect,
}

/// Dashboard state.
pub struct Dashboard<C: Connection> {
    ingest: StreamIngest<C>,
    snapshot: IngestSnapshot,
    form: ParamForm,
    selected_head: usize,
    options: RenderOptions,
    color_map: ColorMap,
    sidebar_open: bool,
    job: JobStatus,
    ws_url: String,
}

impl<C: Connection> Dashboard<C> {
    pub fn new(ingest: StreamIngest<C>, config: &DashboardConfig) -> Self {
        let snapshot = ingest.snapshot();
        Self {
            ingest,
            snapshot,
            form: ParamForm::default(),
            selected_head: 0,
            options: RenderOptions::default()
                .with_log_scale(config.log_scale)
                .with_max_dim(config.max_heatmap_dim),
            color_map: ColorMap::default(),
            sidebar_open: true,
            job: JobStatus::Idle,
            ws_url: config.ws_url.clone(),
        }
    }

    /// Pump the connection for up to `timeout` and refresh the snapshot.
    pub fn tick(&mut self, timeout: Duration) -> usize {
        let handled = self.ingest.pump(timeout);
        if handled > 0 {
            self.snapshot = self.ingest.snapshot();
        }
        handled
    }

    pub fn snapshot(&self) -> &IngestSnapshot {
        &self.snapshot
    }

    pub fn form(&self) -> &ParamForm {
        &self.form
    }

    pub fn job(&self) -> &JobStatus {
        &self.job
    }

    pub fn sidebar_open(&self) -> bool {
        self.sidebar_open
    }

    pub fn selected_head(&self) -> usize {
        self.selected_head
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    pub fn color_map(&self) -> ColorMap {
        self.color_map
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Heatmap for the current snapshot, head and options.
    pub fn heatmap(&self) -> Option<VizResult<HeatmapGrid>> {
        self.snapshot
            .attention
            .as_ref()
            .map(|attention| render(attention, self.selected_head, self.options))
    }

    /// Translate a key press into state changes and, maybe, an action.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Some(Action::Quit);
        }
        if self.sidebar_open {
            self.handle_form_key(key.code)
        } else {
            self.handle_view_key(key.code)
        }
    }

    fn handle_form_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Esc | KeyCode::Tab => self.sidebar_open = false,
            KeyCode::Up | KeyCode::BackTab => self.form.focus_previous(),
            KeyCode::Down => self.form.focus_next(),
            KeyCode::Backspace => self.form.backspace(),
            KeyCode::Enter => return self.begin_submit(),
            KeyCode::Char(c) => self.form.input_char(c),
            _ => {}
        }
        None
    }

    fn handle_view_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Some(Action::Quit),
            KeyCode::Tab => self.sidebar_open = true,
            KeyCode::Left => self.select_previous_head(),
            KeyCode::Right => self.select_next_head(),
            KeyCode::Char('l') => self.toggle_log_scale(),
            KeyCode::Char('c') => self.color_map = self.color_map.next(),
            KeyCode::Char('r') => return Some(Action::Reconnect),
            _ => {}
        }
        None
    }

    pub fn toggle_log_scale(&mut self) {
        self.options.log_scale = !self.options.log_scale;
    }

    pub fn select_next_head(&mut self) {
        let count = self.head_count();
        if count > 0 {
            self.selected_head = (self.selected_head + 1).min(count - 1);
        }
    }

    pub fn select_previous_head(&mut self) {
        let count = self.head_count();
        self.selected_head = self.selected_head.min(count.saturating_sub(1)).saturating_sub(1);
    }

    fn head_count(&self) -> usize {
        self.snapshot
            .attention
            .as_ref()
            .map(|a| a.head_count())
            .unwrap_or(0)
    }

    /// Validate the form; on success mark the job as submitting.
    pub fn begin_submit(&mut self) -> Option<Action> {
        if self.job == JobStatus::Submitting {
            return None;
        }
        match self.form.validate() {
            Ok(params) => {
                self.job = JobStatus::Submitting;
                Some(Action::Submit(params))
            }
            Err(errors) => {
                tracing::debug!(fields = errors.len(), "form has validation errors");
                None
            }
        }
    }

    /// Record the outcome of a submission.
    pub fn finish_submit(&mut self, result: Result<JobId, ClientError>) {
        match result {
            Ok(job_id) => {
                self.job = JobStatus::Started(job_id);
                self.sidebar_open = false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not start training");
                self.job = JobStatus::Failed(format!("Failed to start training: {e}"));
            }
        }
    }

    /// Swap in a fresh connection, discarding streamed state.
    pub fn reconnect(&mut self, connection: C) {
        self.ingest.reconnect(connection);
        self.snapshot = self.ingest.snapshot();
        self.selected_head = 0;
    }

    /// Release the connection.
    pub fn dispose(&mut self) {
        self.ingest.dispose();
        self.snapshot = self.ingest.snapshot();
    }
}
