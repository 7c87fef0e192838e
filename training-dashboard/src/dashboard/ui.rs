//! Terminal drawing and the event loops.
//!
//! [`run`] drives the full TUI; [`run_plain`] prints updates line by line
//! for logs and pipes.

use std::io::{self, Stdout, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, Paragraph, Wrap},
    Frame, Terminal,
};

use super::{Action, Dashboard, JobStatus};
use crate::attention_viz::{render, ColorMap, HeatmapGrid, RenderOptions, VizError};
use crate::client::{ClientError, JobId, TrainingClient};
use crate::config::DashboardConfig;
use crate::error::DashboardResult;
use crate::form::Field;
use crate::stream::{Connection, ConnectionState, IngestSnapshot, StreamIngest, WsConnection};

/// High contrast color palette.
pub mod colors {
    use ratatui::style::Color;

    pub const LOSS_LINE: Color = Color::Rgb(0, 255, 255);
    pub const STREAMING: Color = Color::Rgb(0, 255, 0);
    pub const CONNECTING: Color = Color::Rgb(255, 200, 0);
    pub const CLOSED: Color = Color::Rgb(255, 80, 80);
    pub const BORDER: Color = Color::Rgb(80, 80, 120);
    pub const HELP_KEY: Color = Color::Rgb(255, 200, 0);
    pub const FOCUS_BG: Color = Color::Rgb(50, 50, 80);
    pub const ERROR: Color = Color::Rgb(255, 80, 80);
}

/// RAII guard to ensure terminal state is restored even on panic.
struct TerminalCleanup;

impl Drop for TerminalCleanup {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), LeaveAlternateScreen);
    }
}

/// Run the interactive dashboard until the user quits.
pub fn run(config: DashboardConfig) -> DashboardResult<()> {
    config.validate()?;
    let client = TrainingClient::new(&config.api_base);
    let connection = WsConnection::connect(&config.ws_url)?;
    let mut dashboard = Dashboard::new(StreamIngest::new(connection), &config);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let _cleanup = TerminalCleanup;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = main_loop(&mut terminal, &mut dashboard, &client, &config);
    dashboard.dispose();
    result
}

fn main_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    dashboard: &mut Dashboard<WsConnection>,
    client: &TrainingClient,
    config: &DashboardConfig,
) -> DashboardResult<()> {
    let mut pending: Option<Receiver<Result<JobId, ClientError>>> = None;

    loop {
        // Half the interval waits on the socket, the other half on keys
        let interval = config.refresh_interval();
        dashboard.tick(interval / 2);

        if let Some(rx) = pending.as_ref() {
            match rx.try_recv() {
                Ok(result) => {
                    dashboard.finish_submit(result);
                    pending = None;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    dashboard.finish_submit(Err(ClientError::Aborted));
                    pending = None;
                }
            }
        }

        terminal.draw(|f| draw(f, dashboard))?;

        if !event::poll(interval / 2)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        match dashboard.handle_key(key) {
            Some(Action::Quit) => return Ok(()),
            Some(Action::Submit(params)) => {
                let (tx, rx) = mpsc::channel();
                let client = client.clone();
                thread::Builder::new()
                    .name("job-submit".to_string())
                    .spawn(move || {
                        let _ = tx.send(client.submit(&params));
                    })?;
                pending = Some(rx);
            }
            Some(Action::Reconnect) => {
                let connection = WsConnection::connect(&config.ws_url)?;
                dashboard.reconnect(connection);
            }
            None => {}
        }
    }
}

/// Print updates as text lines until the stream closes.
pub fn run_plain(config: DashboardConfig) -> DashboardResult<()> {
    config.validate()?;
    let connection = WsConnection::connect(&config.ws_url)?;
    let mut ingest = StreamIngest::new(connection);
    let updates = ingest.subscribe();
    let mut stdout = io::stdout().lock();
    let options = RenderOptions::default()
        .with_max_dim(config.max_heatmap_dim)
        .with_log_scale(config.log_scale);

    writeln!(stdout, "connecting to {}", config.ws_url)?;
    while ingest.state() != ConnectionState::Closed {
        ingest.pump(config.refresh_interval());
        for snapshot in updates.try_iter() {
            write_plain_update(&mut stdout, &snapshot, options)?;
        }
    }
    writeln!(stdout, "stream closed")?;
    Ok(())
}

fn write_plain_update(
    out: &mut impl Write,
    snapshot: &IngestSnapshot,
    options: RenderOptions,
) -> io::Result<()> {
    if let Some(point) = snapshot.latest() {
        writeln!(
            out,
            "[{}] step={} loss={:.6} points={}",
            snapshot.state.label(),
            point.step,
            point.loss,
            snapshot.loss.len()
        )?;
    }
    if let Some(attention) = snapshot.attention.as_ref() {
        if let Ok(grid) = render(attention, 0, options) {
            write!(out, "{}", grid.render_ascii(ColorMap::default()))?;
        }
    }
    Ok(())
}

/// Draw the whole dashboard into `f`.
pub fn draw<C: Connection>(f: &mut Frame, dashboard: &Dashboard<C>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Footer
        ])
        .split(f.area());

    draw_header(f, chunks[0], dashboard);

    let main = if dashboard.sidebar_open() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(36), Constraint::Min(40)])
            .split(chunks[1]);
        draw_sidebar(f, cols[0], dashboard);
        cols[1]
    } else {
        chunks[1]
    };

    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(main);
    draw_loss_chart(f, panels[0], dashboard.snapshot());
    draw_heatmap(f, panels[1], dashboard);

    draw_footer(f, chunks[2], dashboard.sidebar_open());
}

fn draw_header<C: Connection>(f: &mut Frame, area: Rect, dashboard: &Dashboard<C>) {
    let snapshot = dashboard.snapshot();
    let (step, loss) = match snapshot.latest() {
        Some(p) => (format!("{}", p.step), format!("{:.4}", p.loss)),
        None => ("—".to_string(), "—".to_string()),
    };
    let state_color = match snapshot.state {
        ConnectionState::Connecting => colors::CONNECTING,
        ConnectionState::Streaming => colors::STREAMING,
        ConnectionState::Closed => colors::CLOSED,
    };

    let mut spans = vec![
        Span::styled(
            " TRAINING DASHBOARD ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw("STEP: "),
        Span::styled(step, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  LOSS: "),
        Span::styled(loss, Style::default().fg(colors::LOSS_LINE).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(snapshot.state.label(), Style::default().fg(state_color)),
        Span::raw(format!(
            " ({} frames, {} rejected)",
            snapshot.stats.frames, snapshot.stats.rejected
        )),
    ];
    if let JobStatus::Started(job_id) = dashboard.job() {
        spans.push(Span::raw(" | job "));
        spans.push(Span::styled(job_id.to_string(), Style::default().fg(Color::Green)));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(colors::BORDER))
            .title(format!(" {} ", dashboard.ws_url())),
    );
    f.render_widget(header, area);
}

fn draw_sidebar<C: Connection>(f: &mut Frame, area: Rect, dashboard: &Dashboard<C>) {
    let form = dashboard.form();
    let mut lines = Vec::new();

    for field in Field::all() {
        let focused = form.focus() == *field;
        let style = if focused {
            Style::default()
                .fg(Color::White)
                .bg(colors::FOCUS_BG)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(
            format!("{:<15}", field.label()),
            Style::default().fg(Color::Gray),
        )));
        let cursor = if focused { "_" } else { "" };
        lines.push(Line::from(Span::styled(
            format!(" {}{}", form.value(*field), cursor),
            style,
        )));
        if let Some(err) = form.errors().get(field) {
            lines.push(Line::from(Span::styled(
                format!(" {}", err),
                Style::default().fg(colors::ERROR),
            )));
        }
    }

    lines.push(Line::from(""));
    lines.push(match dashboard.job() {
        JobStatus::Idle => Line::from(Span::styled(
            "[Enter] Start Training",
            Style::default().fg(colors::HELP_KEY),
        )),
        JobStatus::Submitting => Line::from(Span::styled(
            "Submitting...",
            Style::default().fg(colors::CONNECTING),
        )),
        JobStatus::Started(id) => Line::from(Span::styled(
            format!("Training started: {}", id),
            Style::default().fg(colors::STREAMING),
        )),
        JobStatus::Failed(msg) => Line::from(Span::styled(
            msg.clone(),
            Style::default().fg(colors::ERROR),
        )),
    });

    let sidebar = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(colors::BORDER))
                .title(" Training Parameters "),
        );
    f.render_widget(sidebar, area);
}

fn draw_loss_chart(f: &mut Frame, area: Rect, snapshot: &IngestSnapshot) {
    let (Some((min_loss, max_loss)), Some((min_step, max_step))) =
        (snapshot.loss.loss_bounds(), snapshot.loss.step_bounds())
    else {
        let msg = Paragraph::new("Waiting for data...")
            .block(Block::default().borders(Borders::ALL).title(" Step x Loss "));
        f.render_widget(msg, area);
        return;
    };

    let y_margin = ((max_loss - min_loss) * 0.1).max(1e-3);
    // keep the axis at zero for ordinary losses, but never cut off negatives
    let y_min = if min_loss >= 0.0 {
        (min_loss - y_margin).max(0.0)
    } else {
        min_loss - y_margin
    };
    let y_max = max_loss + y_margin;
    let x_max = if max_step > min_step { max_step } else { min_step + 1.0 };

    let data = snapshot.loss.chart_data();
    let datasets = vec![Dataset::default()
        .name("loss")
        .marker(symbols::Marker::Braille)
        .style(Style::default().fg(colors::LOSS_LINE))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(" Step x Loss "))
        .x_axis(
            Axis::default()
                .title("Step")
                .style(Style::default().fg(Color::Gray))
                .bounds([min_step, x_max])
                .labels::<Vec<Line>>(vec![
                    format!("{}", min_step).into(),
                    format!("{}", x_max).into(),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("Loss")
                .style(Style::default().fg(Color::Gray))
                .bounds([y_min, y_max])
                .labels::<Vec<Line>>(vec![
                    format!("{:.2}", y_min).into(),
                    format!("{:.2}", (y_min + y_max) / 2.0).into(),
                    format!("{:.2}", y_max).into(),
                ]),
        );

    f.render_widget(chart, area);
}

fn draw_heatmap<C: Connection>(f: &mut Frame, area: Rect, dashboard: &Dashboard<C>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Attention weights (heatmap) ");
    let snapshot = dashboard.snapshot();

    let message = if snapshot.is_loading() {
        "Waiting for training to start... (loading)"
    } else {
        match dashboard.heatmap() {
            None | Some(Err(VizError::NoData)) => "Waiting for attention_weights...",
            Some(Ok(grid)) => {
                let title = format!(
                    " Attention | Head {}/{}{}{} ",
                    grid.head_index + 1,
                    grid.head_count,
                    if dashboard.options().log_scale { " | log10" } else { "" },
                    if grid.is_downsampled() {
                        format!(" | stride {}x{}", grid.row_stride, grid.col_stride)
                    } else {
                        String::new()
                    }
                );
                let body = Paragraph::new(heatmap_lines(&grid, dashboard.color_map(), area))
                    .block(Block::default().borders(Borders::ALL).title(title));
                f.render_widget(body, area);
                return;
            }
        }
    };

    let msg = Paragraph::new(message)
        .alignment(Alignment::Center)
        .block(block);
    f.render_widget(msg, area);
}

/// Legend line, then one styled cell per grid value (two columns wide when
/// space allows).
fn heatmap_lines(grid: &HeatmapGrid, color_map: ColorMap, area: Rect) -> Vec<Line<'static>> {
    let inner_width = area.width.saturating_sub(2) as usize;
    let cell_width = if grid.num_cols() * 2 <= inner_width { 2 } else { 1 };

    let legend = Line::from(Span::styled(
        format!(
            "{:.2} .. {:.2}  ({}x{} of {}x{}, {})",
            grid.value_range.0,
            grid.value_range.1,
            grid.num_rows(),
            grid.num_cols(),
            grid.source_rows,
            grid.source_cols,
            color_map.name()
        ),
        Style::default().fg(Color::Gray),
    ));

    std::iter::once(legend)
        .chain(grid.grid.iter().map(|row| {
            Line::from(
                row.iter()
                    .map(|&v| {
                        let (r, g, b) = color_map.get_color(grid.scaled(v));
                        Span::styled(
                            " ".repeat(cell_width),
                            Style::default().bg(Color::Rgb(r, g, b)),
                        )
                    })
                    .collect::<Vec<_>>(),
            )
        }))
        .collect()
}

fn draw_footer(f: &mut Frame, area: Rect, sidebar_open: bool) {
    let keys: &[(&str, &str)] = if sidebar_open {
        &[
            ("Up/Down", " Field | "),
            ("Enter", " Start | "),
            ("Tab/Esc", " Close sidebar"),
        ]
    } else {
        &[
            ("q", " Quit | "),
            ("Tab", " Parameters | "),
            ("Left/Right", " Head | "),
            ("l", " Log scale | "),
            ("c", " Colors | "),
            ("r", " Reconnect"),
        ]
    };

    let spans: Vec<Span> = keys
        .iter()
        .flat_map(|(key, label)| {
            [
                Span::styled(format!(" {}", key), Style::default().fg(colors::HELP_KEY)),
                Span::raw(*label),
            ]
        })
        .collect();

    let footer = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}
