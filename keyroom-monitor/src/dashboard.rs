//! Terminal dashboard for the room monitor

use crate::metrics::{LogEntry, LogLevel, Metrics, MonitorStatus};
use crate::simulation::{self, SimulationEvent};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use keyroom_core::latency::PeerSnapshot;
use parking_lot::RwLock;
use ratatui::{
    layout::{Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Scrollbar, ScrollbarOrientation, ScrollbarState, Table},
    Frame, Terminal,
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Redraw / input poll period
const FRAME_PERIOD: Duration = Duration::from_millis(100);

/// Log lines moved by PageUp / PageDown
const LOG_PAGE: usize = 10;

/// Footer key hints
const KEY_HINTS: &[(&str, &str)] = &[
    ("Q", "Quit"),
    ("↑↓/PgUp/PgDn", "Scroll"),
    ("F", "Filter"),
    ("S", "Sort peers"),
];

/// Which activity log entries are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFilter {
    All,
    Sync,
    Room,
    Warnings,
}

impl LogFilter {
    fn next(self) -> Self {
        match self {
            LogFilter::All => LogFilter::Sync,
            LogFilter::Sync => LogFilter::Room,
            LogFilter::Room => LogFilter::Warnings,
            LogFilter::Warnings => LogFilter::All,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogFilter::All => "all",
            LogFilter::Sync => "sync",
            LogFilter::Room => "room",
            LogFilter::Warnings => "warnings",
        }
    }

    fn matches(self, level: LogLevel) -> bool {
        match self {
            LogFilter::All => true,
            LogFilter::Sync => level == LogLevel::Latency,
            LogFilter::Room => level == LogLevel::Presence,
            LogFilter::Warnings => level == LogLevel::Warning,
        }
    }
}

/// Row order of the peer table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerOrder {
    ById,
    SlowestFirst,
}

impl PeerOrder {
    fn toggle(self) -> Self {
        match self {
            PeerOrder::ById => PeerOrder::SlowestFirst,
            PeerOrder::SlowestFirst => PeerOrder::ById,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PeerOrder::ById => "by id",
            PeerOrder::SlowestFirst => "slowest first",
        }
    }

    fn arrange<'a>(self, peers: &'a [PeerSnapshot]) -> Vec<&'a PeerSnapshot> {
        let mut rows: Vec<&PeerSnapshot> = peers.iter().collect();
        if self == PeerOrder::SlowestFirst {
            rows.sort_by(|a, b| b.average_ms.total_cmp(&a.average_ms));
        }
        rows
    }
}

/// View state driven by the keyboard and simulation events
struct DashboardState {
    /// Entries skipped from the newest end of the filtered log
    log_offset: usize,
    log_filter: LogFilter,
    peer_order: PeerOrder,
    /// Most recent room event, shown in the footer
    last_event: Option<String>,
}

impl DashboardState {
    fn new() -> Self {
        Self {
            log_offset: 0,
            log_filter: LogFilter::All,
            peer_order: PeerOrder::ById,
            last_event: None,
        }
    }

    fn following(&self) -> bool {
        self.log_offset == 0
    }

    fn on_simulation_event(&mut self, event: SimulationEvent) {
        self.last_event = Some(match event {
            SimulationEvent::Ready { local_peer } => format!("Playing as {}", local_peer),
            SimulationEvent::PeerJoined { peer_id } => format!("{} joined", peer_id),
            SimulationEvent::PeerLeft { peer_id } => format!("{} left", peer_id),
        });
    }

    fn scroll_back(&mut self, lines: usize, visible_logs: usize) {
        self.log_offset = (self.log_offset + lines).min(visible_logs.saturating_sub(1));
    }

    /// Apply a key press. Returns true when the dashboard should exit.
    fn on_key(&mut self, key: KeyEvent, visible_logs: usize) -> bool {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Up | KeyCode::Char('k') => self.scroll_back(1, visible_logs),
            KeyCode::PageUp => self.scroll_back(LOG_PAGE, visible_logs),
            KeyCode::Down | KeyCode::Char('j') => self.log_offset = self.log_offset.saturating_sub(1),
            KeyCode::PageDown => self.log_offset = self.log_offset.saturating_sub(LOG_PAGE),
            KeyCode::End => self.log_offset = 0,
            KeyCode::Char('f') => {
                self.log_filter = self.log_filter.next();
                self.log_offset = 0;
            }
            KeyCode::Char('s') => self.peer_order = self.peer_order.toggle(),
            _ => {}
        }
        false
    }
}

/// Run the dashboard
pub async fn run(metrics: Arc<RwLock<Metrics>>, players: usize) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(ratatui::backend::CrosstermBackend::new(stdout))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SimulationEvent>();
    let room_metrics = Arc::clone(&metrics);
    tokio::spawn(async move {
        if let Err(e) = simulation::run_with_dashboard(room_metrics, players, event_tx).await {
            eprintln!("Simulation error: {}", e);
        }
    });

    let mut state = DashboardState::new();
    loop {
        while let Ok(event) = event_rx.try_recv() {
            state.on_simulation_event(event);
        }

        terminal.draw(|f| draw(f, &metrics, &state))?;

        if !event::poll(FRAME_PERIOD)? {
            continue;
        }
        let Event::Key(key) = event::read()? else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let visible_logs = metrics
            .read()
            .logs
            .iter()
            .filter(|e| state.log_filter.matches(e.level))
            .count();
        if state.on_key(key, visible_logs) {
            break;
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn draw(f: &mut Frame, metrics: &Arc<RwLock<Metrics>>, state: &DashboardState) {
    let m = metrics.read();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(6),  // Stats
            Constraint::Length(11), // Peers
            Constraint::Min(6),     // Logs
            Constraint::Length(1),  // Footer
        ])
        .split(f.area());

    draw_header(f, chunks[0], &m);
    draw_stats(f, chunks[1], &m);
    draw_peers(f, chunks[2], &m, state.peer_order);
    draw_logs(f, chunks[3], &m, state);
    draw_footer(f, chunks[4], state);
}

fn draw_header(f: &mut Frame, area: Rect, m: &Metrics) {
    let (status_text, status_style) = match m.status {
        MonitorStatus::Starting => ("STARTING", Style::default().fg(Color::Yellow)),
        MonitorStatus::Running => ("RUNNING", Style::default().fg(Color::Green)),
    };

    let title = Line::from(vec![
        Span::styled("Keyroom Latency Monitor", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  │  Status: "),
        Span::styled(status_text, status_style),
        Span::raw("  │  Uptime: "),
        Span::styled(m.uptime(), Style::default().fg(Color::Cyan)),
    ]);

    let header = Paragraph::new(title)
        .block(Block::default().borders(Borders::ALL).title(" Dashboard "));

    f.render_widget(header, area);
}

fn draw_stats(f: &mut Frame, area: Rect, m: &Metrics) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let baseline = m.snapshot.as_ref().map(|s| s.baseline_ms).unwrap_or(0.0);
    let sync_info = vec![
        Line::from(vec![
            Span::raw("Baseline: "),
            Span::styled(
                format!("{:.1} ms", baseline),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("Peak: "),
            Span::styled(format!("{:.1} ms", m.peak_baseline_ms), Style::default().fg(Color::Magenta)),
        ]),
        Line::from(vec![
            Span::raw("Samples: "),
            Span::styled(m.samples_taken.to_string(), Style::default().fg(Color::White)),
            Span::raw("  Joins/leaves: "),
            Span::styled(m.presence_changes.to_string(), Style::default().fg(Color::White)),
        ]),
    ];
    let title = format!(" Sync ({}) ", m.local_peer.as_deref().unwrap_or("..."));
    f.render_widget(
        Paragraph::new(sync_info).block(Block::default().borders(Borders::ALL).title(title)),
        chunks[0],
    );

    let c = &m.config;
    let config_info = vec![
        Line::from(vec![
            Span::raw("Cutoffs: "),
            Span::styled(
                format!("{:.0} / {:.0} ms", c.min_latency_cutoff_ms, c.max_latency_cutoff_ms),
                Style::default().fg(Color::Yellow),
            ),
        ]),
        Line::from(vec![
            Span::raw("Tick: "),
            Span::styled(format!("{:?}", c.tick_interval()), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Window: "),
            Span::styled(
                format!("{} samples ({}s)", c.window_capacity(), c.smoothing_window_seconds),
                Style::default().fg(Color::Cyan),
            ),
        ]),
    ];
    f.render_widget(
        Paragraph::new(config_info).block(Block::default().borders(Borders::ALL).title(" Config ")),
        chunks[1],
    );
}

fn peer_row(peer: &PeerSnapshot) -> Row<'static> {
    let (state_text, state_color) = if peer.excluded {
        ("outlier", Color::Red)
    } else if peer.sample_count == 0 {
        ("waiting", Color::Yellow)
    } else {
        ("ok", Color::Green)
    };

    Row::new(vec![
        Cell::from(peer.peer_id.clone()),
        Cell::from(format!("{:.1}", peer.average_ms)),
        Cell::from(format!("{:.1}", peer.delay_ms)),
        Cell::from(peer.sample_count.to_string()),
        Cell::from(if peer.awaiting_pong { "yes" } else { "" }),
        Cell::from(Span::styled(state_text, Style::default().fg(state_color))),
    ])
}

fn draw_peers(f: &mut Frame, area: Rect, m: &Metrics, order: PeerOrder) {
    let rows: Vec<Row> = m
        .snapshot
        .as_ref()
        .map(|s| order.arrange(&s.peers).into_iter().map(peer_row).collect())
        .unwrap_or_default();

    let header = Row::new(vec!["Peer", "Avg ms", "Delay ms", "Samples", "In flight", "State"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(10),
            Constraint::Min(8),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Peers ({}) ", order.label())),
    );

    f.render_widget(table, area);
}

fn level_color(level: LogLevel) -> Color {
    match level {
        LogLevel::Info => Color::Blue,
        LogLevel::Warning => Color::Yellow,
        LogLevel::Presence => Color::Green,
        LogLevel::Latency => Color::Magenta,
    }
}

fn log_line(entry: &LogEntry) -> Line<'_> {
    Line::from(vec![
        Span::styled(
            entry.timestamp.format("%H:%M:%S ").to_string(),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            format!("{:<4} ", entry.level.as_str()),
            Style::default().fg(level_color(entry.level)),
        ),
        Span::raw(entry.message.as_str()),
    ])
}

fn draw_logs(f: &mut Frame, area: Rect, m: &Metrics, state: &DashboardState) {
    let height = area.height.saturating_sub(2) as usize;
    let entries: Vec<&LogEntry> = m
        .logs
        .iter()
        .filter(|e| state.log_filter.matches(e.level))
        .collect();

    // Oldest visible line first, newest at the bottom
    let end = entries.len().saturating_sub(state.log_offset);
    let start = end.saturating_sub(height);
    let lines: Vec<Line> = entries[start..end].iter().map(|e| log_line(e)).collect();

    let position = if state.following() {
        "live".to_string()
    } else {
        format!("{} back", state.log_offset)
    };
    let title = format!(" Activity ({}, {}) ", state.log_filter.label(), position);
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );

    if entries.len() > height {
        let mut scrollbar_state = ScrollbarState::new(entries.len().saturating_sub(height)).position(start);
        f.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area.inner(Margin { vertical: 1, horizontal: 0 }),
            &mut scrollbar_state,
        );
    }
}

fn draw_footer(f: &mut Frame, area: Rect, state: &DashboardState) {
    let key_style = Style::default().fg(Color::Black).bg(Color::White);
    let mut spans: Vec<Span> = KEY_HINTS
        .iter()
        .flat_map(|(key, label)| [Span::styled(format!(" {} ", key), key_style), Span::raw(format!(" {}  ", label))])
        .collect();

    if let Some(last) = &state.last_event {
        spans.push(Span::raw("│  "));
        spans.push(Span::styled(last.clone(), Style::default().fg(Color::DarkGray)));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
