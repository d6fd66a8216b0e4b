use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::app::{Outcome, Progress, ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::KiraError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Progress,
    Logs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Parse,
    Resolve,
    Store,
    Fetch,
    Convert,
    Done,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Parse => "Parse",
            Phase::Resolve => "Resolve",
            Phase::Store => "Store",
            Phase::Fetch => "Fetch",
            Phase::Convert => "Convert",
            Phase::Done => "Done",
        }
    }

    const ALL: [Phase; 6] = [
        Phase::Parse,
        Phase::Resolve,
        Phase::Store,
        Phase::Fetch,
        Phase::Convert,
        Phase::Done,
    ];
}

#[derive(Debug, Default)]
struct Counters {
    found: usize,
    not_found: usize,
    failed: usize,
    flushes: usize,
}

impl Counters {
    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Found => self.found += 1,
            Outcome::NotFound => self.not_found += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Flushed => self.flushes += 1,
        }
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    progress: Option<Progress>,
    counters: Counters,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    started: Instant,
    finished: bool,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
    cancel: Arc<AtomicBool>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
    cancel: Arc<AtomicBool>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some(progress) = event.progress {
                state.progress = Some(progress);
            }
            if let Some(outcome) = event.outcome {
                state.counters.count(outcome);
            }
            match parse_phase(&message) {
                Some((phase, payload)) => {
                    state.phase = phase;
                    state.status = payload.to_string();
                }
                None => state.status = message.clone(),
            }
            push_event(&mut state.events, message.clone());
            push_log(&mut state.logs, format!("[{}] {message}", timestamp()));
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "starting".to_string(),
                phase: initial_phase(kind),
                progress: None,
                counters: Counters::default(),
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Progress,
                started: Instant::now(),
                finished: false,
            })),
            cancel: Arc::new(AtomicBool::new(false)),
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q` or Ctrl-C
    /// asks the job to stop; the screen stays up until it has flushed and
    /// returned, so the output file is never cut mid-write.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, KiraError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = self.sink();
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick))
                    .into_diagnostic()?;
            }

            match rx.try_recv() {
                Ok(result) => {
                    if let Ok(mut state) = self.state.lock() {
                        state.finished = true;
                    }
                    restore_terminal()?;
                    handle.join().ok();
                    return result.map_err(miette::Report::new);
                }
                Err(TryRecvError::Disconnected) => {
                    restore_terminal()?;
                    handle.join().ok();
                    return Err(miette::Report::msg("job thread exited without a result"));
                }
                Err(TryRecvError::Empty) => {}
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && self.handle_key(key)
            {
                self.request_stop();
            }

            tick = tick.wrapping_add(1);
        }
    }

    fn sink(&self) -> TuiProgress {
        TuiProgress {
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn request_stop(&self) {
        if self.cancel.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.status = "stopping after the current batch".to_string();
            push_log(&mut state.logs, format!("[{}] stop requested", timestamp()));
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => true,
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::Char('l') | KeyCode::F(4) => {
                if let Ok(mut state) = self.state.lock() {
                    state.view = match state.view {
                        View::Progress => View::Logs,
                        View::Logs => View::Progress,
                    };
                }
                false
            }
            KeyCode::Up => {
                self.log_scroll = self.log_scroll.saturating_sub(1);
                false
            }
            KeyCode::Down => {
                self.log_scroll = self.log_scroll.saturating_add(1);
                false
            }
            _ => false,
        }
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    let mut stdout = io::stdout();
    stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tui.kind, tick), chunks[0]);
    frame.render_widget(draw_gauge(state), chunks[1]);
    match state.view {
        View::Progress => {
            let main = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[2]);
            frame.render_widget(draw_events_panel(state), main[0]);
            frame.render_widget(draw_counters_panel(state, tui.kind), main[1]);
        }
        View::Logs => frame.render_widget(draw_logs_view(state, tui.log_scroll), chunks[2]),
    }
    let footer = Paragraph::new(Line::from(Span::styled(
        "q stop   l logs   up/down scroll",
        Style::default().fg(Color::DarkGray),
    )));
    frame.render_widget(footer, chunks[3]);
}

fn draw_header(state: &AppState, kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Resolve => "Resolve",
        ProgressSinkKind::Download => "Download",
        ProgressSinkKind::Convert => "Convert",
    };
    let elapsed = state.started.elapsed().as_secs();
    let header_line = Line::from(vec![
        Span::styled(
            "KIRA-SR",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw(format!("   Elapsed: {:02}:{:02}   ", elapsed / 60, elapsed % 60)),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let mut phases = vec![Span::styled("Phase: ", Style::default().fg(Color::Gray))];
    for phase in Phase::ALL {
        let style = if phase == state.phase {
            Style::default()
                .fg(if state.finished { Color::Green } else { Color::Cyan })
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        phases.push(Span::styled(phase.label(), style));
        phases.push(Span::raw(" "));
    }
    Paragraph::new(vec![header_line, Line::from(phases)])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_gauge(state: &AppState) -> Gauge<'static> {
    let (ratio, label) = match state.progress {
        Some(Progress { completed, total }) if total > 0 => (
            (completed as f64 / total as f64).clamp(0.0, 1.0),
            format!("{completed}/{total}"),
        ),
        Some(_) => (1.0, "0/0".to_string()),
        None => (0.0, "--".to_string()),
    };
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(label)
}

fn draw_events_panel(state: &AppState) -> Paragraph<'static> {
    let mut lines = vec![
        Line::from(Span::styled(
            "STATUS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(state.status.clone()),
        Line::from(Span::styled(
            "Recent events:",
            Style::default().fg(Color::Gray),
        )),
    ];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_counters_panel(state: &AppState, kind: ProgressSinkKind) -> Paragraph<'static> {
    let counters = &state.counters;
    let mut lines = vec![Line::from(Span::styled(
        "COUNTERS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    let rows: Vec<(&str, usize, Color)> = match kind {
        ProgressSinkKind::Resolve => vec![
            ("Found: ", counters.found, Color::Green),
            ("No runs: ", counters.not_found, Color::Yellow),
            ("Failed: ", counters.failed, Color::Red),
            ("Flushes: ", counters.flushes, Color::Gray),
        ],
        ProgressSinkKind::Download => vec![
            ("Downloaded: ", counters.found, Color::Green),
            ("Failed: ", counters.failed, Color::Red),
        ],
        ProgressSinkKind::Convert => Vec::new(),
    };
    for (label, value, color) in rows {
        lines.push(Line::from(vec![
            Span::styled(label, Style::default().fg(Color::Gray)),
            Span::styled(value.to_string(), Style::default().fg(color)),
        ]));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &AppState, scroll: u16) -> Paragraph<'static> {
    let lines = state
        .logs
        .iter()
        .map(|line| Line::from(line.clone()))
        .collect::<Vec<_>>();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Logs"))
        .scroll((scroll, 0))
        .wrap(Wrap { trim: false })
}

fn initial_phase(kind: ProgressSinkKind) -> Phase {
    match kind {
        ProgressSinkKind::Resolve => Phase::Parse,
        ProgressSinkKind::Download => Phase::Fetch,
        ProgressSinkKind::Convert => Phase::Convert,
    }
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    let phase = Phase::ALL
        .into_iter()
        .find(|phase| phase.label() == label.trim())?;
    Some((phase, payload.trim()))
}

fn push_event(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > EVENTS_MAX {
        buffer.pop_front();
    }
}

fn push_log(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > LOGS_MAX {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
