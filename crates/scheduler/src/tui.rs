//! A minimal full-screen TUI renderer: a task list plus a scrolling log
//! pane, scaled down from the teacher's richer DAG + multi-pane view to
//! the one view this crate needs.

use std::collections::BTreeMap;
use std::io::Stdout;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::Terminal;

use crate::renderer::{RenderEvent, Renderer, TaskOutcome};

const MAX_LOG_LINES: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Pending,
    Running,
    Cached,
    Succeeded,
    Failed,
}

struct TuiState {
    order: Vec<String>,
    status: BTreeMap<String, TaskStatus>,
    log: Vec<String>,
    start: Instant,
    done: bool,
}

impl TuiState {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            status: BTreeMap::new(),
            log: Vec::new(),
            start: Instant::now(),
            done: false,
        }
    }

    fn push_log(&mut self, line: String) {
        self.log.push(line);
        if self.log.len() > MAX_LOG_LINES {
            let excess = self.log.len() - MAX_LOG_LINES;
            self.log.drain(0..excess);
        }
    }
}

/// Full-screen TUI renderer (ratatui + crossterm). Event handling only
/// mutates shared state; call [`TuiRenderer::run`] on a dedicated thread
/// to actually draw and poll for a quit keypress.
pub struct TuiRenderer {
    state: Mutex<TuiState>,
}

impl Default for TuiRenderer {
    fn default() -> Self {
        Self {
            state: Mutex::new(TuiState::new()),
        }
    }
}

impl Renderer for TuiRenderer {
    fn on_event(&self, event: RenderEvent) {
        let mut state = self.state.lock().expect("tui state mutex poisoned");
        match event {
            RenderEvent::Plan { tasks } => {
                state.order = tasks.clone();
                for name in tasks {
                    state.status.insert(name, TaskStatus::Pending);
                }
            }
            RenderEvent::TaskStart { name, command } => {
                state.status.insert(name.clone(), TaskStatus::Running);
                state.push_log(format!("> [{name}] {command}"));
            }
            RenderEvent::TaskLog { name, chunk } => {
                for line in chunk.lines() {
                    state.push_log(format!("[{name}] {line}"));
                }
            }
            RenderEvent::TaskComplete { name, outcome } => {
                let status = match &outcome {
                    TaskOutcome::Cached => TaskStatus::Cached,
                    TaskOutcome::Succeeded { .. } => TaskStatus::Succeeded,
                    TaskOutcome::Failed { .. } | TaskOutcome::SkippedFailed { .. } => TaskStatus::Failed,
                };
                state.status.insert(name.clone(), status);
                if state.status.values().all(|s| *s != TaskStatus::Pending && *s != TaskStatus::Running) {
                    state.done = true;
                }
            }
        }
    }
}

impl TuiRenderer {
    /// Draws the full-screen view, polling for `q`/Ctrl-C to exit early,
    /// and returns once every task has reached a terminal status or the
    /// user quits.
    ///
    /// # Errors
    ///
    /// Returns a terminal I/O error if raw-mode setup, drawing, or
    /// teardown fails.
    pub fn run(&self) -> std::io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(&self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> std::io::Result<()> {
        loop {
            terminal.draw(|frame| self.draw(frame))?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if matches!(key.code, KeyCode::Char('q')) {
                        return Ok(());
                    }
                }
            }

            if self.state.lock().expect("tui state mutex poisoned").done {
                return Ok(());
            }
        }
    }

    fn draw(&self, frame: &mut ratatui::Frame) {
        let state = self.state.lock().expect("tui state mutex poisoned");
        let layout = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
            .split(frame.area());

        let items: Vec<ListItem> = state
            .order
            .iter()
            .map(|name| {
                let status = state.status.get(name).copied().unwrap_or(TaskStatus::Pending);
                let (symbol, color) = match status {
                    TaskStatus::Pending => ("\u{00b7}", Color::DarkGray),
                    TaskStatus::Running => ("\u{25b6}", Color::Yellow),
                    TaskStatus::Cached => ("~", Color::Cyan),
                    TaskStatus::Succeeded => ("\u{2713}", Color::Green),
                    TaskStatus::Failed => ("\u{2717}", Color::Red),
                };
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{symbol} "), Style::default().fg(color)),
                    Span::raw(name.clone()),
                ]))
            })
            .collect();
        let tasks = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" tasks ({}s) ", state.start.elapsed().as_secs())),
        );
        frame.render_widget(tasks, layout[0]);

        let log_text: Vec<Line> = state.log.iter().map(|line| Line::from(line.as_str())).collect();
        let visible_rows = layout[1].height.saturating_sub(2) as usize;
        let start = log_text.len().saturating_sub(visible_rows);
        let log = Paragraph::new(log_text[start..].to_vec())
            .block(Block::default().borders(Borders::ALL).title(" log "))
            .style(Style::default().add_modifier(Modifier::empty()));
        frame.render_widget(log, layout[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_transition_task_status() {
        let renderer = TuiRenderer::default();
        renderer.on_event(RenderEvent::Plan {
            tasks: vec!["a".to_string()],
        });
        renderer.on_event(RenderEvent::TaskStart {
            name: "a".to_string(),
            command: "echo hi".to_string(),
        });
        {
            let state = renderer.state.lock().unwrap();
            assert_eq!(state.status.get("a"), Some(&TaskStatus::Running));
        }
        renderer.on_event(RenderEvent::TaskComplete {
            name: "a".to_string(),
            outcome: TaskOutcome::Succeeded { duration_ms: 1 },
        });
        let state = renderer.state.lock().unwrap();
        assert_eq!(state.status.get("a"), Some(&TaskStatus::Succeeded));
        assert!(state.done);
    }
}
