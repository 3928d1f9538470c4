//! TUI for a batch run with progress display

use crate::proxy::{BatchReport, BatchRunner, ProgressEvent, VerdictRecord};
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum number of recent verdicts to keep per list
const MAX_RECENT_VERDICTS: usize = 100;

/// Which list has focus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Valid,
    Invalid,
}

/// Proxy checker TUI application state
pub struct ProxyCheckerApp {
    /// Raw proxies, in sheet order
    proxies: Vec<String>,
    runner: BatchRunner,
    total: usize,
    checked: usize,
    valid_count: usize,
    invalid_count: usize,
    /// Proxy currently being probed
    current: Option<String>,
    recent_valid: VecDeque<VerdictRecord>,
    recent_invalid: VecDeque<VerdictRecord>,
    selected: Pane,
    list_state: ListState,
    status_message: String,
    is_complete: bool,
    cancel: CancellationToken,
    should_quit: bool,
}

impl ProxyCheckerApp {
    pub fn new(proxies: Vec<String>, runner: BatchRunner) -> Self {
        let total = proxies.len();
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            proxies,
            runner,
            total,
            checked: 0,
            valid_count: 0,
            invalid_count: 0,
            current: None,
            recent_valid: VecDeque::new(),
            recent_invalid: VecDeque::new(),
            selected: Pane::Valid,
            list_state,
            status_message: "Starting proxy check... Press 'q' to stop.".to_string(),
            is_complete: false,
            cancel: CancellationToken::new(),
            should_quit: false,
        }
    }

    /// Run the batch behind the TUI and return its report once the user leaves
    ///
    /// Leaving early cancels the batch; the report then has `cancelled` set.
    pub async fn run(&mut self) -> Result<BatchReport> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<BatchReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = self.runner.clone();
        let proxies = self.proxies.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut tx = tx;
            runner.run(&proxies, &mut tx, &cancel).await
        });

        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                    }
                }
            }

            self.drain(&mut rx);

            if self.should_quit && self.is_complete {
                break;
            }
        }

        Ok(handle.await?)
    }

    /// Apply every pending progress event; marks completion once the runner
    /// has dropped its sender
    fn drain(&mut self, rx: &mut UnboundedReceiver<ProgressEvent>) {
        loop {
            match rx.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finish();
                    break;
                }
            }
        }
    }

    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { index, total, proxy } => {
                self.status_message = format!("Checking [{}/{}] {}", index + 1, total, proxy);
                self.current = Some(proxy);
            }
            ProgressEvent::Finished { verdict, .. } => {
                self.checked += 1;
                self.current = None;

                let list = if verdict.is_valid {
                    self.valid_count += 1;
                    &mut self.recent_valid
                } else {
                    self.invalid_count += 1;
                    &mut self.recent_invalid
                };
                list.push_back(verdict);
                if list.len() > MAX_RECENT_VERDICTS {
                    list.pop_front();
                }

                if !self.cancel.is_cancelled() {
                    let percentage = self.progress();
                    self.status_message = format!(
                        "Checking... {}% ({}/{}) | Valid: {} | Invalid: {}",
                        percentage, self.checked, self.total, self.valid_count, self.invalid_count
                    );
                }
            }
        }
    }

    fn finish(&mut self) {
        if self.is_complete {
            return;
        }
        self.is_complete = true;
        self.current = None;
        self.status_message = if self.checked < self.total {
            format!(
                "Stopped after {}/{} | Valid: {} | Invalid: {} | Results not saved",
                self.checked, self.total, self.valid_count, self.invalid_count
            )
        } else {
            format!(
                "Complete! Checked: {} | Valid: {} | Invalid: {} | Press 'q' to save and quit",
                self.total, self.valid_count, self.invalid_count
            )
        };
    }

    fn progress(&self) -> u16 {
        if self.total > 0 {
            (self.checked as f64 / self.total as f64 * 100.0) as u16
        } else {
            0
        }
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                if !self.is_complete {
                    self.cancel.cancel();
                    self.status_message =
                        "Stopping after the current proxy...".to_string();
                }
            }
            KeyCode::Tab => {
                self.selected = match self.selected {
                    Pane::Valid => Pane::Invalid,
                    Pane::Invalid => Pane::Valid,
                };
                self.list_state.select(Some(0));
            }
            KeyCode::Down => {
                let len = self.selected_list().len();
                let i = match self.list_state.selected() {
                    Some(i) if i + 1 < len => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let len = self.selected_list().len();
                let i = match self.list_state.selected() {
                    Some(0) | None => len.saturating_sub(1),
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn selected_list(&self) -> &VecDeque<VerdictRecord> {
        match self.selected {
            Pane::Valid => &self.recent_valid,
            Pane::Invalid => &self.recent_invalid,
        }
    }

    /// Verdict under the cursor; lists are drawn newest first
    fn selected_verdict(&self) -> Option<&VerdictRecord> {
        let index = self.list_state.selected()?;
        self.selected_list().iter().rev().nth(index)
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Verdict lists
                Constraint::Length(5), // Detail
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new("Proxy Sentinel")
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let progress = self.progress();
        let progress_label = match &self.current {
            Some(proxy) => format!("{}/{} ({}%) - {}", self.checked, self.total, progress, proxy),
            None => format!("{}/{} ({}%)", self.checked, self.total, progress),
        };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(progress.min(100))
            .label(progress_label);
        f.render_widget(gauge, chunks[1]);

        let list_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[2]);

        Self::render_verdict_list(
            f,
            list_chunks[0],
            "Valid",
            &self.recent_valid,
            self.valid_count,
            self.selected == Pane::Valid,
            Color::Green,
            if self.selected == Pane::Valid { Some(&mut self.list_state) } else { None },
        );

        Self::render_verdict_list(
            f,
            list_chunks[1],
            "Invalid",
            &self.recent_invalid,
            self.invalid_count,
            self.selected == Pane::Invalid,
            Color::Red,
            if self.selected == Pane::Invalid { Some(&mut self.list_state) } else { None },
        );

        let detail_text = match self.selected_verdict() {
            Some(verdict) => format!("{} [{}]\n{}", verdict.proxy, verdict.status(), verdict.message),
            None => "No proxy selected".to_string(),
        };
        let detail = Paragraph::new(detail_text)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Detail"));
        f.render_widget(detail, chunks[3]);

        let status = Paragraph::new(self.status_message.clone())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[4]);
    }

    #[allow(clippy::too_many_arguments)]
    fn render_verdict_list(
        f: &mut Frame,
        area: Rect,
        title: &str,
        verdicts: &VecDeque<VerdictRecord>,
        total_count: usize,
        is_selected: bool,
        color: Color,
        list_state: Option<&mut ListState>,
    ) {
        let items: Vec<ListItem> = verdicts
            .iter()
            .rev()
            .map(|verdict| {
                let content = format!(
                    "{} ({}/{}, {:.2}s)",
                    verdict.proxy, verdict.succeeded, verdict.attempted, verdict.average_elapsed_seconds
                );
                ListItem::new(content).style(Style::default().fg(color))
            })
            .collect();

        let block_title = format!("{} ({})", title, total_count);
        let border_style = if is_selected {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(block_title)
                    .border_style(border_style),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");

        if let Some(state) = list_state {
            f.render_stateful_widget(list, area, state);
        } else {
            f.render_widget(list, area);
        }
    }
}
