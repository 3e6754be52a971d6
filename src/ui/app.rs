//! Inspector application state and event loop

use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    Frame, Terminal,
};

use super::panes::{self, SourceScrollState, StatusRenderData};
use crate::codegen::disasm::{self, Instruction};
use crate::engine::Program;
use crate::snapshot::{Outcome, Trace};

const PLAY_INTERVAL: Duration = Duration::from_millis(500);

/// Which pane is currently focused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPane {
    Source,
    Listing,
    Stack,
    Output,
}

impl FocusedPane {
    /// Clockwise: source -> listing -> stack -> output
    pub fn next(self) -> Self {
        match self {
            FocusedPane::Source => FocusedPane::Listing,
            FocusedPane::Listing => FocusedPane::Stack,
            FocusedPane::Stack => FocusedPane::Output,
            FocusedPane::Output => FocusedPane::Source,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            FocusedPane::Source => FocusedPane::Output,
            FocusedPane::Listing => FocusedPane::Source,
            FocusedPane::Stack => FocusedPane::Listing,
            FocusedPane::Output => FocusedPane::Stack,
        }
    }
}

pub struct App {
    pub trace: Trace,
    pub source_code: String,
    instructions: Vec<Instruction>,
    labels: Vec<(String, usize)>,

    pub focused_pane: FocusedPane,
    pub source_scroll: SourceScrollState,
    pub stack_scroll: usize,
    pub output_scroll: usize,

    pub should_quit: bool,
    pub status_message: String,
    pub is_playing: bool,
    last_play_time: Instant,
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Finished(value) => format!("Program returned {}", *value as i32),
        Outcome::Failed(message) => message.clone(),
        Outcome::Truncated => "History limit reached; showing a partial run".to_string(),
    }
}

impl App {
    pub fn new(trace: Trace, source_code: String, program: &Program) -> Self {
        App {
            status_message: format!("Ready! {}", describe(trace.outcome())),
            trace,
            source_code,
            instructions: disasm::disassemble(program.code()),
            labels: program.functions(),
            focused_pane: FocusedPane::Source,
            source_scroll: SourceScrollState::default(),
            stack_scroll: 0,
            output_scroll: 0,
            should_quit: false,
            is_playing: false,
            last_play_time: Instant::now(),
        }
    }

    fn failed(&self) -> bool {
        matches!(self.trace.outcome(), Outcome::Failed(_))
    }

    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        while !self.should_quit {
            terminal.draw(|f| self.render(f))?;

            if self.is_playing && self.last_play_time.elapsed() >= PLAY_INTERVAL {
                if self.trace.step_forward() {
                    self.status_message = "Playing...".to_string();
                    self.output_scroll = usize::MAX;
                } else {
                    self.is_playing = false;
                    self.status_message = describe(self.trace.outcome());
                }
                self.last_play_time = Instant::now();
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key);
                    }
                }
            }
        }
        Ok(())
    }

    fn render(&mut self, frame: &mut Frame) {
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(frame.area());

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(main_chunks[0]);
        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(columns[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(columns[1]);

        let failed_here = self.failed() && self.trace.at_end();
        let snapshot = self.trace.current();

        panes::render_source_pane(
            frame,
            left[0],
            &self.source_code,
            snapshot.and_then(|s| s.line),
            failed_here,
            self.focused_pane == FocusedPane::Source,
            &mut self.source_scroll,
        );

        if let Some(snapshot) = snapshot {
            panes::render_output_pane(
                frame,
                left[1],
                snapshot.vm.console(),
                self.focused_pane == FocusedPane::Output,
                &mut self.output_scroll,
            );
            panes::render_listing_pane(
                frame,
                right[0],
                &self.instructions,
                &self.labels,
                snapshot.vm.pc(),
                self.focused_pane == FocusedPane::Listing,
            );
            panes::render_stack_pane(
                frame,
                right[1],
                &snapshot.vm,
                self.focused_pane == FocusedPane::Stack,
                &mut self.stack_scroll,
            );
        }

        panes::render_status_bar(
            frame,
            main_chunks[1],
            &StatusRenderData {
                message: &self.status_message,
                current_step: self.trace.position(),
                total_steps: self.trace.len(),
                is_playing: self.is_playing,
                failed: self.failed(),
            },
        );
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            // number keys step forward N times
            KeyCode::Char(c @ '1'..='9') => {
                self.is_playing = false;
                let n = usize::from(c as u8 - b'0');
                let stepped = (0..n).take_while(|_| self.trace.step_forward()).count();
                self.status_message = format!("Stepped forward {stepped} step(s)");
                self.output_scroll = usize::MAX;
            }
            KeyCode::Tab => self.focused_pane = self.focused_pane.next(),
            KeyCode::BackTab => self.focused_pane = self.focused_pane.prev(),
            KeyCode::Left => {
                self.is_playing = false;
                self.status_message = if self.trace.step_backward() {
                    "Stepped backward".to_string()
                } else {
                    "Already at the first step".to_string()
                };
                self.output_scroll = usize::MAX;
            }
            KeyCode::Right => {
                self.is_playing = false;
                self.status_message = if self.trace.step_forward() {
                    "Stepped forward".to_string()
                } else {
                    describe(self.trace.outcome())
                };
                self.output_scroll = usize::MAX;
            }
            KeyCode::Up => self.scroll(-1),
            KeyCode::Down => self.scroll(1),
            KeyCode::Char(' ') => {
                self.is_playing = !self.is_playing;
                self.status_message = if self.is_playing {
                    "Playing...".to_string()
                } else {
                    "Paused".to_string()
                };
            }
            KeyCode::Enter => {
                self.is_playing = false;
                self.trace.jump_to_end();
                self.status_message = describe(self.trace.outcome());
                self.output_scroll = usize::MAX;
            }
            KeyCode::Backspace => {
                self.is_playing = false;
                self.trace.rewind_to_start();
                self.status_message = "Jumped to start".to_string();
                self.output_scroll = 0;
            }
            _ => {}
        }
    }

    fn scroll(&mut self, delta: isize) {
        match self.focused_pane {
            // moving the view down moves the current line up
            FocusedPane::Source => {
                if let Some(row) = self.source_scroll.target_line_row {
                    self.source_scroll.target_line_row = Some(row.saturating_add_signed(-delta));
                }
            }
            FocusedPane::Stack => {
                self.stack_scroll = self.stack_scroll.saturating_add_signed(delta);
            }
            FocusedPane::Output => {
                self.output_scroll = self.output_scroll.saturating_add_signed(delta);
            }
            FocusedPane::Listing => {}
        }
    }
}
