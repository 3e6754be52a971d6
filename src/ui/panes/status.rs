//! Status bar with keybindings and state indicators

use std::borrow::Cow;

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::ui::theme::DEFAULT_THEME;

pub struct StatusRenderData<'a> {
    pub message: &'a str,
    pub current_step: usize,
    pub total_steps: usize,
    pub is_playing: bool,
    /// The run ended in a runtime error at the last step.
    pub failed: bool,
}

fn badge<'a>(text: impl Into<Cow<'a, str>>, bg: Color) -> Span<'a> {
    Span::styled(
        text,
        Style::default()
            .bg(bg)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
}

pub fn render_status_bar(frame: &mut Frame, area: Rect, data: &StatusRenderData<'_>) {
    let layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let bar = Style::default().bg(DEFAULT_THEME.current_line_bg);
    let step_bg = if data.failed {
        DEFAULT_THEME.error
    } else {
        DEFAULT_THEME.primary
    };
    let left = vec![
        badge(
            format!(" Step {}/{} ", data.current_step + 1, data.total_steps),
            step_bg,
        ),
        Span::styled(" | ", bar.fg(DEFAULT_THEME.comment)),
        Span::styled(
            format!(" {} ", data.message),
            bar.fg(if data.failed {
                DEFAULT_THEME.error
            } else {
                DEFAULT_THEME.fg
            }),
        ),
    ];
    frame.render_widget(
        Paragraph::new(Line::from(left))
            .style(bar)
            .alignment(Alignment::Left),
        layout[0],
    );

    let key = Style::default().bg(DEFAULT_THEME.comment).fg(Color::Black);
    let desc = bar.fg(DEFAULT_THEME.fg);
    let sep = Span::styled("│", bar.fg(DEFAULT_THEME.comment));
    let mut right = Vec::new();
    for (keys, what) in [
        (" ←/→ ", " step "),
        (" ⎵ ", " play "),
        (" ↵ / ⌫ ", " end/start "),
        (" tab ", " focus "),
        (" q ", " quit "),
    ] {
        if !right.is_empty() {
            right.push(sep.clone());
        }
        right.push(Span::styled(keys, key));
        right.push(Span::styled(what, desc));
    }

    let at_end = data.current_step + 1 >= data.total_steps;
    let indicator = if data.is_playing {
        Some(badge(" ▶ PLAYING ", DEFAULT_THEME.secondary))
    } else if at_end && data.failed {
        Some(badge(" FAILED ", DEFAULT_THEME.error))
    } else if at_end {
        Some(badge(" END ", DEFAULT_THEME.error))
    } else if data.current_step == 0 {
        Some(badge(" START ", DEFAULT_THEME.success))
    } else {
        None
    };
    if let Some(indicator) = indicator {
        right.push(sep);
        right.push(indicator);
    }

    frame.render_widget(
        Paragraph::new(Line::from(right))
            .style(bar)
            .alignment(Alignment::Right),
        layout[1],
    );
}
