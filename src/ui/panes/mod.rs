//! Pane rendering
//!
//! - [`source`]: source text with the current statement highlighted
//! - [`listing`]: disassembled bytecode with the current instruction marked
//! - [`stack`]: VM registers and the live stack words
//! - [`output`]: what the program printed so far
//! - [`status`]: step counter, messages and keybindings
//!
//! Each pane exports one `render_*` function. Scroll offsets are owned by
//! the [`App`](crate::ui::App) and clamped here.

pub mod listing;
pub mod output;
pub mod source;
pub mod stack;
pub mod status;

pub use listing::render_listing_pane;
pub use output::render_output_pane;
pub use source::{render_source_pane, SourceScrollState};
pub use stack::render_stack_pane;
pub use status::{render_status_bar, StatusRenderData};

use ratatui::style::{Modifier, Style};
use ratatui::widgets::{Block, Borders};

use crate::ui::theme::DEFAULT_THEME;

fn pane_block(title: &str, is_focused: bool) -> Block<'_> {
    let border_style = if is_focused {
        Style::default()
            .fg(DEFAULT_THEME.border_focused)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(DEFAULT_THEME.border_normal)
    };
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style)
}

/// Rows inside a bordered pane.
fn visible_height(area: ratatui::layout::Rect) -> usize {
    area.height.saturating_sub(2).max(1) as usize
}

/// Clamp a free scroll offset so the last page stays full.
fn clamp_scroll(offset: &mut usize, total: usize, visible: usize) {
    *offset = (*offset).min(total.saturating_sub(visible));
}

/// Scroll offset that keeps row `focus` roughly centered.
fn centered_scroll(focus: usize, total: usize, visible: usize) -> usize {
    focus
        .saturating_sub(visible / 2)
        .min(total.saturating_sub(visible))
}
