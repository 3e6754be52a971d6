//! VM registers and stack pane

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use super::{clamp_scroll, pane_block, visible_height};
use crate::runtime::Vm;
use crate::ui::theme::DEFAULT_THEME;

/// How many words above `sp` are shown.
const STACK_WINDOW: usize = 256;

fn register<'a>(name: &'a str, value: String) -> [Span<'a>; 2] {
    [
        Span::styled(format!("{name} "), Style::default().fg(DEFAULT_THEME.comment)),
        Span::styled(
            format!("{value:<20}"),
            Style::default().fg(DEFAULT_THEME.fg).add_modifier(Modifier::BOLD),
        ),
    ]
}

pub fn render_stack_pane(
    frame: &mut Frame,
    area: Rect,
    vm: &Vm,
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let mut lines = vec![
        Line::from(
            [
                register("pc", format!("{:#06x}", vm.pc())),
                register("a", vm.accumulator().to_string()),
            ]
            .concat(),
        ),
        Line::from(
            [
                register("sp", format!("{:#x}", vm.sp())),
                register("bp", format!("{:#x}", vm.bp())),
            ]
            .concat(),
        ),
        Line::from(""),
    ];
    let header = lines.len();

    let words = vm.stack_words(STACK_WINDOW);
    let body = visible_height(area).saturating_sub(header).max(1);
    clamp_scroll(scroll_offset, words.len(), body);

    lines.extend(words.iter().skip(*scroll_offset).take(body).map(|&(address, value)| {
        let marker = if address == vm.bp() { "bp→" } else { "   " };
        Line::from(vec![
            Span::styled(marker, Style::default().fg(DEFAULT_THEME.secondary)),
            Span::styled(
                format!(" {address:#x}  "),
                Style::default().fg(DEFAULT_THEME.address),
            ),
            Span::styled(
                format!("{value:>20}"),
                Style::default().fg(DEFAULT_THEME.number),
            ),
        ])
    }));

    let paragraph = Paragraph::new(lines).block(pane_block(" VM Stack ", is_focused));
    frame.render_widget(paragraph, area);
}
