//! Bytecode listing pane

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use super::{centered_scroll, pane_block, visible_height};
use crate::codegen::disasm::Instruction;
use crate::ui::theme::DEFAULT_THEME;

enum Row<'a> {
    Label(&'a str),
    Instruction(&'a Instruction),
}

fn rows<'a>(instructions: &'a [Instruction], labels: &'a [(String, usize)]) -> Vec<Row<'a>> {
    let mut rows = Vec::with_capacity(instructions.len() + labels.len());
    let mut pending = labels.iter().peekable();
    for ins in instructions {
        while let Some((name, _)) = pending.next_if(|(_, at)| *at <= ins.offset) {
            rows.push(Row::Label(name));
        }
        rows.push(Row::Instruction(ins));
    }
    rows
}

/// The row holding the instruction at `pc` is kept in view and marked.
pub fn render_listing_pane(
    frame: &mut Frame,
    area: Rect,
    instructions: &[Instruction],
    labels: &[(String, usize)],
    pc: usize,
    is_focused: bool,
) {
    let rows = rows(instructions, labels);
    let visible = visible_height(area);
    let current = rows
        .iter()
        .position(|row| matches!(row, Row::Instruction(ins) if ins.offset == pc));
    let offset = current.map_or(0, |row| centered_scroll(row, rows.len(), visible));

    let lines: Vec<Line> = rows
        .iter()
        .skip(offset)
        .take(visible)
        .map(|row| match row {
            Row::Label(name) => Line::from(Span::styled(
                format!("{name}:"),
                Style::default()
                    .fg(DEFAULT_THEME.function)
                    .add_modifier(Modifier::BOLD),
            )),
            Row::Instruction(ins) => {
                let is_current = ins.offset == pc;
                let marker = if is_current { "▶ " } else { "  " };
                let mut spans = vec![
                    Span::styled(marker, Style::default().fg(DEFAULT_THEME.secondary)),
                    Span::styled(
                        format!("{:06x}  ", ins.offset),
                        Style::default().fg(DEFAULT_THEME.address),
                    ),
                    Span::styled(
                        format!("{:<10}", ins.mnemonic),
                        Style::default().fg(DEFAULT_THEME.keyword),
                    ),
                    Span::styled(ins.operands.as_str(), Style::default().fg(DEFAULT_THEME.fg)),
                ];
                if is_current {
                    for span in &mut spans {
                        span.style = span.style.bg(DEFAULT_THEME.current_line_bg);
                    }
                }
                Line::from(spans)
            }
        })
        .collect();

    let paragraph = Paragraph::new(lines).block(pane_block(" Bytecode ", is_focused));
    frame.render_widget(paragraph, area);
}
