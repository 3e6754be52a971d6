//! Source pane with syntax highlighting
//!
//! Highlighting uses a small character scanner rather than the compiler's
//! lexer, so macro definitions and comments are shown as written.

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use super::{pane_block, visible_height};
use crate::ui::theme::DEFAULT_THEME;

fn word_style(word: &str, is_call: bool) -> Style {
    match word {
        "int" | "char" | "void" => Style::default().fg(DEFAULT_THEME.type_name),
        "if" | "else" | "while" | "for" | "break" | "return" | "#define" => Style::default()
            .fg(DEFAULT_THEME.keyword)
            .add_modifier(Modifier::BOLD),
        _ if word.starts_with(|c: char| c.is_ascii_digit()) => {
            Style::default().fg(DEFAULT_THEME.number)
        }
        _ if is_call => Style::default().fg(DEFAULT_THEME.function),
        _ => Style::default().fg(DEFAULT_THEME.fg),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '#'
}

fn highlight(line: &str) -> Line<'_> {
    let mut spans = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if line[start..].starts_with("//") || line[start..].starts_with("/*") {
            spans.push(Span::styled(
                &line[start..],
                Style::default().fg(DEFAULT_THEME.comment),
            ));
            break;
        }

        if c == '"' || c == '\'' {
            let mut end = line.len();
            let mut escaped = false;
            for (i, d) in chars.by_ref() {
                if escaped {
                    escaped = false;
                } else if d == '\\' {
                    escaped = true;
                } else if d == c {
                    end = i + d.len_utf8();
                    break;
                }
            }
            let style = if c == '"' {
                DEFAULT_THEME.string
            } else {
                DEFAULT_THEME.number
            };
            spans.push(Span::styled(&line[start..end], Style::default().fg(style)));
            continue;
        }

        if is_word_char(c) {
            let mut end = start + c.len_utf8();
            while let Some(&(i, d)) = chars.peek() {
                if !is_word_char(d) {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            let is_call = chars.peek().is_some_and(|&(_, d)| d == '(');
            let word = &line[start..end];
            spans.push(Span::styled(word, word_style(word, is_call)));
            continue;
        }

        let end = start + c.len_utf8();
        let style = match c {
            '{' | '}' | '(' | ')' | '[' | ']' => Style::default().fg(DEFAULT_THEME.primary),
            _ => Style::default().fg(DEFAULT_THEME.fg),
        };
        spans.push(Span::styled(&line[start..end], style));
    }

    Line::from(spans)
}

/// Scroll state for the source pane
#[derive(Debug, Default)]
pub struct SourceScrollState {
    pub offset: usize,
    /// Visual row the current line is pinned to; set on first render.
    pub target_line_row: Option<usize>,
}

/// `current_line` is 1-based; `None` highlights nothing.
pub fn render_source_pane(
    frame: &mut Frame,
    area: Rect,
    source_code: &str,
    current_line: Option<usize>,
    is_error: bool,
    is_focused: bool,
    scroll_state: &mut SourceScrollState,
) {
    let lines: Vec<&str> = source_code.lines().collect();
    let total_lines = lines.len();
    let visible = visible_height(area);

    let target_row = scroll_state
        .target_line_row
        .unwrap_or(visible / 2)
        .min(visible.saturating_sub(1));
    scroll_state.target_line_row = Some(target_row);

    if let Some(line) = current_line.filter(|&l| l > 0 && l <= total_lines) {
        scroll_state.offset = (line - 1)
            .saturating_sub(target_row)
            .min(total_lines.saturating_sub(visible));
    }

    let visible_lines: Vec<Line> = lines
        .iter()
        .enumerate()
        .skip(scroll_state.offset)
        .take(visible)
        .map(|(idx, text)| {
            let is_current = current_line == Some(idx + 1);
            let mut content = highlight(text);
            let (number_fg, line_style) = match (is_current, is_error) {
                (false, _) => (DEFAULT_THEME.comment, None),
                // white on red for the statement that failed
                (true, true) => (
                    DEFAULT_THEME.error,
                    Some(Style::default().bg(DEFAULT_THEME.error).fg(Color::White)),
                ),
                (true, false) => (
                    DEFAULT_THEME.secondary,
                    Some(Style::default().bg(DEFAULT_THEME.current_line_bg)),
                ),
            };
            let mut num_style = Style::default().fg(number_fg);
            if let Some(line_style) = line_style {
                num_style = num_style.add_modifier(Modifier::BOLD);
                for span in &mut content.spans {
                    span.style = span.style.patch(line_style);
                }
            }

            let mut spans = vec![Span::styled(format!("{:4} ", idx + 1), num_style)];
            spans.extend(content.spans);
            Line::from(spans)
        })
        .collect();

    let paragraph = Paragraph::new(visible_lines).block(pane_block(" Source ", is_focused));
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &Line<'_>) -> Vec<String> {
        line.spans.iter().map(|s| s.content.to_string()).collect()
    }

    #[test]
    fn test_highlight_splits_words_and_strings() {
        let line = highlight("printf(\"a \\\" b\", x);");
        assert_eq!(
            texts(&line),
            vec!["printf", "(", "\"a \\\" b\"", ",", " ", "x", ")", ";"]
        );
        assert_eq!(line.spans[0].style.fg, Some(DEFAULT_THEME.function));
    }

    #[test]
    fn test_highlight_comment_and_define() {
        let line = highlight("#define N 10 // ten");
        let words = texts(&line);
        assert_eq!(words[0], "#define");
        assert_eq!(words.last().unwrap(), "// ten");
        assert_eq!(line.spans[4].style.fg, Some(DEFAULT_THEME.number));
    }

    #[test]
    fn test_highlight_non_ascii() {
        let line = highlight("x = 'é';");
        assert_eq!(texts(&line), vec!["x", " ", "=", " ", "'é'", ";"]);
    }
}
