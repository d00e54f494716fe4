//! ANSI-coded text, re-rendered with ratatui's style vocabulary.
//!
//! Build tools and the supervised program color their output; rendered
//! verbatim inside the TUI those escape sequences would corrupt the
//! screen. This parser interprets SGR runs (colors, emphasis) into styled
//! spans and drops every other control sequence: CSI, OSC titles, DCS, and
//! bare control characters. Carriage returns (spinner animations) vanish;
//! tabs become spaces.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

/// Parse `input` into styled text. Never fails: unknown sequences are
/// skipped, invalid codes ignored.
pub fn render_ansi(input: &str) -> Text<'static> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut segment = String::new();
    let mut style = Style::default();

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    let mut params = String::new();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if ('\u{40}'..='\u{7e}').contains(&next) {
                            if next == 'm' {
                                flush(&mut segment, &mut spans, style);
                                style = apply_sgr(style, &params);
                            }
                            break;
                        }
                        params.push(next);
                    }
                }
                Some(']') => {
                    // OSC: until BEL or ESC \
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == '\u{07}' {
                            break;
                        }
                        if next == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                Some('P' | 'X' | '^' | '_') => {
                    // DCS/SOS/PM/APC: until ESC \
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                Some('(' | ')' | '*' | '+') => {
                    // Character-set selection: ESC ( B
                    chars.next();
                    chars.next();
                }
                _ => {
                    chars.next();
                }
            },
            '\n' => {
                flush(&mut segment, &mut spans, style);
                lines.push(Line::from(std::mem::take(&mut spans)));
            }
            '\t' => segment.push_str("    "),
            '\r' => {}
            c if c.is_control() => {}
            c => segment.push(c),
        }
    }
    flush(&mut segment, &mut spans, style);
    if !spans.is_empty() {
        lines.push(Line::from(spans));
    }
    Text::from(lines)
}

fn flush(segment: &mut String, spans: &mut Vec<Span<'static>>, style: Style) {
    if !segment.is_empty() {
        spans.push(Span::styled(std::mem::take(segment), style));
    }
}

fn apply_sgr(mut style: Style, params: &str) -> Style {
    let codes: Vec<u16> = params
        .split(';')
        .map(|p| p.parse::<u16>().unwrap_or(0))
        .collect();

    let mut i = 0;
    while i < codes.len() {
        match codes[i] {
            0 => style = Style::default(),
            1 => style = style.add_modifier(Modifier::BOLD),
            2 => style = style.add_modifier(Modifier::DIM),
            3 => style = style.add_modifier(Modifier::ITALIC),
            4 => style = style.add_modifier(Modifier::UNDERLINED),
            5 => style = style.add_modifier(Modifier::SLOW_BLINK),
            7 => style = style.add_modifier(Modifier::REVERSED),
            9 => style = style.add_modifier(Modifier::CROSSED_OUT),
            22 => style = style.remove_modifier(Modifier::BOLD | Modifier::DIM),
            23 => style = style.remove_modifier(Modifier::ITALIC),
            24 => style = style.remove_modifier(Modifier::UNDERLINED),
            25 => style = style.remove_modifier(Modifier::SLOW_BLINK),
            27 => style = style.remove_modifier(Modifier::REVERSED),
            29 => style = style.remove_modifier(Modifier::CROSSED_OUT),
            30..=37 => style.fg = Some(basic_color(codes[i] - 30)),
            39 => style.fg = None,
            40..=47 => style.bg = Some(basic_color(codes[i] - 40)),
            49 => style.bg = None,
            90..=97 => style.fg = Some(bright_color(codes[i] - 90)),
            100..=107 => style.bg = Some(bright_color(codes[i] - 100)),
            38 | 48 => {
                let is_fg = codes[i] == 38;
                let color = match codes.get(i + 1) {
                    Some(&5) => {
                        let c = codes.get(i + 2).map(|&n| Color::Indexed(n as u8));
                        i += 2;
                        c
                    }
                    Some(&2) => {
                        let c = match (codes.get(i + 2), codes.get(i + 3), codes.get(i + 4)) {
                            (Some(&r), Some(&g), Some(&b)) => {
                                Some(Color::Rgb(r as u8, g as u8, b as u8))
                            }
                            _ => None,
                        };
                        i += 4;
                        c
                    }
                    _ => None,
                };
                if let Some(color) = color {
                    if is_fg {
                        style.fg = Some(color);
                    } else {
                        style.bg = Some(color);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    style
}

fn basic_color(n: u16) -> Color {
    match n {
        0 => Color::Black,
        1 => Color::Red,
        2 => Color::Green,
        3 => Color::Yellow,
        4 => Color::Blue,
        5 => Color::Magenta,
        6 => Color::Cyan,
        _ => Color::Gray,
    }
}

fn bright_color(n: u16) -> Color {
    match n {
        0 => Color::DarkGray,
        1 => Color::LightRed,
        2 => Color::LightGreen,
        3 => Color::LightYellow,
        4 => Color::LightBlue,
        5 => Color::LightMagenta,
        6 => Color::LightCyan,
        _ => Color::White,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(text: &Text<'_>) -> String {
        text.lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn plain_text_passes_through() {
        let text = render_ansi("hello\nworld");
        assert_eq!(plain(&text), "hello\nworld");
        assert_eq!(text.lines.len(), 2);
    }

    #[test]
    fn sgr_colors_become_span_styles() {
        let text = render_ansi("ok \u{1b}[31mred\u{1b}[0m done");
        let line = &text.lines[0];
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[0].style.fg, None);
        assert_eq!(line.spans[1].content.as_ref(), "red");
        assert_eq!(line.spans[1].style.fg, Some(Color::Red));
        assert_eq!(line.spans[2].style.fg, None);
    }

    #[test]
    fn bold_and_bright() {
        let text = render_ansi("\u{1b}[1;92mgood\u{1b}[0m");
        let span = &text.lines[0].spans[0];
        assert!(span.style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(span.style.fg, Some(Color::LightGreen));
    }

    #[test]
    fn indexed_and_truecolor() {
        let text = render_ansi("\u{1b}[38;5;208morange\u{1b}[0m \u{1b}[38;2;1;2;3mrgb\u{1b}[0m");
        let spans = &text.lines[0].spans;
        assert_eq!(spans[0].style.fg, Some(Color::Indexed(208)));
        assert_eq!(spans[2].style.fg, Some(Color::Rgb(1, 2, 3)));
    }

    #[test]
    fn osc_and_controls_are_stripped() {
        let text = render_ansi("a\u{1b}]0;title\u{7}b\rc\td");
        assert_eq!(plain(&text), "abc    d");
    }

    #[test]
    fn unterminated_escape_does_not_panic() {
        let text = render_ansi("tail\u{1b}[31");
        assert_eq!(plain(&text), "tail");
    }

    #[test]
    fn empty_sgr_resets() {
        let text = render_ansi("\u{1b}[31mred\u{1b}[mplain");
        let spans = &text.lines[0].spans;
        assert_eq!(spans[0].style.fg, Some(Color::Red));
        assert_eq!(spans[1].style.fg, None);
    }
}
