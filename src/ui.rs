use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{
        Block, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap,
    },
    Frame,
};

use crate::app::{App, Dialog};
use crate::message::{Role, PLACEHOLDER};

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut current_text = String::new();

    while let Some((_, c)) = chars.next() {
        if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some((_, c)) = chars.next() {
                if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    match &app.dialog {
        Some(Dialog::Error { action, message }) => {
            let text = format!("ERROR: {} from {}", message, action);
            render_popup(frame, area, " Error ", &text, Color::Red, "Enter/Esc dismiss");
        }
        Some(Dialog::ConfirmReset) => {
            render_popup(
                frame,
                area,
                " Confirm ",
                "Are you sure you want to clear the current chat?\n\nIt will be backed up to\n~/.coding-assistant-history",
                Color::Yellow,
                "y/Enter confirm  n/Esc cancel",
            );
        }
        Some(Dialog::Notice { message }) => {
            render_popup(frame, area, " Notice ", message, Color::Cyan, "Enter/Esc dismiss");
        }
        None => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let model_label = if app.low_cost { " GPT 3 " } else { " GPT 4 " };
    let model_style = if app.low_cost {
        Style::default().bg(Color::Green).fg(Color::Black)
    } else {
        Style::default().bg(Color::Magenta).fg(Color::White)
    };

    let title = Line::from(vec![
        Span::styled(" Coding Assistant ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{} ", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(model_label, model_style),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");
    let inner = block.inner(area);

    // Remember viewport dimensions for scroll math
    app.chat_height = inner.height;
    app.chat_width = inner.width;

    let mut lines: Vec<Line> = Vec::new();
    for message in &app.messages {
        let (label, style) = match message.role {
            Role::User => ("You", Style::default().fg(Color::Cyan).bold()),
            Role::Assistant => ("Assistant", Style::default().fg(Color::Green).bold()),
            Role::System => ("System", Style::default().fg(Color::DarkGray).bold()),
        };
        lines.push(Line::from(Span::styled(format!("{label}:"), style)));

        if message.content == PLACEHOLDER {
            lines.push(Line::from(Span::styled(
                PLACEHOLDER,
                Style::default().fg(Color::DarkGray),
            )));
        } else {
            for content_line in message.content.lines() {
                lines.push(parse_markdown_line(content_line));
            }
        }
        lines.push(Line::default());
    }

    if app.is_thinking() {
        lines.push(Line::from(Span::styled(
            "Assistant:",
            Style::default().fg(Color::Green).bold(),
        )));
        let dots = ".".repeat(app.animation_frame as usize + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{dots}"),
            Style::default().fg(Color::DarkGray).italic(),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(paragraph, area);

    let total = app.total_chat_lines() as usize;
    if total > inner.height as usize {
        let mut scrollbar_state =
            ScrollbarState::new(total.saturating_sub(inner.height as usize))
                .position(app.chat_scroll as usize);
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight);
        frame.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let border_color = if app.dialog.is_none() {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Message ");
    let inner = block.inner(area);

    // Keep the cursor visible when the draft is wider than the box
    let width = inner.width.max(1) as usize;
    let scroll_offset = app.input_cursor.saturating_sub(width.saturating_sub(1));
    let visible: String = app.input.chars().skip(scroll_offset).collect();

    let input = Paragraph::new(visible).block(block);
    frame.render_widget(input, area);

    if app.dialog.is_none() {
        let cursor_x = inner.x + (app.input_cursor - scroll_offset) as u16;
        frame.set_cursor_position((cursor_x.min(inner.right().saturating_sub(1)), inner.y));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut hints = vec![
        Span::styled(" Enter ", key_style),
        Span::styled(" send ", label_style),
        Span::styled(" ^T ", key_style),
        Span::styled(
            if app.low_cost { " use GPT-4 " } else { " use GPT-3 " },
            label_style,
        ),
    ];
    if !app.messages.is_empty() {
        hints.extend(vec![
            Span::styled(" ^N ", key_style),
            Span::styled(" new session ", label_style),
        ]);
    }
    hints.extend(vec![
        Span::styled(" Up/Dn ", key_style),
        Span::styled(" scroll ", label_style),
        Span::styled(" ^C ", key_style),
        Span::styled(" quit ", label_style),
    ]);

    let footer = Paragraph::new(Line::from(hints)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_popup(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    text: &str,
    color: Color,
    hint: &str,
) {
    let popup_area = centered_rect(60, 30, area);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(title)
        .title_bottom(Line::from(format!(" {hint} ")).right_aligned());

    let paragraph = Paragraph::new(text.to_string())
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, popup_area);
}

/// Centered rect sized as a percentage of the containing area
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let [_, middle, _] = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .areas(area);

    let [_, center, _] = Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .areas(middle);

    center
}
