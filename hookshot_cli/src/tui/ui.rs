//! TUI rendering functions.

use super::app::{TuiApp, TunnelStatus, View, RECENT_REQUESTS};
use crate::client::RequestRecord;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, Borders, Cell, Paragraph, Row, Scrollbar, ScrollbarOrientation, ScrollbarState,
        Table, TableState, Wrap,
    },
    Frame,
};

/// Draw the TUI
pub fn draw(frame: &mut Frame, app: &TuiApp) {
    match app.view {
        View::Main => draw_main_view(frame, app),
        View::Requests => draw_requests_view(frame, app),
        View::Detail => draw_detail_view(frame, app),
    }
}

fn draw_main_view(frame: &mut Frame, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),  // Connection info
            Constraint::Min(5),     // Recent requests
            Constraint::Length(1),  // Footer
        ])
        .split(frame.area());

    draw_connection_info(frame, app, chunks[0]);
    draw_request_table(frame, app, chunks[1], false);
    draw_footer(frame, app, chunks[2], "q quit · enter requests");
}

fn draw_requests_view(frame: &mut Frame, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    draw_request_table(frame, app, chunks[0], true);
    draw_footer(
        frame,
        app,
        chunks[1],
        "esc back · j/k move · enter detail · r replay · q quit",
    );
}

fn draw_detail_view(frame: &mut Frame, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    if let Some(record) = app.selected_request() {
        draw_request_detail(frame, record, chunks[0]);
    }
    draw_footer(frame, app, chunks[1], "esc back · r replay · q quit");
}

fn draw_connection_info(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let status_color = match app.status {
        TunnelStatus::Online => Color::Green,
        TunnelStatus::Connecting | TunnelStatus::Reconnecting => Color::Yellow,
        TunnelStatus::Offline => Color::Red,
    };

    let (public_url, target, server_url) = match &app.connection {
        Some(info) => (
            info.public_url.as_str(),
            info.target.as_str(),
            info.server_url.as_str(),
        ),
        None => ("-", "-", "-"),
    };

    let lines = vec![
        Line::from(vec![
            Span::styled("  hookshot", Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
            Span::styled(
                format!("  v{}", env!("CARGO_PKG_VERSION")),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled("  Status      ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                app.status.as_str(),
                Style::default().fg(status_color).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::styled("  Public URL  ", Style::default().fg(Color::DarkGray)),
            Span::styled(public_url, Style::default().fg(Color::Green)),
        ]),
        Line::from(vec![
            Span::styled("  Forwarding  ", Style::default().fg(Color::DarkGray)),
            Span::styled(target, Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::styled("  Server      ", Style::default().fg(Color::DarkGray)),
            Span::styled(server_url, Style::default().fg(Color::White)),
        ]),
    ];

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_request_table(frame: &mut Frame, app: &TuiApp, area: Rect, full: bool) {
    let fixed_width = 9 + 7 + 4 + 8 + 10;
    let path_width = (area.width as usize).saturating_sub(fixed_width).max(10);

    let header = Row::new(vec!["Time", "Method", "Path", "Stat", "Dur"])
        .style(Style::default().fg(Color::DarkGray))
        .bottom_margin(0);

    let records: Vec<&RequestRecord> = if full {
        app.requests.iter().collect()
    } else {
        app.recent.iter().collect()
    };

    let rows: Vec<Row> = records
        .iter()
        .map(|record| {
            Row::new(vec![
                Cell::from(record.timestamp.format("%H:%M:%S").to_string()),
                Cell::from(format!("{:>6}", truncate(&record.method, 6)))
                    .style(method_style(&record.method)),
                Cell::from(truncate(&record.path, path_width).to_string()),
                Cell::from(record.status_code.to_string())
                    .style(status_style(record.status_code)),
                Cell::from(format_duration_short(record.duration_ms)),
            ])
        })
        .collect();

    let title = if full {
        format!(" All Requests ({}) ", app.requests.len())
    } else {
        format!(" Recent Requests (last {RECENT_REQUESTS}) ")
    };

    let widths = [
        Constraint::Length(9),
        Constraint::Length(7),
        Constraint::Min(10),
        Constraint::Length(4),
        Constraint::Length(8),
    ];

    let table = Table::new(rows, widths).header(header).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    if full {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);

        let table = table.row_highlight_style(Style::default().bg(Color::Rgb(40, 40, 60)));
        let mut state = TableState::default();
        state.select(Some(app.selected));
        frame.render_stateful_widget(table, chunks[0], &mut state);

        let mut scrollbar_state =
            ScrollbarState::new(app.requests.len()).position(app.selected);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            chunks[1],
            &mut scrollbar_state,
        );
    } else {
        frame.render_widget(table, area);
    }
}

fn draw_request_detail(frame: &mut Frame, record: &RequestRecord, area: Rect) {
    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                format!("{} {}", record.method, record.path),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    "  {} · {} · {}",
                    record.status_code,
                    format_duration_short(record.duration_ms),
                    record.id
                ),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
        Line::from(""),
    ];

    if let Some(error) = &record.error {
        lines.push(Line::from(Span::styled(
            format!("error: {error}"),
            Style::default().fg(Color::Red),
        )));
        lines.push(Line::from(""));
    }

    lines.push(section_header("Request Headers"));
    lines.extend(header_lines(&record.request_headers));
    lines.push(Line::from(""));
    lines.push(section_header("Request Body"));
    lines.push(body_line(&record.request_body));
    lines.push(Line::from(""));
    lines.push(section_header("Response Headers"));
    lines.extend(header_lines(&record.response_headers));
    lines.push(Line::from(""));
    lines.push(section_header("Response Body"));
    lines.push(body_line(&record.response_body));

    let block = Block::default()
        .title(" Request Detail ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
}

fn section_header(title: &str) -> Line<'_> {
    Line::from(Span::styled(
        title,
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ))
}

fn header_lines(headers: &std::collections::HashMap<String, String>) -> Vec<Line<'static>> {
    let mut sorted: Vec<(&String, &String)> = headers.iter().collect();
    sorted.sort_by_key(|(name, _)| name.as_str());
    sorted
        .into_iter()
        .map(|(name, value)| {
            Line::from(vec![
                Span::styled(format!("  {name}: "), Style::default().fg(Color::DarkGray)),
                Span::styled(value.clone(), Style::default().fg(Color::White)),
            ])
        })
        .collect()
}

fn body_line(body: &[u8]) -> Line<'static> {
    const PREVIEW: usize = 2048;
    if body.is_empty() {
        return Line::from(Span::styled(
            "  (empty)",
            Style::default().fg(Color::DarkGray),
        ));
    }
    match std::str::from_utf8(body) {
        Ok(text) => {
            let mut end = text.len().min(PREVIEW);
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            let mut preview = text[..end].to_string();
            if end < text.len() {
                preview.push_str("...");
            }
            Line::from(Span::styled(
                format!("  {preview}"),
                Style::default().fg(Color::White),
            ))
        }
        Err(_) => Line::from(Span::styled(
            format!("  [binary {} bytes]", body.len()),
            Style::default().fg(Color::DarkGray),
        )),
    }
}

fn draw_footer(frame: &mut Frame, app: &TuiApp, area: Rect, hints: &str) {
    let line = match &app.status_message {
        Some((message, _)) => Line::from(vec![
            Span::styled(format!(" {message}"), Style::default().fg(Color::Yellow)),
            Span::styled(format!("  ·  {hints}"), Style::default().fg(Color::DarkGray)),
        ]),
        None => Line::from(Span::styled(
            format!(" {hints}"),
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn method_style(method: &str) -> Style {
    let color = match method {
        "GET" => Color::Green,
        "POST" => Color::Yellow,
        "PUT" => Color::Blue,
        "PATCH" => Color::Magenta,
        "DELETE" => Color::Red,
        "HEAD" => Color::Cyan,
        _ => Color::White,
    };
    Style::default().fg(color)
}

fn status_style(status: u16) -> Style {
    let color = match status {
        200..=299 => Color::Green,
        300..=399 => Color::Cyan,
        400..=499 => Color::Yellow,
        _ => Color::Red,
    };
    Style::default().fg(color)
}

fn format_duration_short(duration_ms: u64) -> String {
    if duration_ms >= 1000 {
        format!("{:.1}s", duration_ms as f64 / 1000.0)
    } else {
        format!("{duration_ms}ms")
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
