//! Dashboard screen rendering
//!
//! Renders one column per resource (latest value, date range, line chart)
//! and a control bar with the refresh button state and price type switch.
//! Each column shows its own loading or error state.

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, Panel, RangeField};
use crate::cache::CacheEntry;
use crate::data::format_query_date;
use crate::format::{format_amount, format_latest, ChartSeries, NOT_AVAILABLE};

/// Renders the whole dashboard
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(10), Constraint::Length(4)])
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(chunks[0]);

    for (index, (panel, column)) in app.panels.iter().zip(columns.iter()).enumerate() {
        render_panel(frame, app, panel, index == app.focused, *column);
    }

    render_controls(frame, app, chunks[1]);
}

/// Renders one resource column
fn render_panel(frame: &mut Frame, app: &App, panel: &Panel, focused: bool, area: Rect) {
    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let block = Block::default()
        .title(format!(" {} ", panel.resource.series_name()))
        .borders(Borders::ALL)
        .border_style(border_style);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Min(3),
        ])
        .split(inner);

    render_latest(frame, app, panel, rows[0]);
    render_range(frame, app, panel, focused, rows[1]);
    render_chart_area(frame, app, panel, rows[2]);
}

fn render_latest(frame: &mut Frame, app: &App, panel: &Panel, area: Rect) {
    let (value, style) = match panel.latest.as_ref() {
        None => ("Loading...".to_string(), Style::default().fg(Color::Cyan)),
        Some(entry) if entry.is_loading() => {
            ("Loading...".to_string(), Style::default().fg(Color::Cyan))
        }
        Some(entry) => match entry.latest() {
            Some(point) => (
                format_latest(panel.resource, Some(point), app.price_type),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
            None => (NOT_AVAILABLE.to_string(), Style::default().fg(Color::Gray)),
        },
    };

    let lines = vec![
        Line::from(Span::styled(
            panel.resource.title(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(value, style)),
    ];
    frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), area);
}

fn render_range(frame: &mut Frame, app: &App, panel: &Panel, focused: bool, area: Rect) {
    let field_style = |field: RangeField| {
        if focused && app.field == field {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        }
    };

    let line = Line::from(vec![
        Span::styled("From: ", Style::default().fg(Color::DarkGray)),
        Span::styled(format_query_date(panel.range.start()), field_style(RangeField::Start)),
        Span::styled("  To: ", Style::default().fg(Color::DarkGray)),
        Span::styled(format_query_date(panel.range.end()), field_style(RangeField::End)),
    ]);
    frame.render_widget(Paragraph::new(line).alignment(Alignment::Center), area);
}

fn render_chart_area(frame: &mut Frame, app: &App, panel: &Panel, area: Rect) {
    let Some(entry) = panel.series.as_ref() else {
        render_placeholder(frame, "Loading...", Color::Cyan, area);
        return;
    };

    match (entry.series(), entry.error()) {
        (Some(points), _) => {
            let series =
                ChartSeries::from_points(panel.resource, points, app.price_type, app.display_zone);
            render_chart(frame, &series, area);
        }
        (None, Some(err)) => {
            let text = format!("{}\n{}", NOT_AVAILABLE, err);
            render_placeholder(frame, &text, Color::Red, area);
        }
        (None, None) => render_placeholder(frame, loading_text(entry), Color::Cyan, area),
    }
}

fn loading_text(entry: &CacheEntry) -> &'static str {
    if entry.is_fetching {
        "Loading..."
    } else {
        "Waiting for data..."
    }
}

fn render_placeholder(frame: &mut Frame, text: &str, color: Color, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Min(2),
            Constraint::Percentage(40),
        ])
        .split(area);

    let paragraph = Paragraph::new(text.to_string())
        .style(Style::default().fg(color))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, rows[1]);
}

/// Renders a line chart; an empty series draws empty axes
fn render_chart(frame: &mut Frame, series: &ChartSeries, area: Rect) {
    let points = series.points();
    let (low, high) = series.value_bounds().unwrap_or((0.0, 1.0));
    let x_max = (points.len().saturating_sub(1) as f64).max(1.0);

    let dataset = Dataset::default()
        .name(series.series_name.clone())
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(series.color))
        .data(&points);

    let x_labels: Vec<Span> = match (series.labels.first(), series.labels.last()) {
        (Some(first), Some(last)) if series.labels.len() > 1 => {
            vec![Span::raw(short_label(first)), Span::raw(short_label(last))]
        }
        (Some(only), _) => vec![Span::raw(short_label(only))],
        _ => Vec::new(),
    };

    let x_axis = Axis::default()
        .style(Style::default().fg(Color::DarkGray))
        .bounds([0.0, x_max])
        .labels(x_labels);

    let y_axis = Axis::default()
        .style(Style::default().fg(Color::DarkGray))
        .bounds([low, high])
        .labels(vec![Span::raw(format_amount(low)), Span::raw(format_amount(high))]);

    let chart = Chart::new(vec![dataset]).x_axis(x_axis).y_axis(y_axis);
    frame.render_widget(chart, area);
}

/// Date part of a chart label, which is what fits under a narrow axis
fn short_label(label: &str) -> String {
    label.split_whitespace().next().unwrap_or(label).to_string()
}

/// Renders the refresh button, price type switch and status line
fn render_controls(frame: &mut Frame, app: &App, area: Rect) {
    let refresh = if app.can_refresh() {
        Span::styled(
            "[r] Refresh Prices",
            Style::default().fg(Color::White).bg(Color::Blue),
        )
    } else {
        Span::styled(
            format!("[r] Refresh Prices ({}s)", app.cooldown.remaining_seconds()),
            Style::default().fg(Color::DarkGray),
        )
    };

    let switch = Span::styled(
        format!("[u] Switch to {} Price", app.price_type.toggled().unit()),
        Style::default().fg(Color::White).bg(Color::DarkGray),
    );

    let controls = Line::from(vec![
        refresh,
        Span::raw("  "),
        switch,
        Span::styled(
            "  Tab: panel  f: from/to  \u{2190}/\u{2192}: day  [/]: month  ?: help",
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let status = Line::from(Span::styled(
        app.status.clone().unwrap_or_default(),
        Style::default().fg(Color::Gray),
    ));

    let block = Block::default().borders(Borders::TOP);
    frame.render_widget(Paragraph::new(vec![controls, status]).block(block), area);
}
