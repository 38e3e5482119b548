use crate::app::{App, Panel};
use crate::speedtest::TestPhase;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

// Color palette
const ACCENT: Color = Color::Rgb(100, 149, 237);
const SUCCESS: Color = Color::Rgb(134, 194, 156);
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);
const ERROR: Color = Color::Rgb(220, 130, 130);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

pub fn draw_ui(frame: &mut Frame, app: &App, server: &str) {
    let area = frame.area();

    if app.expanded {
        draw_expanded_view(frame, area, app, server);
    } else {
        draw_normal_view(frame, area, app, server);
    }
}

fn draw_normal_view(frame: &mut Frame, area: Rect, app: &App, server: &str) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app, server);

    let panels = Layout::horizontal([
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
    ])
    .split(chunks[1]);

    draw_download_panel(frame, panels[0], app, app.selected_panel == Panel::Download);
    draw_upload_panel(frame, panels[1], app, app.selected_panel == Panel::Upload);
    draw_ping_panel(frame, panels[2], app, app.selected_panel == Panel::Ping);

    draw_status(frame, chunks[2], app);
    draw_help(frame, chunks[3], app);
}

fn draw_expanded_view(frame: &mut Frame, area: Rect, app: &App, server: &str) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app, server);

    match app.selected_panel {
        Panel::Download => draw_expanded_metric(
            frame,
            chunks[1],
            "Download",
            SUCCESS,
            SUCCESS_DIM,
            current_download(app),
            app.download_progress,
            &app.download_samples,
            "Mbps",
        ),
        Panel::Upload => draw_expanded_metric(
            frame,
            chunks[1],
            "Upload",
            INFO,
            INFO_DIM,
            current_upload(app),
            app.upload_progress,
            &app.upload_samples,
            "Mbps",
        ),
        Panel::Ping => draw_expanded_metric(
            frame,
            chunks[1],
            "Latency",
            WARN,
            TEXT_MUTED,
            current_ping(app),
            app.ping_progress,
            &app.ping_samples,
            "ms",
        ),
    }

    draw_status(frame, chunks[2], app);
    draw_help(frame, chunks[3], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App, server: &str) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(inner);

    let title = Paragraph::new("openspeed")
        .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD));
    frame.render_widget(title, chunks[0]);

    let (state, color) = match app.phase {
        None => ("Ready", TEXT_MUTED),
        Some(TestPhase::Ping) => ("Measuring latency...", WARN),
        Some(TestPhase::Download) => ("Testing download...", SUCCESS),
        Some(TestPhase::Upload) => ("Testing upload...", INFO),
        Some(TestPhase::Complete) => ("Complete", ACCENT),
        Some(TestPhase::Error) => ("Failed", ERROR),
    };
    let middle = Paragraph::new(format!("{state}  ·  {server}"))
        .style(Style::default().fg(color))
        .alignment(Alignment::Center);
    frame.render_widget(middle, chunks[1]);

    frame.render_widget(
        Paragraph::new(phase_indicator(app.phase)).alignment(Alignment::Right),
        chunks[2],
    );
}

fn phase_indicator(phase: Option<TestPhase>) -> Line<'static> {
    let stages = [
        (TestPhase::Ping, "ping"),
        (TestPhase::Download, "down"),
        (TestPhase::Upload, "up"),
    ];

    let mut spans = Vec::new();
    for (i, (stage, label)) in stages.iter().enumerate() {
        let is_active = phase == Some(*stage);
        let is_complete = match phase {
            Some(TestPhase::Download) => *stage == TestPhase::Ping,
            Some(TestPhase::Upload) => *stage != TestPhase::Upload,
            Some(TestPhase::Complete) => true,
            _ => false,
        };

        let style = if is_active {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if is_complete {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };
        spans.push(Span::styled(*label, style));
        if i < stages.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }

    Line::from(spans)
}

fn draw_download_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool) {
    draw_metric_panel(
        frame,
        area,
        "Download",
        SUCCESS,
        SUCCESS_DIM,
        selected,
        current_download(app),
        app.download_progress,
        &app.download_samples,
    );
}

fn draw_upload_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool) {
    draw_metric_panel(
        frame,
        area,
        "Upload",
        INFO,
        INFO_DIM,
        selected,
        current_upload(app),
        app.upload_progress,
        &app.upload_samples,
    );
}

fn draw_ping_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool) {
    let border_color = if selected { BORDER_ACTIVE } else { BORDER };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Span::styled(
            " Latency ",
            Style::default().fg(if selected { WARN } else { TEXT_SECONDARY }),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    let ping = current_ping(app);
    let value = if ping > 0.0 {
        format!("{ping:.1} ms")
    } else {
        "—".to_string()
    };
    frame.render_widget(
        Paragraph::new(value)
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    let jitter = current_jitter(app)
        .map(|j| format!("jitter {j:.1} ms"))
        .unwrap_or_else(|| "jitter —".to_string());
    frame.render_widget(
        Paragraph::new(jitter)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[1],
    );

    if !app.ping_samples.is_empty() {
        draw_sparkline(frame, chunks[2], &app.ping_samples, WARN);
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_metric_panel(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    color: Color,
    dim_color: Color,
    selected: bool,
    speed: f64,
    progress: f64,
    samples: &[f64],
) {
    let border_color = if selected { BORDER_ACTIVE } else { BORDER };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(if selected { color } else { TEXT_SECONDARY }),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new(format_speed(speed))
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    draw_progress_bar(frame, chunks[1], progress, color, dim_color);

    if !samples.is_empty() {
        draw_sparkline(frame, chunks[2], samples, color);
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_expanded_metric(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    color: Color,
    dim_color: Color,
    current: f64,
    progress: f64,
    samples: &[f64],
    unit: &str,
) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER_ACTIVE))
        .title(Span::styled(format!(" {title} "), Style::default().fg(color)));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(4),
    ])
    .split(inner);

    let (avg, max, min) = stats(samples);
    let value = if unit == "ms" {
        format!("{current:.1} {unit}")
    } else {
        format_speed(current)
    };
    let line = Line::from(vec![
        Span::styled(
            value,
            Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
        ),
        Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)),
        Span::styled(format!("avg {avg:.1}"), Style::default().fg(TEXT_MUTED)),
        Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)),
        Span::styled(format!("max {max:.1}"), Style::default().fg(TEXT_MUTED)),
        Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)),
        Span::styled(format!("min {min:.1}"), Style::default().fg(TEXT_MUTED)),
    ]);
    frame.render_widget(Paragraph::new(line).alignment(Alignment::Center), chunks[0]);

    draw_progress_bar(frame, chunks[1], progress, color, dim_color);
    draw_detailed_chart(frame, chunks[2], samples, color, unit);
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio * width as f64) as usize).min(width);
    let empty = width.saturating_sub(filled);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

fn draw_sparkline(frame: &mut Frame, area: Rect, data: &[f64], color: Color) {
    if data.is_empty() || area.width < 4 || area.height < 2 {
        return;
    }

    let (min_val, max_val) = data_range(data);
    let range = (max_val - min_val).max(1.0);

    let points: Vec<(f64, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .x_axis(Axis::default().bounds([0.0, data.len() as f64]))
        .y_axis(Axis::default().bounds([min_val - range * 0.1, max_val + range * 0.1]));

    frame.render_widget(chart, area);
}

fn draw_detailed_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color, unit: &str) {
    if data.is_empty() || area.width < 10 || area.height < 3 {
        return;
    }

    let (min_val, max_val) = data_range(data);
    let range = (max_val - min_val).max(0.1);
    let y_min = (min_val - range * 0.1).max(0.0);
    let y_max = max_val + range * 0.1;

    let points: Vec<(f64, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let avg_line: Vec<(f64, f64)> = vec![(0.0, avg), (data.len() as f64, avg)];

    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(color))
            .data(&points),
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(TEXT_MUTED))
            .data(&avg_line),
    ];

    let y_labels = vec![
        Span::styled(format!("{y_min:.0}"), Style::default().fg(TEXT_MUTED)),
        Span::styled(format!("{y_max:.0} {unit}"), Style::default().fg(TEXT_MUTED)),
    ];

    let chart = Chart::new(datasets)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([0.0, data.len() as f64]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([y_min, y_max])
                .labels(y_labels),
        );

    frame.render_widget(chart, area);
}

fn draw_status(frame: &mut Frame, area: Rect, app: &App) {
    let (text, color) = if let Some(error) = &app.error {
        (format!("Error: {error}"), ERROR)
    } else if app.status.is_empty() {
        (String::new(), TEXT_MUTED)
    } else {
        (app.status.clone(), TEXT_SECONDARY)
    };

    frame.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        area,
    );
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.expanded {
        "esc close · q quit"
    } else if app.running {
        "tab select · space expand · esc cancel · q quit"
    } else {
        "enter start · tab select · space expand · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

// Helpers
fn current_download(app: &App) -> f64 {
    match &app.result {
        Some(result) if result.download_mbps > 0.0 => result.download_mbps,
        _ => app.download_samples.last().copied().unwrap_or(0.0),
    }
}

fn current_upload(app: &App) -> f64 {
    match &app.result {
        Some(result) if result.upload_mbps > 0.0 => result.upload_mbps,
        _ => app.upload_samples.last().copied().unwrap_or(0.0),
    }
}

fn current_ping(app: &App) -> f64 {
    match &app.result {
        Some(result) if result.ping_ms > 0.0 => result.ping_ms,
        _ => app.ping_samples.last().copied().unwrap_or(0.0),
    }
}

fn current_jitter(app: &App) -> Option<f64> {
    app.result
        .as_ref()
        .map(|result| result.jitter_ms)
        .filter(|&j| j > 0.0)
}

fn data_range(data: &[f64]) -> (f64, f64) {
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    (
        if min == f64::MAX { 0.0 } else { min },
        if max == f64::MIN { 0.0 } else { max },
    )
}

fn stats(data: &[f64]) -> (f64, f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    (avg, max, min)
}

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{mbps:.1} Mbps")
    } else if mbps > 0.0 {
        format!("{:.0} Kbps", mbps * 1000.0)
    } else {
        "—".to_string()
    }
}
