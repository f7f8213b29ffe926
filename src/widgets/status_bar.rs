use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::*;

use crate::ui::{AppState, ToastLevel, View};

const SPINNER: [&str; 6] = ["⠋", "⠙", "⠸", "⠴", "⠦", "⠇"];

fn toast_tag(level: ToastLevel) -> &'static str {
    match level {
        ToastLevel::Success => "[OK]",
        ToastLevel::Error => "[ERROR]",
        ToastLevel::Info => "[INFO]",
    }
}

pub fn help_text(state: &AppState) -> &'static str {
    match state.view {
        View::Records => "n new  e/Enter edit  c copy  ↑/↓ select  F12 debug  q quit",
        View::Form if state.form.editing => "Enter commit  Esc cancel edit  Ctrl+S save",
        View::Form => "Tab/↑/↓ move  Enter edit/toggle  r reload options  Del clear  Ctrl+S save  Esc discard",
    }
}

pub fn draw_footer(f: &mut Frame, area: Rect, state: &AppState) {
    let mut spans: Vec<Span> = Vec::new();
    if let Some(msg) = &state.status_text {
        let spinner = SPINNER[state.tick as usize % SPINNER.len()];
        spans.push(Span::raw(format!(" {spinner} {msg}")));
        spans.push(Span::raw("  |  "));
    }
    if let Some(t) = &state.toast {
        let color = crate::theme::toast_color(t.level);
        spans.push(Span::styled(
            format!("{} ", toast_tag(t.level)),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
        // Multi-line server alerts collapse onto the single footer row
        let text = t.text.lines().collect::<Vec<_>>().join("; ");
        spans.push(Span::styled(format!("{text}  |  "), Style::default().fg(color)));
    }
    if matches!(state.view, View::Form) && state.form.editing {
        spans.push(Span::styled("editing  |  ", Style::default().fg(Color::Magenta)));
    }
    spans.push(Span::styled(
        help_text(state).to_string(),
        crate::theme::text_muted(),
    ));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
