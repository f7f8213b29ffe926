use crate::engine::dispatcher::{FieldRef, WidgetKind};
use crate::engine::schema::FieldDescriptor;
use crate::engine::value::{format_date, FieldValue};
use ratatui::prelude::*;

pub const OPTIONS_VISIBLE: usize = 6;
const TEXTAREA_PREVIEW_LINES: usize = 3;

/// Everything needed to draw one field.
pub struct FieldView<'a> {
    pub field: &'a FieldDescriptor,
    pub value: Option<&'a FieldValue>,
    pub error: Option<&'a str>,
    pub options: &'a [String],
    pub slot: Option<&'a FieldRef>,
    pub focused: bool,
    pub editing: bool,
    pub cursor_on: bool,
    pub loading: bool,
    pub load_error: Option<&'a str>,
}

impl FieldView<'_> {
    fn marker(&self) -> char {
        if self.focused {
            '›'
        } else {
            ' '
        }
    }

    fn label(&self) -> String {
        let req = if self.field.err_msg.is_empty() { "" } else { " *" };
        format!("{} {}{req}: ", self.marker(), self.field.label)
    }

    fn value_style(&self) -> Style {
        if self.focused && self.editing {
            crate::theme::text_editing_bold()
        } else if self.focused {
            crate::theme::text_active_bold()
        } else {
            Style::default()
        }
    }

    fn buffer(&self) -> &str {
        self.slot.map(|s| s.buffer.as_str()).unwrap_or("")
    }

    fn with_cursor(&self, mut s: String) -> String {
        if self.focused && self.editing && self.cursor_on {
            s.push('▏');
        }
        s
    }

    fn list_items(&self) -> Vec<String> {
        match self.value {
            Some(FieldValue::List(items)) => items.clone(),
            Some(FieldValue::Text(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// Lines for one field, chosen by its widget kind. Unknown kinds draw nothing.
pub fn field_lines(v: &FieldView<'_>) -> Vec<Line<'static>> {
    let mut lines = match &v.field.kind {
        WidgetKind::Unknown(_) => return Vec::new(),
        WidgetKind::TextInput => text_line(v, None),
        WidgetKind::Date => text_line(v, Some("YYYY-MM-DD")),
        WidgetKind::Calendar => text_line(v, Some("pick a day, YYYY-MM-DD")),
        WidgetKind::Password => password_line(v),
        WidgetKind::TextArea => textarea_lines(v),
        WidgetKind::Switch => {
            let on = v.value.map(FieldValue::as_bool).unwrap_or(false);
            let (txt, st) = if on {
                ("● Active", crate::theme::text_success())
            } else {
                ("○ Inactive", crate::theme::text_muted())
            };
            let st = if v.focused { st.add_modifier(Modifier::BOLD) } else { st };
            vec![Line::from(vec![
                Span::raw(v.label()),
                Span::styled(txt.to_string(), st),
            ])]
        }
        WidgetKind::Checkbox => {
            let on = v.value.map(FieldValue::as_bool).unwrap_or(false);
            vec![Line::from(vec![
                Span::raw(v.label()),
                Span::styled(if on { "[x]" } else { "[ ]" }.to_string(), v.value_style()),
            ])]
        }
        WidgetKind::File => file_line(v),
        WidgetKind::Dropdown | WidgetKind::DropdownRead => single_choice_lines(v),
        WidgetKind::DropdownMultiple
        | WidgetKind::DropdownReadMultiple
        | WidgetKind::MultiCheckbox => multi_choice_lines(v),
    };
    if let Some(err) = v.error {
        lines.push(Line::from(Span::styled(
            format!("  ! {err}"),
            crate::theme::text_error(),
        )));
    }
    lines
}

fn text_line(v: &FieldView<'_>, placeholder: Option<&str>) -> Vec<Line<'static>> {
    let shown = if v.focused && v.editing {
        v.with_cursor(v.buffer().to_string())
    } else {
        match v.value {
            Some(FieldValue::Date(d)) => format_date(d),
            Some(other) => other.as_text().into_owned(),
            None => String::new(),
        }
    };
    let mut spans = vec![Span::raw(v.label()), Span::styled(shown.clone(), v.value_style())];
    if shown.is_empty() {
        if let Some(p) = placeholder {
            spans.push(Span::styled(p.to_string(), crate::theme::text_muted()));
        }
    }
    vec![Line::from(spans)]
}

fn password_line(v: &FieldView<'_>) -> Vec<Line<'static>> {
    let n = if v.focused && v.editing {
        v.buffer().chars().count()
    } else {
        v.value.map(|x| x.as_text().chars().count()).unwrap_or(0)
    };
    let masked = v.with_cursor("•".repeat(n));
    vec![Line::from(vec![
        Span::raw(v.label()),
        Span::styled(masked, v.value_style()),
    ])]
}

fn textarea_lines(v: &FieldView<'_>) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::raw(v.label().trim_end().to_string()))];
    let text = v.value.map(|x| x.as_text().into_owned()).unwrap_or_default();
    let body: Vec<&str> = if text.is_empty() { vec![""] } else { text.lines().collect() };
    for bl in body.iter().take(TEXTAREA_PREVIEW_LINES) {
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(bl.to_string(), v.value_style()),
        ]));
    }
    if body.len() > TEXTAREA_PREVIEW_LINES {
        let more = body.len() - TEXTAREA_PREVIEW_LINES;
        lines.push(Line::from(Span::styled(
            format!("  … ({} more line{})", more, if more == 1 { "" } else { "s" }),
            crate::theme::text_muted(),
        )));
    }
    lines
}

fn file_line(v: &FieldView<'_>) -> Vec<Line<'static>> {
    let shown = if v.focused && v.editing {
        v.with_cursor(v.buffer().to_string())
    } else {
        match v.value {
            Some(FieldValue::File(h)) => format!("{} ({} bytes, {})", h.name, h.len(), h.content_type),
            Some(other) => other.as_text().into_owned(),
            None => String::new(),
        }
    };
    let mut spans = vec![Span::raw(v.label()), Span::styled(shown.clone(), v.value_style())];
    if shown.is_empty() {
        spans.push(Span::styled(
            "(no file, Enter to type a path)".to_string(),
            crate::theme::text_muted(),
        ));
    }
    vec![Line::from(spans)]
}

fn option_window(v: &FieldView<'_>) -> (usize, usize, usize) {
    let cursor = v.slot.map(|s| s.cursor).unwrap_or(0);
    let offset = v.slot.map(|s| s.offset).unwrap_or(0);
    let start = offset.min(v.options.len());
    let end = (start + OPTIONS_VISIBLE).min(v.options.len());
    (cursor, start, end)
}

fn loading_suffix(v: &FieldView<'_>) -> Option<Span<'static>> {
    if v.loading {
        Some(Span::styled("  loading…".to_string(), crate::theme::text_muted()))
    } else if let Some(e) = v.load_error {
        Some(Span::styled(
            format!("  (options unavailable: {e}, r to retry)"),
            crate::theme::text_error(),
        ))
    } else {
        None
    }
}

fn single_choice_lines(v: &FieldView<'_>) -> Vec<Line<'static>> {
    let current = v.value.map(|x| x.as_text().into_owned()).unwrap_or_default();
    let summary = if current.is_empty() { "(none)".to_string() } else { current.clone() };
    let mut header = vec![Span::raw(v.label()), Span::styled(summary, v.value_style())];
    header.extend(loading_suffix(v));
    let mut lines = vec![Line::from(header)];
    if v.focused && v.editing {
        let (cursor, start, end) = option_window(v);
        for (oi, opt) in v.options.iter().enumerate().take(end).skip(start) {
            let mark = if *opt == current { "(•)" } else { "( )" };
            let cur = if oi == cursor { '›' } else { ' ' };
            let st = if oi == cursor {
                crate::theme::list_cursor_style()
            } else {
                crate::theme::text_muted()
            };
            lines.push(Line::from(Span::styled(format!("  {cur} {mark} {opt}"), st)));
        }
        if v.options.is_empty() && !v.loading {
            lines.push(Line::from(Span::styled(
                "  (no options)".to_string(),
                crate::theme::text_muted(),
            )));
        }
    }
    lines
}

fn multi_choice_lines(v: &FieldView<'_>) -> Vec<Line<'static>> {
    let chosen = v.list_items();
    let summary = if chosen.is_empty() {
        "0 selected".to_string()
    } else {
        format!("{} selected: {}", chosen.len(), chosen.join(", "))
    };
    let mut header = vec![Span::raw(v.label()), Span::styled(summary, v.value_style())];
    header.extend(loading_suffix(v));
    let mut lines = vec![Line::from(header)];
    let always_open = matches!(v.field.kind, WidgetKind::MultiCheckbox) && v.focused;
    if (v.focused && v.editing) || always_open {
        let (cursor, start, end) = option_window(v);
        for (oi, opt) in v.options.iter().enumerate().take(end).skip(start) {
            let chk = if chosen.contains(opt) { "[x]" } else { "[ ]" };
            let cur = if oi == cursor && v.editing { '›' } else { ' ' };
            let st = if oi == cursor && v.editing {
                crate::theme::list_cursor_style()
            } else {
                crate::theme::text_muted()
            };
            lines.push(Line::from(Span::styled(format!("  {cur} {chk} {opt}"), st)));
        }
    }
    lines
}
