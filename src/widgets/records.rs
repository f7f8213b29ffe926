use crate::app::Effect;
use crate::engine::value::JsonMap;
use crate::widgets::chrome::panel_block;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::{Paragraph, Wrap};
use serde_json::Value as JsonValue;

/// Saved records handed back by the form, newest last.
pub struct RecordsWidget {
    pub title: String,
    pub records: Vec<JsonMap>,
    pub selected: usize,
}

fn id_of(record: &JsonMap) -> Option<String> {
    match record.get("id")? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn record_label(record: &JsonMap) -> String {
    let id = id_of(record).unwrap_or_else(|| "(no id)".into());
    let first = record
        .iter()
        .filter(|(k, _)| k.as_str() != "id")
        .find_map(|(_, v)| v.as_str().filter(|s| !s.is_empty()));
    match first {
        Some(s) => format!("{id}  {}", s.chars().take(40).collect::<String>()),
        None => id,
    }
}

impl RecordsWidget {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            records: Vec::new(),
            selected: 0,
        }
    }

    /// Replace the record with the same id, or append. The touched record becomes selected.
    pub fn upsert(&mut self, record: JsonMap) -> usize {
        let id = id_of(&record);
        let pos = id
            .as_ref()
            .and_then(|id| self.records.iter().position(|r| id_of(r).as_ref() == Some(id)));
        let idx = match pos {
            Some(i) => {
                self.records[i] = record;
                i
            }
            None => {
                self.records.push(record);
                self.records.len() - 1
            }
        };
        self.selected = idx;
        idx
    }

    pub fn selected_record(&self) -> Option<&JsonMap> {
        self.records.get(self.selected)
    }

    pub fn selected_pretty(&self) -> Option<String> {
        let rec = self.selected_record()?;
        let v = JsonValue::Object(rec.clone());
        Some(serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string()))
    }
}

impl crate::widgets::Widget for RecordsWidget {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, _tick: u64) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);
        let title = format!("{} ({})", self.title, self.records.len());
        let inner_h = cols[0].height.saturating_sub(2) as usize;
        let start = if inner_h > 0 && self.selected >= inner_h {
            self.selected + 1 - inner_h
        } else {
            0
        };
        let mut lines: Vec<Line> = Vec::new();
        if self.records.is_empty() {
            lines.push(Line::from(Span::styled(
                "No records yet. Press n to create one.",
                crate::theme::text_muted(),
            )));
        }
        for (i, rec) in self.records.iter().enumerate().skip(start) {
            let label = record_label(rec);
            if i == self.selected {
                lines.push(Line::from(Span::styled(
                    format!("› {label}"),
                    crate::theme::list_cursor_style(),
                )));
            } else {
                lines.push(Line::from(format!("  {label}")));
            }
        }
        f.render_widget(
            Paragraph::new(lines).block(panel_block(&title, focused)),
            cols[0],
        );
        let body = self.selected_pretty().unwrap_or_default();
        f.render_widget(
            Paragraph::new(body)
                .block(panel_block("Record", false))
                .wrap(Wrap { trim: false }),
            cols[1],
        );
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        let last = self.records.len().saturating_sub(1);
        match key {
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => self.selected = (self.selected + 1).min(last),
            KeyCode::Home => self.selected = 0,
            KeyCode::End => self.selected = last,
            _ => {}
        }
        Vec::new()
    }
}
