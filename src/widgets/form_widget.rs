use crate::app::Effect;
use crate::engine::dispatcher::{ChangeEvent, WidgetKind};
use crate::engine::orchestrator::{FormController, Settlement, SubmitError};
use crate::engine::schema::FieldDescriptor;
use crate::engine::value::{FieldValue, FileHandle, JsonMap};
use crate::services::transport::{ServerReply, TransportError};
use crate::ui::ToastLevel;
use crate::widgets::chrome::{centered_rect, panel_block};
use crate::widgets::inputs::{field_lines, FieldView, OPTIONS_VISIBLE};
use crossterm::event::KeyCode;
use ratatui::crossterm::event as rt_event;
use ratatui::prelude::*;
use ratatui::widgets::{Clear, Paragraph};
use std::collections::HashMap;
use tui_textarea::TextArea;

/// Items fetched from a field's read endpoint.
#[derive(Debug, Default, Clone)]
pub struct RemoteOptions {
    pub items: Vec<String>,
    pub loading: bool,
    pub loaded: bool,
    pub error: Option<String>,
}

pub struct FormWidget {
    pub controller: FormController,
    pub title: String,
    pub popup: bool,
    pub editing: bool,
    pub message: Option<String>,
    remote: HashMap<String, RemoteOptions>,
    ta_map: HashMap<String, TextArea<'static>>,
}

fn is_text_like(kind: &WidgetKind) -> bool {
    matches!(
        kind,
        WidgetKind::TextInput
            | WidgetKind::Password
            | WidgetKind::Date
            | WidgetKind::Calendar
            | WidgetKind::File
    )
}

fn toast(text: impl Into<String>, level: ToastLevel, seconds: u64) -> Effect {
    Effect::ShowToast {
        text: text.into(),
        level,
        seconds,
    }
}

fn textarea_for(label: &str, text: &str) -> TextArea<'static> {
    let mut ta = TextArea::default();
    if !text.is_empty() {
        ta.insert_str(text);
    }
    ta.set_block(
        ratatui::widgets::Block::default()
            .borders(ratatui::widgets::Borders::ALL)
            .title(format!("Editing: {label} · Ctrl+S Save · Esc Cancel")),
    );
    ta
}

impl FormWidget {
    pub fn new(controller: FormController, title: impl Into<String>, popup: bool) -> Self {
        Self {
            controller,
            title: title.into(),
            popup,
            editing: false,
            message: None,
            remote: HashMap::new(),
            ta_map: HashMap::new(),
        }
    }

    /// Start a session; remote dropdowns that have not loaded yet are requested.
    pub fn open(&mut self, initial: JsonMap) -> Vec<Effect> {
        self.controller.open(initial);
        self.editing = false;
        self.message = None;
        self.ta_map.clear();
        self.skip_unrendered(true);
        let remote_fields: Vec<FieldDescriptor> = self
            .controller
            .fields()
            .filter(|f| f.kind.is_remote())
            .cloned()
            .collect();
        remote_fields
            .iter()
            .filter_map(|f| self.load_effect(f, false))
            .collect()
    }

    pub fn cancel(&mut self) {
        self.controller.cancel();
        self.editing = false;
        self.message = None;
        self.ta_map.clear();
    }

    fn focused_field(&self) -> Option<FieldDescriptor> {
        let id = self.controller.focused()?;
        self.controller.field(id).cloned()
    }

    /// Local items unless the read endpoint answered with a non-empty list.
    pub fn options_for(&self, field: &FieldDescriptor) -> Vec<String> {
        match self.remote.get(&field.id) {
            Some(r) if field.kind.is_remote() && r.loaded && !r.items.is_empty() => r.items.clone(),
            _ => field.options.clone(),
        }
    }

    pub fn remote(&self, id: &str) -> Option<&RemoteOptions> {
        self.remote.get(id)
    }

    fn load_effect(&mut self, field: &FieldDescriptor, force: bool) -> Option<Effect> {
        if !field.kind.is_remote() {
            return None;
        }
        let endpoint = field.read_api.clone().filter(|e| !e.trim().is_empty())?;
        let entry = self.remote.entry(field.id.clone()).or_default();
        if entry.loading || (entry.loaded && !force) {
            return None;
        }
        entry.loading = true;
        Some(Effect::LoadOptions {
            field: field.id.clone(),
            endpoint,
            api_key: field.api_key.clone(),
        })
    }

    /// Store a finished option load. Returns the item count or the load error.
    pub fn apply_options(
        &mut self,
        field: &str,
        outcome: Result<Vec<String>, String>,
    ) -> Result<usize, String> {
        let entry = self.remote.entry(field.to_string()).or_default();
        entry.loading = false;
        entry.loaded = true;
        match outcome {
            Ok(items) => {
                let n = items.len();
                entry.items = items;
                entry.error = None;
                Ok(n)
            }
            Err(e) => {
                entry.error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn move_focus(&mut self, forward: bool) -> Vec<Effect> {
        self.controller.focus_step(forward);
        self.skip_unrendered(forward);
        match self.focused_field() {
            Some(f) => self.load_effect(&f, false).into_iter().collect(),
            None => Vec::new(),
        }
    }

    // Fields with an unknown widget draw nothing and cannot hold focus.
    fn skip_unrendered(&mut self, forward: bool) {
        let total = self.controller.fields().count();
        for _ in 0..total {
            match self.focused_field() {
                Some(f) if !f.kind.is_known() => self.controller.focus_step(forward),
                _ => break,
            }
        }
    }

    fn begin_edit(&mut self, field: &FieldDescriptor) -> Vec<Effect> {
        let current = self.controller.value(&field.id).cloned();
        match &field.kind {
            WidgetKind::Switch | WidgetKind::Checkbox => {
                let on = current.map(|v| v.as_bool()).unwrap_or(false);
                self.emit(&field.id, ChangeEvent::input(FieldValue::Bool(!on)));
            }
            WidgetKind::TextArea => {
                let text = current.map(|v| v.as_text().into_owned()).unwrap_or_default();
                self.ta_map
                    .insert(field.id.clone(), textarea_for(&field.label, &text));
                self.editing = true;
            }
            k if is_text_like(k) => {
                let text = match current {
                    Some(FieldValue::File(h)) => h
                        .path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or(h.name),
                    Some(v) => v.as_text().into_owned(),
                    None => String::new(),
                };
                self.controller.refs_mut().slot_mut(&field.id).buffer = text;
                self.editing = true;
            }
            WidgetKind::Dropdown | WidgetKind::DropdownRead => {
                let options = self.options_for(field);
                let cur = current.map(|v| v.as_text().into_owned()).unwrap_or_default();
                let cursor = options.iter().position(|o| *o == cur).unwrap_or(0);
                let slot = self.controller.refs_mut().slot_mut(&field.id);
                slot.cursor = cursor;
                slot.offset = cursor.saturating_sub(OPTIONS_VISIBLE - 1);
                self.editing = true;
            }
            k if k.is_multiple() => {
                self.editing = true;
            }
            _ => {}
        }
        self.load_effect(field, false).into_iter().collect()
    }

    fn emit(&mut self, id: &str, event: ChangeEvent) {
        if let Err(e) = self.controller.change_event(id, event) {
            tracing::warn!(field = id, error = %e, "widget emitted a value its kind cannot hold");
        }
    }

    fn commit_text(&mut self, field: &FieldDescriptor) -> Vec<Effect> {
        let buffer = self
            .controller
            .refs()
            .get(&field.id)
            .map(|s| s.buffer.clone())
            .unwrap_or_default();
        if field.kind.is_file() {
            let path = buffer.trim();
            if path.is_empty() {
                self.emit(&field.id, ChangeEvent::File(None));
            } else {
                match FileHandle::from_path(path) {
                    Ok(h) => self.emit(&field.id, ChangeEvent::File(Some(h))),
                    Err(e) => {
                        let msg = format!("Cannot read {path}: {e}");
                        self.message = Some(msg.clone());
                        return vec![toast(msg, ToastLevel::Error, 4)];
                    }
                }
            }
        } else if let Err(e) = self
            .controller
            .change_event(&field.id, ChangeEvent::input(FieldValue::Text(buffer)))
        {
            // Editor stays open so the text can be corrected.
            let msg = format!("{}: {e}", field.label);
            self.message = Some(msg.clone());
            return vec![toast(msg, ToastLevel::Error, 4)];
        }
        self.editing = false;
        self.message = None;
        Vec::new()
    }

    /// Save the open textarea editor into the value map.
    pub fn commit_textarea(&mut self) -> bool {
        if !self.editing {
            return false;
        }
        let Some(field) = self.focused_field() else {
            return false;
        };
        if !matches!(field.kind, WidgetKind::TextArea) {
            return false;
        }
        let Some(ta) = self.ta_map.get(&field.id) else {
            return false;
        };
        let text = ta.lines().join("\n");
        self.emit(&field.id, ChangeEvent::input(FieldValue::Text(text)));
        self.editing = false;
        true
    }

    fn commit_pending(&mut self) -> Vec<Effect> {
        if !self.editing {
            return Vec::new();
        }
        match self.focused_field() {
            Some(f) if matches!(f.kind, WidgetKind::TextArea) => {
                self.commit_textarea();
                Vec::new()
            }
            Some(f) if is_text_like(&f.kind) => self.commit_text(&f),
            _ => {
                self.editing = false;
                Vec::new()
            }
        }
    }

    fn move_cursor(&mut self, field: &FieldDescriptor, down: bool) {
        let len = self.options_for(field).len();
        let slot = self.controller.refs_mut().slot_mut(&field.id);
        if down {
            if slot.cursor + 1 < len {
                slot.cursor += 1;
            }
        } else {
            slot.cursor = slot.cursor.saturating_sub(1);
        }
        if slot.cursor < slot.offset {
            slot.offset = slot.cursor;
        } else if slot.cursor >= slot.offset + OPTIONS_VISIBLE {
            slot.offset = slot.cursor + 1 - OPTIONS_VISIBLE;
        }
    }

    fn pick_option(&mut self, field: &FieldDescriptor) {
        let options = self.options_for(field);
        let cursor = self
            .controller
            .refs()
            .get(&field.id)
            .map(|s| s.cursor)
            .unwrap_or(0);
        let Some(opt) = options.get(cursor).cloned() else {
            return;
        };
        if field.kind.is_multiple() {
            let mut chosen = match self.controller.value(&field.id) {
                Some(FieldValue::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            if let Some(pos) = chosen.iter().position(|c| *c == opt) {
                chosen.remove(pos);
            } else {
                chosen.push(opt);
            }
            self.emit(&field.id, ChangeEvent::Value(FieldValue::List(chosen)));
        } else {
            self.emit(&field.id, ChangeEvent::input(FieldValue::Text(opt)));
            self.editing = false;
        }
    }

    /// Validate and hand the request to the app; local failures become a toast.
    pub fn submit(&mut self) -> Vec<Effect> {
        let mut effects = self.commit_pending();
        if !effects.is_empty() {
            return effects;
        }
        match self.controller.submit() {
            Ok(dispatch) => {
                self.editing = false;
                self.message = Some("Submitting...".into());
                effects.push(Effect::Dispatch(dispatch));
            }
            Err(SubmitError::Invalid(errors)) => {
                let first = self
                    .controller
                    .fields()
                    .find(|f| errors.contains_key(&f.id))
                    .map(|f| f.id.clone());
                if let Some(first) = first {
                    self.controller.focus(&first);
                }
                self.message = Some(format!("{} field(s) need attention", errors.len()));
                effects.push(toast(
                    "Please fix the highlighted errors",
                    ToastLevel::Error,
                    3,
                ));
            }
            Err(SubmitError::InFlight) => {
                effects.push(toast("Already submitting", ToastLevel::Info, 2));
            }
            Err(SubmitError::Closed) => {}
        }
        effects
    }

    /// Apply the transport's answer and keep the widget state in line with the controller.
    pub fn settle(
        &mut self,
        ticket: u64,
        outcome: Result<ServerReply, TransportError>,
    ) -> Settlement {
        let settlement = self.controller.settle(ticket, outcome);
        match &settlement {
            Settlement::Saved(_) => {
                self.editing = false;
                self.message = None;
                self.ta_map.clear();
            }
            Settlement::Rejected { alert } => {
                self.message = Some(alert.clone());
            }
            Settlement::Stale => {}
        }
        settlement
    }

    fn on_key_editing(&mut self, field: &FieldDescriptor, key: KeyCode) -> Vec<Effect> {
        if key == KeyCode::Esc {
            self.editing = false;
            self.message = None;
            return Vec::new();
        }
        match &field.kind {
            WidgetKind::TextArea => {
                if let Some(ta) = self.ta_map.get_mut(&field.id) {
                    let code = match key {
                        KeyCode::Char(c) => rt_event::KeyCode::Char(c),
                        KeyCode::Enter => rt_event::KeyCode::Enter,
                        KeyCode::Backspace => rt_event::KeyCode::Backspace,
                        KeyCode::Delete => rt_event::KeyCode::Delete,
                        KeyCode::Left => rt_event::KeyCode::Left,
                        KeyCode::Right => rt_event::KeyCode::Right,
                        KeyCode::Up => rt_event::KeyCode::Up,
                        KeyCode::Down => rt_event::KeyCode::Down,
                        KeyCode::Home => rt_event::KeyCode::Home,
                        KeyCode::End => rt_event::KeyCode::End,
                        KeyCode::Tab => rt_event::KeyCode::Tab,
                        _ => return Vec::new(),
                    };
                    let _ = ta.input(rt_event::KeyEvent::new(code, rt_event::KeyModifiers::NONE));
                }
                Vec::new()
            }
            k if is_text_like(k) => match key {
                KeyCode::Char(c) => {
                    self.controller.refs_mut().slot_mut(&field.id).buffer.push(c);
                    Vec::new()
                }
                KeyCode::Backspace => {
                    self.controller.refs_mut().slot_mut(&field.id).buffer.pop();
                    Vec::new()
                }
                KeyCode::Enter => self.commit_text(field),
                KeyCode::Tab | KeyCode::BackTab => {
                    let mut effects = self.commit_text(field);
                    if !self.editing {
                        effects.extend(self.move_focus(key == KeyCode::Tab));
                    }
                    effects
                }
                _ => Vec::new(),
            },
            _ => match key {
                KeyCode::Up => {
                    self.move_cursor(field, false);
                    Vec::new()
                }
                KeyCode::Down => {
                    self.move_cursor(field, true);
                    Vec::new()
                }
                KeyCode::Enter | KeyCode::Char(' ') => {
                    self.pick_option(field);
                    Vec::new()
                }
                KeyCode::Tab | KeyCode::BackTab => {
                    self.editing = false;
                    self.move_focus(key == KeyCode::Tab)
                }
                _ => Vec::new(),
            },
        }
    }
}

impl crate::widgets::Widget for FormWidget {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        if !self.controller.is_open() {
            return;
        }
        let cursor_on = tick % 2 == 0;
        let rect = if self.popup {
            let r = centered_rect(70, 80, area);
            f.render_widget(Clear, r);
            r
        } else {
            area
        };
        let ctrl = &self.controller;
        let mut lines: Vec<Line> = Vec::new();
        let mut focus_line = 0usize;
        for group in ctrl.groups() {
            if !group.title.is_empty() {
                lines.push(Line::from(Span::styled(
                    format!("-- {} --", group.title),
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                )));
            }
            for fld in &group.fields {
                let is_focused = ctrl.focused() == Some(fld.id.as_str());
                if is_focused {
                    focus_line = lines.len();
                }
                let options = self.options_for(fld);
                let view = FieldView {
                    field: fld,
                    value: ctrl.value(&fld.id),
                    error: ctrl.error(&fld.id),
                    options: &options,
                    slot: ctrl.refs().get(&fld.id),
                    focused: is_focused,
                    editing: is_focused && self.editing,
                    cursor_on: cursor_on && focused,
                    loading: self.remote.get(&fld.id).map(|r| r.loading).unwrap_or(false),
                    load_error: self.remote.get(&fld.id).and_then(|r| r.error.as_deref()),
                };
                lines.extend(field_lines(&view));
            }
        }
        lines.push(Line::from(""));
        let save_style = if ctrl.is_submitting() {
            crate::theme::text_muted()
        } else {
            crate::theme::text_active_bold()
        };
        lines.push(Line::from(vec![
            Span::styled("  [ Ctrl+S Save ]  ", save_style),
            Span::styled("Esc Cancel", crate::theme::text_muted()),
        ]));
        if let Some(msg) = &self.message {
            for l in msg.lines() {
                lines.push(Line::from(Span::styled(
                    l.to_string(),
                    crate::theme::text_muted(),
                )));
            }
        }
        let verb = if ctrl.is_update() { "Update" } else { "Create" };
        let mut title = format!("{verb} {}", self.title);
        if ctrl.is_submitting() {
            title.push_str(" · submitting");
        } else if self.editing {
            title.push_str(" · editing");
        }
        let inner_h = rect.height.saturating_sub(2) as usize;
        let lookahead = OPTIONS_VISIBLE + 2;
        let scroll = (focus_line + lookahead).saturating_sub(inner_h);
        let p = Paragraph::new(lines)
            .block(panel_block(&title, focused))
            .scroll((scroll.min(u16::MAX as usize) as u16, 0));
        f.render_widget(p, rect);

        if self.editing {
            if let Some(fld) = self.focused_field() {
                if let Some(ta) = self.ta_map.get(&fld.id) {
                    let r = centered_rect(80, 70, rect);
                    f.render_widget(Clear, r);
                    f.render_widget(ta, r);
                }
            }
        }
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        if !self.controller.is_open() {
            return Vec::new();
        }
        if self.controller.is_submitting() {
            if key == KeyCode::Esc {
                self.cancel();
                return vec![toast("Discarded changes", ToastLevel::Info, 2)];
            }
            return Vec::new();
        }
        let Some(field) = self.focused_field() else {
            if key == KeyCode::Esc {
                self.cancel();
            }
            return Vec::new();
        };
        if self.editing {
            return self.on_key_editing(&field, key);
        }
        match key {
            KeyCode::Tab | KeyCode::Down => self.move_focus(true),
            KeyCode::BackTab | KeyCode::Up => self.move_focus(false),
            KeyCode::Enter => self.begin_edit(&field),
            KeyCode::Char(' ') if matches!(field.kind, WidgetKind::Switch | WidgetKind::Checkbox) => {
                self.begin_edit(&field)
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.load_effect(&field, true).into_iter().collect()
            }
            KeyCode::Delete => {
                self.controller.change_field(&field.id, None);
                Vec::new()
            }
            KeyCode::Esc => {
                self.cancel();
                vec![toast("Discarded changes", ToastLevel::Info, 2)]
            }
            _ => Vec::new(),
        }
    }
}
