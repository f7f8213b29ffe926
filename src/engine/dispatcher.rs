use crate::engine::value::{parse_date, FieldValue, FileHandle};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Widget tag selecting which input renders a field.
/// Unrecognized tags are kept as `Unknown` and render nothing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum WidgetKind {
    TextInput,
    TextArea,
    Dropdown,
    DropdownMultiple,
    DropdownRead,
    DropdownReadMultiple,
    Switch,
    Checkbox,
    MultiCheckbox,
    Password,
    Date,
    Calendar,
    File,
    Unknown(String),
}

impl From<String> for WidgetKind {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl WidgetKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "textinput" => WidgetKind::TextInput,
            "textarea" => WidgetKind::TextArea,
            "dropdown" => WidgetKind::Dropdown,
            "dropdownmultiple" => WidgetKind::DropdownMultiple,
            "dropdownread" => WidgetKind::DropdownRead,
            "dropdownreadmultiple" => WidgetKind::DropdownReadMultiple,
            "switch" => WidgetKind::Switch,
            "checkbox" => WidgetKind::Checkbox,
            "multicheckbox" => WidgetKind::MultiCheckbox,
            "password" => WidgetKind::Password,
            "date" => WidgetKind::Date,
            "calendar" => WidgetKind::Calendar,
            "file" => WidgetKind::File,
            _ => WidgetKind::Unknown(tag.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            WidgetKind::TextInput => "textinput",
            WidgetKind::TextArea => "textarea",
            WidgetKind::Dropdown => "dropdown",
            WidgetKind::DropdownMultiple => "dropdownmultiple",
            WidgetKind::DropdownRead => "dropdownread",
            WidgetKind::DropdownReadMultiple => "dropdownreadmultiple",
            WidgetKind::Switch => "switch",
            WidgetKind::Checkbox => "checkbox",
            WidgetKind::MultiCheckbox => "multicheckbox",
            WidgetKind::Password => "password",
            WidgetKind::Date => "date",
            WidgetKind::Calendar => "calendar",
            WidgetKind::File => "file",
            WidgetKind::Unknown(tag) => tag.as_str(),
        }
    }

    /// The stored value type. Dispatcher writes and serializer reads must agree on it.
    pub fn slot(&self) -> ValueSlot {
        match self {
            WidgetKind::Switch | WidgetKind::Checkbox => ValueSlot::Bool,
            WidgetKind::Date | WidgetKind::Calendar => ValueSlot::Date,
            WidgetKind::File => ValueSlot::File,
            WidgetKind::DropdownMultiple
            | WidgetKind::DropdownReadMultiple
            | WidgetKind::MultiCheckbox => ValueSlot::List,
            WidgetKind::TextInput
            | WidgetKind::TextArea
            | WidgetKind::Dropdown
            | WidgetKind::DropdownRead
            | WidgetKind::Password
            | WidgetKind::Unknown(_) => ValueSlot::Text,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, WidgetKind::Unknown(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, WidgetKind::File)
    }

    /// Kinds that pick from an `items` list.
    pub fn is_choice(&self) -> bool {
        matches!(
            self,
            WidgetKind::Dropdown
                | WidgetKind::DropdownMultiple
                | WidgetKind::DropdownRead
                | WidgetKind::DropdownReadMultiple
                | WidgetKind::MultiCheckbox
        )
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self.slot(), ValueSlot::List)
    }

    /// Choice kinds whose items may come from `readEndpoint`.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            WidgetKind::DropdownRead | WidgetKind::DropdownReadMultiple
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSlot {
    Text,
    Bool,
    Date,
    File,
    List,
}

/// What a widget emits on change: a bare value, an event-shaped object, or a file selection.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    Value(FieldValue),
    Event {
        target_value: Option<FieldValue>,
        raw: FieldValue,
    },
    File(Option<FileHandle>),
}

impl ChangeEvent {
    /// An input event carrying `.target.value`.
    pub fn input(value: FieldValue) -> Self {
        ChangeEvent::Event {
            target_value: Some(value.clone()),
            raw: value,
        }
    }
}

/// Collapse a raw widget emission into a domain value.
/// File widgets pass their selection straight through; every other kind prefers
/// `.target.value` and falls back to the emitted value. `None` clears the field.
pub fn normalize(kind: &WidgetKind, event: ChangeEvent) -> Option<FieldValue> {
    match event {
        ChangeEvent::File(selection) => selection.map(FieldValue::File),
        ChangeEvent::Value(v) => Some(v),
        ChangeEvent::Event { raw, .. } if kind.is_file() => Some(raw),
        ChangeEvent::Event {
            target_value: Some(v),
            ..
        } => Some(v),
        ChangeEvent::Event {
            target_value: None,
            raw,
        } => Some(raw),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoerceError {
    #[error("{0:?} is not a date (expected YYYY-MM-DD)")]
    NotADate(String),
    #[error("{0:?} is not a yes/no value")]
    NotABool(String),
}

/// Bring text typed into a terminal input into the slot's type.
/// Blank date text clears the field (`Ok(None)`); text that cannot become the
/// slot's type is rejected so the value map only holds what the kind allows.
pub fn coerce(slot: ValueSlot, value: FieldValue) -> Result<Option<FieldValue>, CoerceError> {
    let v = match (slot, value) {
        (ValueSlot::Date, FieldValue::Text(s)) if s.trim().is_empty() => return Ok(None),
        (ValueSlot::Date, FieldValue::Text(s)) => match parse_date(&s) {
            Some(d) => FieldValue::Date(d),
            None => return Err(CoerceError::NotADate(s)),
        },
        (ValueSlot::Bool, FieldValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => FieldValue::Bool(true),
            "0" | "false" | "off" | "no" | "" => FieldValue::Bool(false),
            _ => return Err(CoerceError::NotABool(s)),
        },
        (ValueSlot::List, FieldValue::Text(s)) => FieldValue::List(
            s.split(',')
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
                .collect(),
        ),
        (_, v) => v,
    };
    Ok(Some(v))
}

/// Per-field mutable slot retained across renders (cursor, scroll, edit buffer).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldRef {
    pub cursor: usize,
    pub offset: usize,
    pub buffer: String,
}

#[derive(Debug, Default)]
pub struct RefTable {
    slots: HashMap<String, FieldRef>,
}

impl RefTable {
    pub fn get(&self, id: &str) -> Option<&FieldRef> {
        self.slots.get(id)
    }

    pub fn slot_mut(&mut self, id: &str) -> &mut FieldRef {
        self.slots.entry(id.to_string()).or_default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
