use crate::engine::dispatcher::ValueSlot;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub type ValueMap = BTreeMap<String, FieldValue>;
pub type ErrorMap = BTreeMap<String, String>;
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// A file picked by a `file` widget, held in memory until it is packed as a binary part.
#[derive(Clone, Debug, PartialEq)]
pub struct FileHandle {
    pub name: String,
    pub content_type: String,
    pub path: Option<PathBuf>,
    pub bytes: Arc<[u8]>,
}

impl FileHandle {
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        Self {
            content_type: guess_content_type(&name).to_string(),
            name,
            path: None,
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let mut handle = Self::from_bytes(name, bytes);
        handle.path = Some(path.to_path_buf());
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn guess_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Tagged value stored per field. The widget kind decides which variant a field holds.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Date(NaiveDate),
    File(FileHandle),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Empty string, empty list and `false` all count as "no value".
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Bool(b) => !*b,
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Date(_) | FieldValue::File(_) => false,
        }
    }

    /// Loose string form used by pattern rules and display.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Text(s) => Cow::Borrowed(s.as_str()),
            FieldValue::Bool(b) => Cow::Owned(b.to_string()),
            FieldValue::Date(d) => Cow::Owned(format_date(d)),
            FieldValue::File(f) => Cow::Borrowed(f.name.as_str()),
            FieldValue::List(items) => Cow::Owned(items.join(",")),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            FieldValue::Bool(b) => *b,
            other => !other.is_blank(),
        }
    }
}

pub fn format_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD` and anything starting with it (RFC 3339 timestamps).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| s.get(..10).and_then(|p| NaiveDate::parse_from_str(p, DATE_FORMAT).ok()))
}

fn scalar_text(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Convert caller-supplied initial data into a stored value.
/// `slot` is the owning field's slot when the key names a descriptor; `null` yields no value.
pub fn value_from_json(slot: Option<ValueSlot>, v: &JsonValue) -> Option<FieldValue> {
    if v.is_null() {
        return None;
    }
    let value = match (slot, v) {
        // Date fields only ever hold dates; unreadable seed text is dropped.
        (Some(ValueSlot::Date), JsonValue::String(s)) => FieldValue::Date(parse_date(s)?),
        (Some(ValueSlot::Date), _) => return None,
        (Some(ValueSlot::Bool), JsonValue::String(s)) => match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => FieldValue::Bool(true),
            "0" | "false" | "off" | "no" | "" => FieldValue::Bool(false),
            _ => FieldValue::Text(s.clone()),
        },
        (Some(ValueSlot::Bool), JsonValue::Number(n)) => {
            FieldValue::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))
        }
        (Some(ValueSlot::List), JsonValue::String(s)) => {
            if s.is_empty() {
                FieldValue::List(Vec::new())
            } else {
                FieldValue::List(vec![s.clone()])
            }
        }
        (_, JsonValue::Bool(b)) => FieldValue::Bool(*b),
        (_, JsonValue::String(s)) => FieldValue::Text(s.clone()),
        (_, JsonValue::Number(n)) => FieldValue::Text(n.to_string()),
        (_, JsonValue::Array(items)) => FieldValue::List(
            items
                .iter()
                .filter(|x| !x.is_null())
                .map(scalar_text)
                .collect(),
        ),
        (_, other) => FieldValue::Text(other.to_string()),
    };
    Some(value)
}

/// Convert a stored value into the JSON handed back to the caller in a result record.
pub fn value_to_json(v: &FieldValue) -> JsonValue {
    match v {
        FieldValue::Text(s) => JsonValue::String(s.clone()),
        FieldValue::Bool(b) => JsonValue::Bool(*b),
        FieldValue::Date(d) => JsonValue::String(format_date(d)),
        FieldValue::File(f) => JsonValue::String(f.name.clone()),
        FieldValue::List(items) => {
            JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
        }
    }
}
