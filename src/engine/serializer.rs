use crate::engine::value::{format_date, FieldValue, FileHandle, ValueMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value as JsonValue};

pub const MULTIPART_HEADERS: &[(&str, &str)] = &[("Content-Type", "multipart/form-data")];

pub fn multipart_headers() -> Vec<(String, String)> {
    MULTIPART_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub enum Part {
    Text { name: String, value: String },
    Binary { name: String, file: FileHandle },
}

impl Part {
    pub fn name(&self) -> &str {
        match self {
            Part::Text { name, .. } | Part::Binary { name, .. } => name,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Part::Text { value, .. } => Some(value),
            Part::Binary { .. } => None,
        }
    }
}

/// Ordered multi-part body; repeated names are allowed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultipartPayload {
    parts: Vec<Part>,
}

impl MultipartPayload {
    pub fn append_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parts.push(Part::Text {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn append_file(&mut self, name: impl Into<String>, file: FileHandle) {
        self.parts.push(Part::Binary {
            name: name.into(),
            file,
        });
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Part> + 'a {
        self.parts.iter().filter(move |p| p.name() == name)
    }

    pub fn texts(&self, name: &str) -> Vec<&str> {
        self.parts
            .iter()
            .filter(|p| p.name() == name)
            .filter_map(Part::text)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parts.iter().any(|p| p.name() == name)
    }

    /// JSON description handed to command-line backends on stdin.
    /// Binary parts carry metadata and the source path. Files without a path
    /// (built from memory) carry their bytes as base64 in `data`.
    pub fn to_json(&self) -> JsonValue {
        let parts: Vec<JsonValue> = self
            .parts
            .iter()
            .map(|p| match p {
                Part::Text { name, value } => json!({"name": name, "value": value}),
                Part::Binary { name, file } => {
                    let mut part = json!({
                        "name": name,
                        "filename": file.name,
                        "content_type": file.content_type,
                        "size": file.len(),
                        "path": file.path.as_ref().map(|p| p.display().to_string()),
                    });
                    if file.path.is_none() {
                        part["data"] = JsonValue::String(STANDARD.encode(&file.bytes));
                    }
                    part
                }
            })
            .collect();
        json!({ "parts": parts })
    }
}

/// Pre-pass: every date becomes a `YYYY-MM-DD` string before encoding.
pub fn clean_dates(values: &ValueMap) -> ValueMap {
    values
        .iter()
        .map(|(k, v)| {
            let v = match v {
                FieldValue::Date(d) => FieldValue::Text(format_date(d)),
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect()
}

/// Encode a cleaned value map.
/// Files become binary parts, lists repeat under `key[]`, booleans become "1"/"0",
/// and empty strings are left out.
pub fn encode(cleaned: &ValueMap) -> MultipartPayload {
    let mut payload = MultipartPayload::default();
    for (key, val) in cleaned {
        match val {
            FieldValue::File(file) => payload.append_file(key.clone(), file.clone()),
            FieldValue::List(items) => {
                let name = format!("{key}[]");
                for item in items {
                    payload.append_text(name.clone(), item.clone());
                }
            }
            FieldValue::Bool(b) => payload.append_text(key.clone(), if *b { "1" } else { "0" }),
            FieldValue::Date(d) => payload.append_text(key.clone(), format_date(d)),
            FieldValue::Text(s) => {
                if !s.is_empty() {
                    payload.append_text(key.clone(), s.clone());
                }
            }
        }
    }
    payload
}
