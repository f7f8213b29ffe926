use crate::engine::schema::{flatten_fields, FieldDescriptor, FieldGroup};
use crate::engine::value::{ErrorMap, FieldValue, ValueMap};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, OnceLock};

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static PHONE_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"))
}

fn phone_re() -> &'static Regex {
    PHONE_RE.get_or_init(|| Regex::new(r"^[6-9]\d{9}$").expect("phone regex"))
}

/// Programmatic predicate; returns true when the value is acceptable.
#[derive(Clone)]
pub struct CustomCheck(pub Arc<dyn Fn(&FieldValue) -> bool + Send + Sync>);

impl fmt::Debug for CustomCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomCheck(..)")
    }
}

/// Regex rule compiled once when the descriptor is built or deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "String")]
pub struct PatternRule {
    pub source: String,
    compiled: Result<Regex, String>,
}

impl PatternRule {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&source).map_err(|e| e.to_string());
        Self { source, compiled }
    }

    pub fn regex(&self) -> Option<&Regex> {
        self.compiled.as_ref().ok()
    }

    /// Compile error, reported by config validation.
    pub fn error(&self) -> Option<&str> {
        self.compiled.as_ref().err().map(String::as_str)
    }
}

impl From<String> for PatternRule {
    fn from(s: String) -> Self {
        PatternRule::new(s)
    }
}

/// Explicit validation tag. Every rule starts with the emptiness check.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    Required,
    Email,
    Phone,
    Pattern(PatternRule),
    #[serde(skip)]
    Custom(CustomCheck),
}

impl ValidationRule {
    pub fn pattern(source: impl Into<String>) -> Self {
        ValidationRule::Pattern(PatternRule::new(source))
    }

    pub fn custom(check: impl Fn(&FieldValue) -> bool + Send + Sync + 'static) -> Self {
        ValidationRule::Custom(CustomCheck(Arc::new(check)))
    }
}

fn is_empty(value: Option<&FieldValue>) -> bool {
    value.map(FieldValue::is_blank).unwrap_or(true)
}

/// Decide pass/fail for one field. Returns the descriptor's message on failure.
///
/// A missing value, an empty string or list, and `false` all fail, so a required
/// boolean can only be satisfied by `true`. Without an explicit rule, a label
/// mentioning "email" or "phone" selects the matching shape check.
pub fn validate_field(field: &FieldDescriptor, value: Option<&FieldValue>) -> Option<String> {
    let failed = || Some(field.err_msg.clone());
    if is_empty(value) {
        return failed();
    }
    let value = value?;
    let text = value.as_text();
    match &field.rule {
        None => {
            let label = field.label.to_lowercase();
            if label.contains("email") && !email_re().is_match(&text) {
                return failed();
            }
            if label.contains("phone") && !phone_re().is_match(&text) {
                return failed();
            }
        }
        Some(ValidationRule::Required) => {}
        Some(ValidationRule::Email) => {
            if !email_re().is_match(&text) {
                return failed();
            }
        }
        Some(ValidationRule::Phone) => {
            if !phone_re().is_match(&text) {
                return failed();
            }
        }
        // An uncompilable pattern is rejected at config load; here it checks nothing.
        Some(ValidationRule::Pattern(pat)) => {
            if pat.regex().is_some_and(|re| !re.is_match(&text)) {
                return failed();
            }
        }
        Some(ValidationRule::Custom(check)) => {
            if !(check.0)(value) {
                return failed();
            }
        }
    }
    None
}

/// Check every field across all groups; the map holds one entry per failing field.
/// A failure whose configured message is empty does not block submission.
pub fn validate_all(groups: &[FieldGroup], values: &ValueMap) -> ErrorMap {
    let mut errors = ErrorMap::new();
    for field in flatten_fields(groups) {
        if let Some(msg) = validate_field(field, values.get(&field.id)) {
            if !msg.is_empty() {
                errors.insert(field.id.clone(), msg);
            }
        }
    }
    errors
}
