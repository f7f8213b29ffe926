use crate::engine::dispatcher::WidgetKind;
use crate::engine::validation::ValidationRule;
use serde::Deserialize;

/// Static declaration of one form input. Immutable for the lifetime of a form session.
#[derive(Debug, Deserialize, Clone)]
pub struct FieldDescriptor {
    pub id: String,
    pub label: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: WidgetKind,
    // Static choices for dropdown / multicheckbox kinds
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, alias = "errMsg", alias = "error_message")]
    pub err_msg: String,
    // Remote lookup hints (dropdownread*)
    #[serde(default, alias = "readApi", alias = "read_endpoint")]
    pub read_api: Option<String>,
    #[serde(default, alias = "updateApi", alias = "update_endpoint")]
    pub update_api: Option<String>,
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default, alias = "createKey")]
    pub create_key: Option<String>,
    // Explicit validation tag; when absent the label decides (email/phone)
    #[serde(default)]
    pub rule: Option<ValidationRule>,
}

impl FieldDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: WidgetKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            options: Vec::new(),
            err_msg: String::new(),
            read_api: None,
            update_api: None,
            api_key: None,
            create_key: None,
            rule: None,
        }
    }

    pub fn with_err_msg(mut self, msg: impl Into<String>) -> Self {
        self.err_msg = msg.into();
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rule = Some(rule);
        self
    }
}

/// Ordered collection of descriptors under a section title. Layout only.
#[derive(Debug, Deserialize, Clone)]
pub struct FieldGroup {
    pub title: String,
    #[serde(default, alias = "sectionKey")]
    pub section_key: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl FieldGroup {
    pub fn new(title: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            title: title.into(),
            section_key: None,
            fields,
        }
    }
}

/// The four CRUD endpoints a form instance is bound to.
/// `read` and `delete` belong to the list/detail views and are not used by submission.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EndpointSet {
    pub create: String,
    #[serde(default)]
    pub read: String,
    #[serde(default)]
    pub update: String,
    #[serde(default)]
    pub delete: String,
}

pub fn flatten_fields(groups: &[FieldGroup]) -> impl Iterator<Item = &FieldDescriptor> {
    groups.iter().flat_map(|g| g.fields.iter())
}
