use crate::engine::schema::{flatten_fields, EndpointSet, FieldGroup};
use crate::engine::validation::ValidationRule;
use crate::engine::value::JsonMap;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TransportConfig {
    // Backend command invoked as `<command> <post|put|get> <endpoint>`
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormConfig {
    #[serde(default = "default_form_name", alias = "formName")]
    pub form_name: String,
    // Centered overlay when true; full pane otherwise
    #[serde(default = "default_true", alias = "isPopUp")]
    pub popup: bool,
    #[serde(default = "default_success_msg", alias = "successMsg")]
    pub success_msg: String,
    #[serde(default = "default_failed_msg", alias = "faildMsg", alias = "failedMsg")]
    pub failed_msg: String,
    pub api: EndpointSet,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default, alias = "initialData")]
    pub initial_data: JsonMap,
    // Open the form as soon as the app starts
    #[serde(default = "default_true")]
    pub open_on_start: bool,
    #[serde(alias = "groupedFields")]
    pub groups: Vec<FieldGroup>,
}

fn default_true() -> bool {
    true
}

fn default_form_name() -> String {
    "Record".to_string()
}

fn default_success_msg() -> String {
    "Saved".to_string()
}

fn default_failed_msg() -> String {
    "Something went wrong. Please try again.".to_string()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate field id: '{id}' in group '{group}'")]
    DuplicateField { id: String, group: String },
    #[error("field at index {index} of group '{group}' has an empty id")]
    EmptyFieldId { index: usize, group: String },
    #[error("api.create must not be empty")]
    MissingCreateEndpoint,
    #[error("field '{id}': invalid pattern rule: {error}")]
    InvalidPattern { id: String, error: String },
}

/// Load-time checks; unknown widget types are allowed and only reported.
pub(crate) fn validate_form_config(cfg: &FormConfig) -> Result<Vec<String>, ConfigError> {
    use std::collections::HashSet;
    if cfg.api.create.trim().is_empty() {
        return Err(ConfigError::MissingCreateEndpoint);
    }
    let mut ids = HashSet::new();
    for g in &cfg.groups {
        for (i, f) in g.fields.iter().enumerate() {
            if f.id.trim().is_empty() {
                return Err(ConfigError::EmptyFieldId {
                    index: i,
                    group: g.title.clone(),
                });
            }
            if let Some(ValidationRule::Pattern(p)) = &f.rule {
                if let Some(error) = p.error() {
                    return Err(ConfigError::InvalidPattern {
                        id: f.id.clone(),
                        error: error.to_string(),
                    });
                }
            }
            if !ids.insert(f.id.as_str()) {
                return Err(ConfigError::DuplicateField {
                    id: f.id.clone(),
                    group: g.title.clone(),
                });
            }
        }
    }
    let mut warnings = Vec::new();
    for f in flatten_fields(&cfg.groups) {
        if !f.kind.is_known() {
            warnings.push(format!(
                "field '{}': unknown widget type '{}' (not rendered)",
                f.id,
                f.kind.tag()
            ));
        } else if f.kind.is_choice() && !f.kind.is_remote() && f.options.is_empty() {
            warnings.push(format!("field '{}': no options configured", f.id));
        }
    }
    Ok(warnings)
}

pub fn parse_form_config(s: &str, origin: &Path) -> Result<FormConfig> {
    let cfg: FormConfig =
        serde_yaml::from_str(s).with_context(|| format!("parsing config: {origin:?}"))?;
    Ok(cfg)
}

fn read_config(path: &Path) -> Result<FormConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("reading config: {path:?}"))?;
    parse_form_config(&s, path)
}

/// Resolve the form file: explicit path, CHI_FORMS_CONFIG, CHI_FORMS_CONFIG_DIR/form.yaml,
/// then ./form.yaml and ./.tui/form.yaml.
pub fn load_config(explicit: Option<&str>) -> Result<(FormConfig, PathBuf)> {
    if let Some(p) = explicit {
        let path = PathBuf::from(p);
        return Ok((read_config(&path)?, path));
    }
    if let Ok(p) = std::env::var("CHI_FORMS_CONFIG") {
        let path = PathBuf::from(p);
        return Ok((read_config(&path)?, path));
    }
    if let Ok(dir) = std::env::var("CHI_FORMS_CONFIG_DIR") {
        let path = PathBuf::from(dir).join("form.yaml");
        return Ok((read_config(&path)?, path));
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    for p in [cwd.join("form.yaml"), cwd.join(".tui").join("form.yaml")] {
        if p.exists() {
            return Ok((read_config(&p)?, p));
        }
    }
    Err(anyhow::anyhow!(
        "No form config found. Pass a path, set CHI_FORMS_CONFIG=<file> or CHI_FORMS_CONFIG_DIR=<dir with form.yaml>, or place form.yaml in CWD/.tui"
    ))
}
