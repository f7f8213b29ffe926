use crate::services::transport::Transport;
use serde_json::Value as JsonValue;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

pub fn get_by_path<'a>(v: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut cur = v;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

fn scalar(v: &JsonValue) -> Option<String> {
    v.as_str()
        .map(|s| s.to_string())
        .or_else(|| v.as_i64().map(|n| n.to_string()))
        .or_else(|| v.as_f64().map(|f| f.to_string()))
}

// Extract dropdown items from a read endpoint reply.
// Looks for an array at data.data, data.items, data, or the root; strings are used
// as-is, objects contribute `api_key` (or name/title/id when no key is given).
pub(crate) fn parse_remote_options(v: &JsonValue, api_key: Option<&str>) -> Vec<String> {
    let arr = ["data.data", "data.items", "data"]
        .iter()
        .find_map(|p| get_by_path(v, p).and_then(|x| x.as_array()))
        .or_else(|| v.as_array());
    let Some(arr) = arr else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for item in arr {
        let label = if let Some(s) = item.as_str() {
            Some(s.to_string())
        } else if let Some(key) = api_key {
            get_by_path(item, key).and_then(scalar)
        } else {
            ["name", "title", "id"]
                .iter()
                .find_map(|k| item.get(*k).and_then(scalar))
        };
        if let Some(l) = label.filter(|l| !l.is_empty()) {
            if !out.contains(&l) {
                out.push(l);
            }
        }
    }
    out
}

pub fn spawn_load_options(
    field: String,
    endpoint: String,
    api_key: Option<String>,
    transport: Arc<dyn Transport>,
    tx: Sender<crate::ui::LoadMsg>,
) {
    thread::spawn(move || {
        let outcome = transport
            .get(&endpoint)
            .map(|reply| parse_remote_options(&reply.body, api_key.as_deref()))
            .map_err(|e| format!("{e}"));
        match &outcome {
            Ok(items) => {
                tracing::debug!(field = %field, endpoint = %endpoint, items = items.len(), "options loaded")
            }
            Err(e) => tracing::warn!(field = %field, endpoint = %endpoint, error = %e, "options load failed"),
        }
        let _ = tx.send(crate::ui::LoadMsg::Options { field, outcome });
    });
}
