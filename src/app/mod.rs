use crate::engine::orchestrator::{Dispatch, Settlement};
use crate::services::transport::{ServerReply, TransportError};
use crate::ui::{AppState, ToastLevel, View};

pub enum AppMsg {
    /// Open the form for a new record, seeded with the configured initial data.
    NewRecord,
    /// Open the form seeded with the record selected in the list.
    EditSelected,
    Submitted {
        ticket: u64,
        outcome: Result<ServerReply, TransportError>,
    },
    LoadedOptions {
        field: String,
        outcome: Result<Vec<String>, String>,
    },
}

#[allow(clippy::large_enum_variant)]
pub enum Effect {
    Dispatch(Dispatch),
    LoadOptions {
        field: String,
        endpoint: String,
        api_key: Option<String>,
    },
    ShowToast {
        text: String,
        level: ToastLevel,
        seconds: u64,
    },
}

pub fn update(state: &mut AppState, msg: AppMsg) -> Vec<Effect> {
    use AppMsg::*;
    match msg {
        NewRecord => {
            let initial = state.config.initial_data.clone();
            state.dbg(format!("open form (create), {} seeded key(s)", initial.len()));
            state.view = View::Form;
            state.form.open(initial)
        }
        EditSelected => {
            let Some(record) = state.records.selected_record().cloned() else {
                return vec![Effect::ShowToast {
                    text: "No record selected".into(),
                    level: ToastLevel::Info,
                    seconds: 2,
                }];
            };
            state.dbg(format!(
                "open form (edit) id={}",
                record.get("id").map(|v| v.to_string()).unwrap_or_default()
            ));
            state.view = View::Form;
            state.form.open(record)
        }
        Submitted { ticket, outcome } => {
            state.status_text = None;
            match state.form.settle(ticket, outcome) {
                Settlement::Saved(record) => {
                    let idx = state.records.upsert(record);
                    state.dbg(format!("ticket {ticket}: saved, list row {idx}"));
                    state.view = View::Records;
                    vec![Effect::ShowToast {
                        text: state.config.success_msg.clone(),
                        level: ToastLevel::Success,
                        seconds: 3,
                    }]
                }
                Settlement::Rejected { alert } => {
                    state.dbg(format!("ticket {ticket}: rejected"));
                    vec![Effect::ShowToast {
                        text: alert,
                        level: ToastLevel::Error,
                        seconds: 5,
                    }]
                }
                Settlement::Stale => {
                    state.dbg(format!("ticket {ticket}: stale result ignored"));
                    Vec::new()
                }
            }
        }
        LoadedOptions { field, outcome } => match state.form.apply_options(&field, outcome) {
            Ok(n) => {
                state.dbg(format!("options {field}: {n} item(s)"));
                Vec::new()
            }
            Err(e) => {
                state.dbg(format!("options {field}: {e}"));
                vec![Effect::ShowToast {
                    text: format!("Could not load options for {field}"),
                    level: ToastLevel::Error,
                    seconds: 3,
                }]
            }
        },
    }
}

#[cfg(test)]
mod tests;
