use super::*;
use crate::engine::orchestrator::Method;
use crate::engine::value::{FieldValue, JsonMap};
use crate::model::parse_form_config;
use crate::services::transport::testing::RecordingTransport;
use crate::services::transport::Transport;
use crate::ui::{handle_key, pump_messages, run_effects, ui};
use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::backend::TestBackend;
use ratatui::Terminal;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
formName: Customer
successMsg: Customer saved
faildMsg: Could not save customer
api:
  create: /customers/create
  update: /customers/update
groupedFields:
  - title: Basics
    fields:
      - id: name
        label: Full Name
        type: textinput
        errMsg: Name is required
      - id: email
        label: Email
        type: textinput
        errMsg: Enter a valid email
        rule: email
      - id: city
        label: City
        type: dropdownread
        readApi: /cities
        apiKey: city_name
"#;

fn state_with(transport: Arc<RecordingTransport>) -> AppState {
    let cfg = parse_form_config(CONFIG, Path::new("form.yaml")).unwrap();
    AppState::new(cfg, transport)
}

fn open_new(state: &mut AppState) -> Vec<Effect> {
    let effs = update(state, AppMsg::NewRecord);
    assert_eq!(state.view, View::Form);
    effs
}

fn fill_valid(state: &mut AppState) {
    let c = &mut state.form.controller;
    c.change_field("name", Some(FieldValue::text("Ann")));
    c.change_field("email", Some(FieldValue::text("ann@example.com")));
}

fn take_dispatch(effs: Vec<Effect>) -> crate::engine::orchestrator::Dispatch {
    effs.into_iter()
        .find_map(|e| match e {
            Effect::Dispatch(d) => Some(d),
            _ => None,
        })
        .expect("a dispatch effect")
}

fn toast_text(effs: &[Effect]) -> Option<(&str, ToastLevel)> {
    effs.iter().find_map(|e| match e {
        Effect::ShowToast { text, level, .. } => Some((text.as_str(), *level)),
        _ => None,
    })
}

fn wait_until(state: &mut AppState, mut done: impl FnMut(&AppState) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !done(state) {
        assert!(Instant::now() < deadline, "timed out waiting for worker");
        pump_messages(state);
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn new_record_opens_form_and_requests_remote_options() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    let effs = open_new(&mut state);
    assert!(matches!(
        effs.as_slice(),
        [Effect::LoadOptions { field, endpoint, .. }] if field == "city" && endpoint == "/cities"
    ));
    assert!(state.form.controller.is_open());
    assert!(!state.form.controller.is_update());
}

#[test]
fn create_flow_saves_record_and_returns_to_list() {
    let transport = Arc::new(RecordingTransport::ok(json!({"data": {"name": "CUST-1"}})));
    let mut state = state_with(transport.clone());
    open_new(&mut state);
    fill_valid(&mut state);

    let dispatch = take_dispatch(state.form.submit());
    assert_eq!(dispatch.method, Method::Post);
    assert_eq!(dispatch.endpoint, "/customers/create");
    assert!(state.form.controller.is_submitting());

    let outcome = transport.send(&dispatch);
    let effs = update(
        &mut state,
        AppMsg::Submitted {
            ticket: dispatch.ticket,
            outcome,
        },
    );
    assert_eq!(toast_text(&effs), Some(("Customer saved", ToastLevel::Success)));
    assert_eq!(state.view, View::Records);
    assert!(!state.form.controller.is_open());
    let rec = state.records.selected_record().unwrap();
    assert_eq!(rec["id"], "CUST-1");
    assert_eq!(rec["email"], "ann@example.com");
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn invalid_submit_dispatches_nothing() {
    let transport = Arc::new(RecordingTransport::ok(json!({})));
    let mut state = state_with(transport.clone());
    open_new(&mut state);
    state
        .form
        .controller
        .change_field("email", Some(FieldValue::text("not-an-email")));
    let effs = state.form.submit();
    assert!(!effs.iter().any(|e| matches!(e, Effect::Dispatch(_))));
    assert_eq!(
        toast_text(&effs),
        Some(("Please fix the highlighted errors", ToastLevel::Error))
    );
    assert_eq!(state.form.controller.error("name"), Some("Name is required"));
    assert_eq!(
        state.form.controller.error("email"),
        Some("Enter a valid email")
    );
    assert_eq!(transport.call_count(), 0);
    assert_eq!(state.view, View::Form);
}

#[test]
fn rejected_submit_keeps_form_open_with_server_alert() {
    let transport = Arc::new(RecordingTransport::replying(Err(
        crate::services::transport::TransportError::Rejected {
            body: json!({"errors": {"email": ["Email already taken"]}}),
        },
    )));
    let mut state = state_with(transport.clone());
    open_new(&mut state);
    fill_valid(&mut state);
    let dispatch = take_dispatch(state.form.submit());
    let outcome = transport.send(&dispatch);
    let effs = update(
        &mut state,
        AppMsg::Submitted {
            ticket: dispatch.ticket,
            outcome,
        },
    );
    assert_eq!(
        toast_text(&effs),
        Some(("Email already taken", ToastLevel::Error))
    );
    assert_eq!(state.view, View::Form);
    assert!(state.form.controller.is_open());
    assert!(!state.form.controller.is_submitting());
    assert_eq!(
        state.form.controller.value("name"),
        Some(&FieldValue::text("Ann"))
    );
    assert!(state.records.records.is_empty());
}

#[test]
fn unreachable_backend_uses_failed_message() {
    let transport = Arc::new(RecordingTransport::replying(Err(
        crate::services::transport::TransportError::Unavailable("down".into()),
    )));
    let mut state = state_with(transport.clone());
    open_new(&mut state);
    fill_valid(&mut state);
    let dispatch = take_dispatch(state.form.submit());
    let outcome = transport.send(&dispatch);
    let effs = update(
        &mut state,
        AppMsg::Submitted {
            ticket: dispatch.ticket,
            outcome,
        },
    );
    assert_eq!(
        toast_text(&effs),
        Some(("Could not save customer", ToastLevel::Error))
    );
}

#[test]
fn editing_selected_record_puts_to_update_and_replaces_row() {
    let transport = Arc::new(RecordingTransport::ok(json!({"data": {}})));
    let mut state = state_with(transport.clone());
    let mut existing = JsonMap::new();
    existing.insert("id".into(), json!("CUST-9"));
    existing.insert("name".into(), json!("Bob"));
    existing.insert("email".into(), json!("bob@example.com"));
    state.records.upsert(existing);

    update(&mut state, AppMsg::EditSelected);
    assert_eq!(state.view, View::Form);
    assert!(state.form.controller.is_update());
    state
        .form
        .controller
        .change_field("name", Some(FieldValue::text("Robert")));

    let dispatch = take_dispatch(state.form.submit());
    assert_eq!(dispatch.method, Method::Put);
    assert_eq!(dispatch.endpoint, "/customers/update/CUST-9");
    let outcome = transport.send(&dispatch);
    update(
        &mut state,
        AppMsg::Submitted {
            ticket: dispatch.ticket,
            outcome,
        },
    );
    assert_eq!(state.records.records.len(), 1);
    assert_eq!(state.records.records[0]["name"], "Robert");
    assert_eq!(state.records.records[0]["id"], "CUST-9");
}

#[test]
fn edit_without_selection_toasts() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    let effs = update(&mut state, AppMsg::EditSelected);
    assert_eq!(toast_text(&effs), Some(("No record selected", ToastLevel::Info)));
    assert_eq!(state.view, View::Records);
}

#[test]
fn stale_ticket_is_ignored() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    open_new(&mut state);
    fill_valid(&mut state);
    let dispatch = take_dispatch(state.form.submit());
    let effs = update(
        &mut state,
        AppMsg::Submitted {
            ticket: dispatch.ticket + 7,
            outcome: Ok(crate::services::transport::ServerReply::default()),
        },
    );
    assert!(effs.is_empty());
    assert!(state.form.controller.is_submitting());
    assert!(state.records.records.is_empty());
    assert!(state
        .debug_log
        .iter()
        .any(|l| l.contains("stale result ignored")));
}

#[test]
fn loaded_options_feed_the_dropdown_and_failures_toast() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    open_new(&mut state);
    let effs = update(
        &mut state,
        AppMsg::LoadedOptions {
            field: "city".into(),
            outcome: Ok(vec!["Pune".into(), "Goa".into()]),
        },
    );
    assert!(effs.is_empty());
    let city = state.form.controller.field("city").cloned().unwrap();
    assert_eq!(state.form.options_for(&city), vec!["Pune", "Goa"]);

    let effs = update(
        &mut state,
        AppMsg::LoadedOptions {
            field: "city".into(),
            outcome: Err("timeout".into()),
        },
    );
    assert_eq!(
        toast_text(&effs),
        Some(("Could not load options for city", ToastLevel::Error))
    );
}

#[test]
fn keys_drive_a_full_submit_through_the_worker_thread() {
    let transport = Arc::new(RecordingTransport::ok(json!({"data": {"name": "CUST-2"}})));
    let mut state = state_with(transport.clone());
    let none = KeyModifiers::NONE;

    assert!(handle_key(&mut state, KeyCode::Char('n'), none));
    assert_eq!(state.view, View::Form);
    assert_eq!(state.form.controller.focused(), Some("name"));
    handle_key(&mut state, KeyCode::Enter, none);
    for c in "Ann".chars() {
        handle_key(&mut state, KeyCode::Char(c), none);
    }
    handle_key(&mut state, KeyCode::Enter, none);
    handle_key(&mut state, KeyCode::Tab, none);
    handle_key(&mut state, KeyCode::Enter, none);
    for c in "ann@example.com".chars() {
        handle_key(&mut state, KeyCode::Char(c), none);
    }
    handle_key(&mut state, KeyCode::Char('s'), KeyModifiers::CONTROL);
    assert_eq!(state.status_text.as_deref(), Some("Submitting..."));

    wait_until(&mut state, |s| {
        !s.records.records.is_empty() && s.form.remote("city").is_some_and(|r| r.loaded)
    });
    assert_eq!(state.view, View::Records);
    assert!(state.status_text.is_none());
    assert_eq!(state.records.records[0]["id"], "CUST-2");
    assert_eq!(state.records.records[0]["name"], "Ann");
    assert_eq!(
        state.toast.as_ref().map(|t| t.level),
        Some(ToastLevel::Success)
    );
    assert_eq!(transport.call_count(), 1);
    assert_eq!(*transport.reads.lock().unwrap(), vec!["/cities".to_string()]);
    assert_eq!(state.form.remote("city").unwrap().items, vec!["Pune", "Goa"]);
}

#[test]
fn esc_discards_the_form_and_q_quits() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    let none = KeyModifiers::NONE;
    handle_key(&mut state, KeyCode::Char('n'), none);
    fill_valid(&mut state);
    assert!(handle_key(&mut state, KeyCode::Esc, none));
    assert_eq!(state.view, View::Records);
    assert!(!state.form.controller.is_open());
    assert!(state.form.controller.values().is_empty());
    assert!(!handle_key(&mut state, KeyCode::Char('q'), none));
}

#[test]
fn f12_toggles_debug_pane() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    handle_key(&mut state, KeyCode::F(12), KeyModifiers::NONE);
    assert!(state.show_debug);
    handle_key(&mut state, KeyCode::F(12), KeyModifiers::NONE);
    assert!(!state.show_debug);
}

#[test]
fn toast_expires_after_its_ticks() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    run_effects(
        &mut state,
        vec![Effect::ShowToast {
            text: "hi".into(),
            level: ToastLevel::Info,
            seconds: 1,
        }],
    );
    let backend = TestBackend::new(80, 20);
    let mut terminal = Terminal::new(backend).unwrap();
    terminal.draw(|f| ui(f, &mut state)).unwrap();
    assert!(state.toast.is_some());
    state.tick += 5;
    terminal.draw(|f| ui(f, &mut state)).unwrap();
    assert!(state.toast.is_none());
}

#[test]
fn renders_popup_form_over_records() {
    let mut state = state_with(Arc::new(RecordingTransport::ok(json!({}))));
    open_new(&mut state);
    state.show_debug = true;
    let backend = TestBackend::new(100, 30);
    let mut terminal = Terminal::new(backend).unwrap();
    terminal.draw(|f| ui(f, &mut state)).unwrap();
    let buf = terminal.backend().buffer();
    let text: String = buf.content().iter().map(|c| c.symbol()).collect();
    assert!(text.contains("Create Customer"));
    assert!(text.contains("Full Name"));
    assert!(text.contains("Debug"));
}
