use crate::engine::dispatcher::{coerce, normalize, ChangeEvent, CoerceError, RefTable, WidgetKind};
use crate::engine::schema::{flatten_fields, EndpointSet, FieldDescriptor, FieldGroup};
use crate::engine::serializer::{clean_dates, encode, multipart_headers, MultipartPayload};
use crate::engine::validation::validate_all;
use crate::engine::value::{
    value_from_json, value_to_json, ErrorMap, FieldValue, JsonMap, ValueMap,
};
use crate::services::transport::{ServerReply, Transport, TransportError};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormPhase {
    Closed,
    Editing,
    Submitting { ticket: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// A request ready to hand to a transport. `ticket` identifies it when the answer comes back.
#[derive(Clone, Debug)]
pub struct Dispatch {
    pub ticket: u64,
    pub method: Method,
    pub endpoint: String,
    pub payload: MultipartPayload,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("form is not open")]
    Closed,
    #[error("a submission is already in flight")]
    InFlight,
    #[error("{} field(s) failed validation", .0.len())]
    Invalid(ErrorMap),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Settlement {
    /// Saved; the form closed and this record went to the result listener.
    Saved(JsonMap),
    /// The request failed; the form is editable again with its values intact.
    Rejected { alert: String },
    /// The answer belongs to a request the form no longer waits for.
    Stale,
}

struct InFlight {
    ticket: u64,
    cleaned: ValueMap,
}

type ResultListener = Box<dyn FnMut(&JsonMap) + Send>;

/// Owns one form session: value map, error map, per-field refs and the
/// Closed → Editing → Submitting lifecycle.
pub struct FormController {
    groups: Vec<FieldGroup>,
    endpoints: EndpointSet,
    failed_msg: String,
    phase: FormPhase,
    initial: JsonMap,
    values: ValueMap,
    errors: ErrorMap,
    refs: RefTable,
    focused: Option<String>,
    next_ticket: u64,
    in_flight: Option<InFlight>,
    on_result: Option<ResultListener>,
}

impl FormController {
    pub fn new(
        groups: Vec<FieldGroup>,
        endpoints: EndpointSet,
        failed_msg: impl Into<String>,
    ) -> Self {
        Self {
            groups,
            endpoints,
            failed_msg: failed_msg.into(),
            phase: FormPhase::Closed,
            initial: JsonMap::new(),
            values: ValueMap::new(),
            errors: ErrorMap::new(),
            refs: RefTable::default(),
            focused: None,
            next_ticket: 1,
            in_flight: None,
            on_result: None,
        }
    }

    pub fn with_on_result(mut self, listener: impl FnMut(&JsonMap) + Send + 'static) -> Self {
        self.on_result = Some(Box::new(listener));
        self
    }

    pub fn groups(&self) -> &[FieldGroup] {
        &self.groups
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        flatten_fields(&self.groups)
    }

    pub fn field(&self, id: &str) -> Option<&FieldDescriptor> {
        self.fields().find(|f| f.id == id)
    }

    pub fn phase(&self) -> FormPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.phase, FormPhase::Closed)
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, FormPhase::Submitting { .. })
    }

    pub fn is_update(&self) -> bool {
        self.record_id().is_some()
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    pub fn value(&self, id: &str) -> Option<&FieldValue> {
        self.values.get(id)
    }

    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    pub fn error(&self, id: &str) -> Option<&str> {
        self.errors.get(id).map(String::as_str)
    }

    pub fn refs(&self) -> &RefTable {
        &self.refs
    }

    pub fn refs_mut(&mut self) -> &mut RefTable {
        &mut self.refs
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    /// Seed the value map from caller data and enter editing, discarding any open session.
    pub fn open(&mut self, initial: JsonMap) {
        self.values = self.seed_values(&initial);
        self.errors.clear();
        self.initial = initial;
        self.in_flight = None;
        self.phase = FormPhase::Editing;
        if self.focused.as_ref().and_then(|id| self.field(id)).is_none() {
            let first = self.fields().next().map(|f| f.id.clone());
            self.focused = first;
        }
        tracing::debug!(
            update = self.is_update(),
            values = self.values.len(),
            "form opened"
        );
    }

    fn seed_values(&self, initial: &JsonMap) -> ValueMap {
        let mut values = ValueMap::new();
        for (key, raw) in initial {
            let slot = self.field(key).map(|f| f.kind.slot());
            if let Some(v) = value_from_json(slot, raw) {
                values.insert(key.clone(), v);
            }
        }
        values
    }

    /// Single-key replace. `None` clears the field. Never validates.
    pub fn change_field(&mut self, id: &str, value: Option<FieldValue>) {
        if !self.is_open() {
            tracing::debug!(field = id, "change ignored on closed form");
            return;
        }
        match value {
            Some(v) => {
                self.values.insert(id.to_string(), v);
            }
            None => {
                self.values.remove(id);
            }
        }
    }

    /// Route a raw widget emission through the dispatcher's normalization.
    /// A value the field's kind cannot hold is rejected and the stored value is kept.
    pub fn change_event(&mut self, id: &str, event: ChangeEvent) -> Result<(), CoerceError> {
        let kind = self
            .field(id)
            .map(|f| f.kind.clone())
            .unwrap_or(WidgetKind::TextInput);
        let value = match normalize(&kind, event) {
            Some(v) => coerce(kind.slot(), v).inspect_err(|e| {
                tracing::debug!(field = id, error = %e, "change rejected");
            })?,
            None => None,
        };
        self.change_field(id, value);
        Ok(())
    }

    pub fn focus(&mut self, id: &str) -> bool {
        if self.field(id).is_some() {
            self.focused = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn focus_step(&mut self, forward: bool) {
        let ids: Vec<String> = self.fields().map(|f| f.id.clone()).collect();
        if ids.is_empty() {
            return;
        }
        let cur = self
            .focused
            .as_ref()
            .and_then(|id| ids.iter().position(|x| x == id));
        let next = match (cur, forward) {
            (None, _) => 0,
            (Some(i), true) => (i + 1) % ids.len(),
            (Some(i), false) => (i + ids.len() - 1) % ids.len(),
        };
        self.focused = ids.get(next).cloned();
    }

    pub fn validate(&self) -> ErrorMap {
        validate_all(&self.groups, &self.values)
    }

    fn record_id(&self) -> Option<String> {
        match self.initial.get("id") {
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(JsonValue::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Validate every field, then build the request. Nothing is dispatched when any
    /// field fails; the error map is replaced wholesale on every attempt.
    pub fn submit(&mut self) -> Result<Dispatch, SubmitError> {
        match self.phase {
            FormPhase::Closed => return Err(SubmitError::Closed),
            FormPhase::Submitting { .. } => return Err(SubmitError::InFlight),
            FormPhase::Editing => {}
        }
        self.errors = self.validate();
        if !self.errors.is_empty() {
            tracing::debug!(errors = self.errors.len(), "submit blocked by validation");
            return Err(SubmitError::Invalid(self.errors.clone()));
        }
        let cleaned = clean_dates(&self.values);
        let payload = encode(&cleaned);
        let (method, endpoint) = match self.record_id() {
            Some(id) => (Method::Put, format!("{}/{}", self.endpoints.update, id)),
            None => (Method::Post, self.endpoints.create.clone()),
        };
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(InFlight { ticket, cleaned });
        self.phase = FormPhase::Submitting { ticket };
        Ok(Dispatch {
            ticket,
            method,
            endpoint,
            payload,
            headers: multipart_headers(),
        })
    }

    /// Apply the transport's answer for `ticket`.
    pub fn settle(
        &mut self,
        ticket: u64,
        outcome: Result<ServerReply, TransportError>,
    ) -> Settlement {
        let flight = match self.in_flight.take() {
            Some(f) if f.ticket == ticket => f,
            other => {
                self.in_flight = other;
                tracing::debug!(ticket, "ignoring stale submit result");
                return Settlement::Stale;
            }
        };
        match outcome {
            Ok(reply) => {
                let record = build_record(&reply, &flight.cleaned);
                self.values.clear();
                self.errors.clear();
                self.phase = FormPhase::Closed;
                if let Some(listener) = self.on_result.as_mut() {
                    listener(&record);
                }
                tracing::info!(ticket, "form saved");
                Settlement::Saved(record)
            }
            Err(err) => {
                self.phase = FormPhase::Editing;
                let alert = alert_for(&err, &self.failed_msg);
                tracing::warn!(ticket, error = %err, "form submission failed");
                Settlement::Rejected { alert }
            }
        }
    }

    /// Submit and wait for the transport in one step.
    pub fn submit_with(&mut self, transport: &dyn Transport) -> Result<Settlement, SubmitError> {
        let dispatch = self.submit()?;
        let outcome = transport.send(&dispatch);
        Ok(self.settle(dispatch.ticket, outcome))
    }

    /// Discard all edits and close. No confirmation.
    pub fn cancel(&mut self) {
        self.values.clear();
        self.errors.clear();
        self.in_flight = None;
        self.phase = FormPhase::Closed;
    }
}

fn fallback_id() -> String {
    format!("perm-{}", chrono::Utc::now().timestamp_millis())
}

fn non_empty_text(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `id` from the server's `name` (or a generated `perm-<millis>`), overlaid by the
/// cleaned values; a caller-supplied `id` in the map wins.
fn build_record(reply: &ServerReply, cleaned: &ValueMap) -> JsonMap {
    let id = reply
        .record()
        .and_then(|d| d.get("name"))
        .and_then(non_empty_text)
        .unwrap_or_else(fallback_id);
    let mut record = JsonMap::new();
    record.insert("id".into(), JsonValue::String(id));
    for (k, v) in cleaned {
        record.insert(k.clone(), value_to_json(v));
    }
    record
}

fn alert_for(err: &TransportError, failed_msg: &str) -> String {
    let TransportError::Rejected { body } = err else {
        return failed_msg.to_string();
    };
    if let Some(errors) = body.get("errors").and_then(|e| e.as_object()) {
        let mut lines: Vec<String> = Vec::new();
        for v in errors.values() {
            match v {
                JsonValue::Array(items) => lines.extend(items.iter().filter_map(non_empty_text)),
                other => lines.extend(non_empty_text(other)),
            }
        }
        if !lines.is_empty() {
            return lines.join("\n");
        }
    }
    body.get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(|m| m.to_string())
        .unwrap_or_else(|| failed_msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::FileHandle;
    use crate::services::transport::testing::RecordingTransport;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn endpoints() -> EndpointSet {
        EndpointSet {
            create: "/customers/create".into(),
            read: "/customers".into(),
            update: "/customers/update".into(),
            delete: "/customers/delete".into(),
        }
    }

    fn controller(fields: Vec<FieldDescriptor>) -> FormController {
        FormController::new(
            vec![FieldGroup::new("Main", fields)],
            endpoints(),
            "Could not save",
        )
    }

    fn name_field() -> FieldDescriptor {
        FieldDescriptor::new("name", "Name", WidgetKind::TextInput).with_err_msg("required")
    }

    fn initial(v: JsonValue) -> JsonMap {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn invalid_submit_stores_errors_and_dispatches_nothing() {
        let mut form = controller(vec![name_field()]);
        form.open(initial(json!({"name": ""})));
        let t = RecordingTransport::ok(json!({}));
        match form.submit_with(&t) {
            Err(SubmitError::Invalid(errors)) => {
                assert_eq!(errors.get("name").map(String::as_str), Some("required"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert_eq!(form.error("name"), Some("required"));
        assert_eq!(form.phase(), FormPhase::Editing);
        assert_eq!(t.call_count(), 0);
    }

    #[test]
    fn initial_id_routes_to_update_endpoint_with_put() {
        let mut form = controller(vec![name_field()]);
        form.open(initial(json!({"id": "42", "name": "Bob"})));
        let t = RecordingTransport::ok(json!({"data": {}}));
        let settled = form.submit_with(&t).unwrap();
        let calls = t.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Method::Put);
        assert_eq!(calls[0].1, "/customers/update/42");
        // the verbatim id is spread into the payload too
        assert_eq!(calls[0].2.texts("id"), vec!["42"]);
        match settled {
            Settlement::Saved(rec) => assert_eq!(rec.get("id"), Some(&json!("42"))),
            other => panic!("expected saved, got {other:?}"),
        }
    }

    #[test]
    fn create_without_server_name_gets_perm_id() {
        let mut form = controller(vec![name_field()]);
        form.open(initial(json!({"name": "Alice"})));
        let t = RecordingTransport::ok(json!({"data": {}}));
        let settled = form.submit_with(&t).unwrap();
        {
            let calls = t.calls.lock().unwrap();
            assert_eq!(calls[0].0, Method::Post);
            assert_eq!(calls[0].1, "/customers/create");
        }
        match settled {
            Settlement::Saved(rec) => {
                let id = rec.get("id").and_then(|v| v.as_str()).unwrap();
                assert!(id.starts_with("perm-"), "got {id}");
                assert_eq!(rec.get("name"), Some(&json!("Alice")));
            }
            other => panic!("expected saved, got {other:?}"),
        }
        assert_eq!(form.phase(), FormPhase::Closed);
        assert!(form.values().is_empty());
    }

    #[test]
    fn server_name_becomes_record_id_and_listener_is_notified() {
        let seen: Arc<Mutex<Vec<JsonMap>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut form = controller(vec![name_field()])
            .with_on_result(move |rec| sink.lock().unwrap().push(rec.clone()));
        form.open(initial(json!({"name": "Alice"})));
        let t = RecordingTransport::ok(json!({"data": {"name": "CUST-0007"}}));
        form.submit_with(&t).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get("id"), Some(&json!("CUST-0007")));
    }

    #[test]
    fn date_bool_and_list_values_serialize_through_submit() {
        let mut form = controller(vec![
            FieldDescriptor::new("dob", "Birthday", WidgetKind::Date).with_err_msg("dob"),
            FieldDescriptor::new("active", "Active", WidgetKind::Switch).with_err_msg("act"),
            FieldDescriptor::new("x", "Tags", WidgetKind::MultiCheckbox)
                .with_options(["a", "b", "c"])
                .with_err_msg("tags"),
        ]);
        form.open(JsonMap::new());
        let d = NaiveDate::from_ymd_opt(2001, 9, 11).unwrap();
        form.change_field("dob", Some(FieldValue::Date(d)));
        form.change_field("active", Some(FieldValue::Bool(true)));
        form.change_field("x", Some(FieldValue::List(vec!["a".into(), "b".into()])));
        // not a descriptor: still spread into the payload
        form.change_field("extra", Some(FieldValue::Bool(false)));
        let dispatch = form.submit().unwrap();
        assert_eq!(dispatch.payload.texts("dob"), vec!["2001-09-11"]);
        assert_eq!(dispatch.payload.texts("active"), vec!["1"]);
        assert_eq!(dispatch.payload.texts("extra"), vec!["0"]);
        assert_eq!(dispatch.payload.texts("x[]"), vec!["a", "b"]);
        assert_eq!(
            dispatch.headers,
            vec![("Content-Type".to_string(), "multipart/form-data".to_string())]
        );
    }

    #[test]
    fn change_event_normalizes_and_coerces() {
        let mut form = controller(vec![
            name_field(),
            FieldDescriptor::new("dob", "Birthday", WidgetKind::Calendar),
            FieldDescriptor::new("cv", "CV", WidgetKind::File),
        ]);
        form.open(JsonMap::new());
        form.change_event("name", ChangeEvent::input(FieldValue::text("Zed")))
            .unwrap();
        form.change_event("dob", ChangeEvent::input(FieldValue::text("1999-01-02")))
            .unwrap();
        let f = FileHandle::from_bytes("cv.pdf", vec![0u8; 4]);
        form.change_event("cv", ChangeEvent::File(Some(f.clone())))
            .unwrap();
        assert_eq!(form.value("name"), Some(&FieldValue::text("Zed")));
        assert_eq!(
            form.value("dob"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(1999, 1, 2).unwrap()))
        );
        assert_eq!(form.value("cv"), Some(&FieldValue::File(f)));
        form.change_event("cv", ChangeEvent::File(None)).unwrap();
        assert!(form.value("cv").is_none());
    }

    #[test]
    fn unparseable_date_never_reaches_the_payload() {
        let mut form = controller(vec![
            name_field(),
            FieldDescriptor::new("dob", "Birthday", WidgetKind::Date),
        ]);
        form.open(initial(json!({"name": "Bob", "dob": "sometime"})));
        assert!(form.value("dob").is_none());

        form.change_event("dob", ChangeEvent::input(FieldValue::text("2001-09-11")))
            .unwrap();
        let err = form
            .change_event("dob", ChangeEvent::input(FieldValue::text("next tuesday")))
            .unwrap_err();
        assert_eq!(err, CoerceError::NotADate("next tuesday".into()));
        assert_eq!(
            form.value("dob"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2001, 9, 11).unwrap()))
        );

        let dispatch = form.submit().unwrap();
        assert_eq!(dispatch.payload.texts("dob"), vec!["2001-09-11"]);
    }

    #[test]
    fn second_submit_while_in_flight_is_rejected() {
        let mut form = controller(vec![name_field()]);
        form.open(initial(json!({"name": "Bob"})));
        let first = form.submit().unwrap();
        assert!(matches!(form.submit(), Err(SubmitError::InFlight)));
        assert_eq!(form.phase(), FormPhase::Submitting { ticket: first.ticket });
    }

    #[test]
    fn network_failure_keeps_form_open_with_values() {
        let mut form = controller(vec![name_field()]);
        form.open(initial(json!({"name": "Bob"})));
        let t = RecordingTransport::replying(Err(TransportError::Rejected {
            body: json!({"errors": {"name": ["Name taken", "Too short"], "email": "Bad email"}}),
        }));
        match form.submit_with(&t).unwrap() {
            Settlement::Rejected { alert } => {
                assert!(alert.contains("Name taken\nToo short"));
                assert!(alert.contains("Bad email"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(form.phase(), FormPhase::Editing);
        assert_eq!(form.value("name"), Some(&FieldValue::text("Bob")));
        // server errors never reach the field error map
        assert!(form.errors().is_empty());
    }

    #[test]
    fn failure_alert_falls_back_to_message_then_configured_text() {
        let msg = TransportError::Rejected {
            body: json!({"message": "Server busy"}),
        };
        assert_eq!(alert_for(&msg, "Could not save"), "Server busy");
        let bare = TransportError::Unavailable("connection refused".into());
        assert_eq!(alert_for(&bare, "Could not save"), "Could not save");
        let empty = TransportError::Rejected {
            body: json!({"errors": {}}),
        };
        assert_eq!(alert_for(&empty, "Could not save"), "Could not save");
    }

    #[test]
    fn stale_answer_after_cancel_is_ignored() {
        let mut form = controller(vec![name_field()]);
        form.open(initial(json!({"name": "Bob"})));
        let d = form.submit().unwrap();
        form.cancel();
        form.open(initial(json!({"name": "Eve"})));
        let s = form.settle(d.ticket, Ok(ServerReply::new(json!({"data": {}}))));
        assert_eq!(s, Settlement::Stale);
        assert_eq!(form.phase(), FormPhase::Editing);
        assert_eq!(form.value("name"), Some(&FieldValue::text("Eve")));
    }

    #[test]
    fn cancel_then_reopen_reproduces_value_map() {
        let mut form = controller(vec![
            name_field(),
            FieldDescriptor::new("dob", "Birthday", WidgetKind::Date),
        ]);
        let data = initial(json!({"id": 7, "name": "Bob", "dob": "2020-02-02", "gone": null}));
        form.open(data.clone());
        let before = form.values().clone();
        form.change_field("name", Some(FieldValue::text("Robert")));
        form.cancel();
        assert!(!form.is_open());
        assert!(form.values().is_empty());
        form.open(data);
        assert_eq!(form.values(), &before);
        assert!(!form.values().contains_key("gone"));
    }

    #[test]
    fn closed_form_refuses_submit_and_changes() {
        let mut form = controller(vec![name_field()]);
        assert!(matches!(form.submit(), Err(SubmitError::Closed)));
        form.change_field("name", Some(FieldValue::text("x")));
        assert!(form.values().is_empty());
    }

    #[test]
    fn focus_cycles_through_flattened_fields() {
        let mut form = FormController::new(
            vec![
                FieldGroup::new("A", vec![name_field()]),
                FieldGroup::new(
                    "B",
                    vec![FieldDescriptor::new("email", "Email", WidgetKind::TextInput)],
                ),
            ],
            endpoints(),
            "x",
        );
        form.open(JsonMap::new());
        assert_eq!(form.focused(), Some("name"));
        form.focus_step(true);
        assert_eq!(form.focused(), Some("email"));
        form.focus_step(true);
        assert_eq!(form.focused(), Some("name"));
        form.focus_step(false);
        assert_eq!(form.focused(), Some("email"));
        assert!(!form.focus("missing"));
    }
}
