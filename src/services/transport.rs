use crate::engine::orchestrator::{Dispatch, Method};
use crate::engine::serializer::MultipartPayload;
use crate::services::cli_runner::{build_argv, run_capture};
use serde_json::Value as JsonValue;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// Successful server answer; `body.data` is the saved record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerReply {
    pub body: JsonValue,
}

impl ServerReply {
    pub fn new(body: JsonValue) -> Self {
        Self { body }
    }

    pub fn record(&self) -> Option<&JsonValue> {
        self.body.get("data")
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend answered with an error body (`errors` map and/or `message`).
    #[error("request rejected by server")]
    Rejected { body: JsonValue },
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

/// HTTP-like client the form submits through.
pub trait Transport: Send + Sync {
    fn post(
        &self,
        endpoint: &str,
        payload: &MultipartPayload,
        headers: &[(String, String)],
    ) -> Result<ServerReply, TransportError>;

    fn put(
        &self,
        endpoint: &str,
        payload: &MultipartPayload,
        headers: &[(String, String)],
    ) -> Result<ServerReply, TransportError>;

    /// Read access, only used to refresh remote dropdown options.
    fn get(&self, endpoint: &str) -> Result<ServerReply, TransportError> {
        let _ = endpoint;
        Err(TransportError::Unsupported("get"))
    }

    fn send(&self, dispatch: &Dispatch) -> Result<ServerReply, TransportError> {
        match dispatch.method {
            Method::Post => self.post(&dispatch.endpoint, &dispatch.payload, &dispatch.headers),
            Method::Put => self.put(&dispatch.endpoint, &dispatch.payload, &dispatch.headers),
        }
    }
}

/// Bridges requests to a backend command:
/// `<command> <post|put|get> <endpoint>` with the request JSON on stdin.
/// Success: JSON envelope on stdout. Failure: non-zero exit with a JSON error envelope on stderr.
pub struct CliTransport {
    command: String,
}

impl CliTransport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn run(
        &self,
        verb: &str,
        endpoint: &str,
        request: Option<JsonValue>,
    ) -> Result<ServerReply, TransportError> {
        let argv = build_argv(&self.command, &[verb, endpoint])
            .map_err(|e| TransportError::Unavailable(format!("{e}")))?;
        let input = request.map(|r| r.to_string());
        let out = run_capture(&argv, input.as_deref())
            .map_err(|e| TransportError::Unavailable(format!("{e:#}")))?;
        if out.success {
            let body: JsonValue = serde_json::from_str(out.stdout.trim())
                .map_err(|e| TransportError::Unavailable(format!("parse json: {e}")))?;
            Ok(ServerReply::new(body))
        } else {
            // Try parse stderr as JSON error envelope; fallback to plain text
            match serde_json::from_str::<JsonValue>(out.stderr.trim()) {
                Ok(body) => Err(TransportError::Rejected { body }),
                Err(_) => Err(TransportError::Unavailable(format!(
                    "Command failed: {}\n{}",
                    argv.join(" "),
                    out.stderr
                ))),
            }
        }
    }

    fn request(payload: &MultipartPayload, headers: &[(String, String)]) -> JsonValue {
        let headers: serde_json::Map<String, JsonValue> = headers
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect();
        let mut body = payload.to_json();
        body["headers"] = JsonValue::Object(headers);
        body
    }
}

impl Transport for CliTransport {
    fn post(
        &self,
        endpoint: &str,
        payload: &MultipartPayload,
        headers: &[(String, String)],
    ) -> Result<ServerReply, TransportError> {
        self.run("post", endpoint, Some(Self::request(payload, headers)))
    }

    fn put(
        &self,
        endpoint: &str,
        payload: &MultipartPayload,
        headers: &[(String, String)],
    ) -> Result<ServerReply, TransportError> {
        self.run("put", endpoint, Some(Self::request(payload, headers)))
    }

    fn get(&self, endpoint: &str) -> Result<ServerReply, TransportError> {
        self.run("get", endpoint, None)
    }
}

/// Used when no backend command is configured; every request fails with a clear message.
pub struct NoTransport;

impl Transport for NoTransport {
    fn post(
        &self,
        _endpoint: &str,
        _payload: &MultipartPayload,
        _headers: &[(String, String)],
    ) -> Result<ServerReply, TransportError> {
        Err(TransportError::Unavailable(
            "no transport.command configured".into(),
        ))
    }

    fn put(
        &self,
        _endpoint: &str,
        _payload: &MultipartPayload,
        _headers: &[(String, String)],
    ) -> Result<ServerReply, TransportError> {
        Err(TransportError::Unavailable(
            "no transport.command configured".into(),
        ))
    }
}

// Run the request off-thread and report back; the only suspension point of a submit.
pub fn spawn_dispatch(
    dispatch: Dispatch,
    transport: Arc<dyn Transport>,
    tx: Sender<crate::ui::LoadMsg>,
) {
    thread::spawn(move || {
        tracing::info!(
            ticket = dispatch.ticket,
            method = dispatch.method.as_str(),
            endpoint = %dispatch.endpoint,
            parts = dispatch.payload.len(),
            "dispatching form"
        );
        let outcome = transport.send(&dispatch);
        if let Err(e) = &outcome {
            tracing::warn!(ticket = dispatch.ticket, error = %e, "form dispatch failed");
        }
        let _ = tx.send(crate::ui::LoadMsg::Submitted {
            ticket: dispatch.ticket,
            outcome,
        });
    });
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory transport that records every call and answers from a script.
    pub struct RecordingTransport {
        pub calls: Mutex<Vec<(Method, String, MultipartPayload)>>,
        pub reads: Mutex<Vec<String>>,
        reply: Mutex<Option<Result<ServerReply, TransportError>>>,
    }

    impl RecordingTransport {
        pub fn replying(reply: Result<ServerReply, TransportError>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reads: Mutex::new(Vec::new()),
                reply: Mutex::new(Some(reply)),
            }
        }

        pub fn ok(body: JsonValue) -> Self {
            Self::replying(Ok(ServerReply::new(body)))
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().map(|c| c.len()).unwrap_or(0)
        }

        fn answer(
            &self,
            method: Method,
            endpoint: &str,
            payload: &MultipartPayload,
        ) -> Result<ServerReply, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((method, endpoint.to_string(), payload.clone()));
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(ServerReply::default()))
        }
    }

    impl Transport for RecordingTransport {
        fn post(
            &self,
            endpoint: &str,
            payload: &MultipartPayload,
            _headers: &[(String, String)],
        ) -> Result<ServerReply, TransportError> {
            self.answer(Method::Post, endpoint, payload)
        }

        fn put(
            &self,
            endpoint: &str,
            payload: &MultipartPayload,
            _headers: &[(String, String)],
        ) -> Result<ServerReply, TransportError> {
            self.answer(Method::Put, endpoint, payload)
        }

        // Reads never consume the scripted write reply.
        fn get(&self, endpoint: &str) -> Result<ServerReply, TransportError> {
            self.reads.lock().unwrap().push(endpoint.to_string());
            Ok(ServerReply::new(serde_json::json!({"data": ["Pune", "Goa"]})))
        }
    }
}
