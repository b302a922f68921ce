use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::event::{EventBody, EventKind, NormalizedEvent, SubEvent};

/// One field-level problem with a submitted payload, pinpointed by the
/// segmented path of the offending field within its kind's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub message: String,
    pub path: Vec<String>,
}

impl Violation {
    pub fn new(message: impl Into<String>, path: &[&str]) -> Self {
        Violation {
            message: message.into(),
            path: path.iter().map(|segment| segment.to_string()).collect(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.path.join("."))
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to decode {kind} payload: {detail}")]
    RequestDecoding { kind: EventKind, detail: String },

    #[error("{0}")]
    Validation(Violation),

    #[error("failed to encode payload field")]
    PayloadEncoding,
}

impl IngestError {
    /// Label for the dropped-events counter.
    pub fn cause(&self) -> &'static str {
        match self {
            IngestError::RequestDecoding { .. } => "decode_error",
            IngestError::Validation(_) => "validation_error",
            IngestError::PayloadEncoding => "encode_error",
        }
    }

    fn validations(&self) -> Vec<Violation> {
        match self {
            IngestError::RequestDecoding { kind, detail } => vec![Violation::new(
                detail.clone(),
                &["analytics", kind.schema_name()],
            )],
            IngestError::Validation(violation) => vec![violation.clone()],
            // Encoding failures are unexpected, no field to point at.
            IngestError::PayloadEncoding => vec![],
        }
    }
}

/// Body of every 400 response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub validations: Vec<Violation>,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            message: String::from("Bad Request"),
            validations: self.validations(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// Body of every 200 response. Exactly one of `flows` and `batch` is
/// present, matching the shape of the normalized event. Context and data
/// inclusion is gated by the trigger's verbosity flags.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flows: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Vec<SubEventSummary>>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct SubEventSummary {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub flows: Vec<String>,
}

impl SubmitResponse {
    pub fn from_event(event: NormalizedEvent, show_meta: bool, show_data: bool) -> Self {
        let context = gated(event.context.as_deref(), show_meta);
        let data = gated(event.data.as_deref(), show_data);

        let (flows, batch) = match event.body {
            EventBody::Flows(flows) => (
                Some(flows.iter().map(|flow| flow.kind().to_string()).collect()),
                None,
            ),
            EventBody::SubEvents(subevents) => (
                None,
                Some(
                    subevents
                        .into_iter()
                        .map(|subevent| SubEventSummary::from_subevent(subevent, show_meta, show_data))
                        .collect(),
                ),
            ),
        };

        SubmitResponse {
            version: event.version.to_string(),
            sent_at: event.sent_at,
            context,
            data,
            flows,
            batch,
        }
    }
}

impl SubEventSummary {
    fn from_subevent(subevent: SubEvent, show_meta: bool, show_data: bool) -> Self {
        SubEventSummary {
            kind: subevent.kind.to_string(),
            context: gated(subevent.context.as_deref(), show_meta),
            data: gated(subevent.data.as_deref(), show_data),
            flows: subevent.flows.iter().map(|flow| flow.kind().to_string()).collect(),
        }
    }
}

fn gated(encoded: Option<&str>, show: bool) -> Option<Value> {
    if !show {
        return None;
    }
    encoded.and_then(|raw| match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("failed to decode canonical payload field: {}", e);
            None
        }
    })
}
