use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

use crate::api::IngestError;
use crate::event::{
    self, Alias, EventBody, EventKind, EventPayload, Group, Identify, NormalizedEvent, Page,
    Screen, SubEvent, Track, PROTOCOL_VERSION,
};
use crate::normalize::{encode_canonical, normalize};
use crate::prometheus::report_dropped_subevents;
use crate::validate::Validate;

/// Outer batch envelope. Decoded leniently: unlike single-event routes,
/// unknown top-level fields are tolerated. The shared context and
/// timestamp apply to the batch's own encoding, independent of per-item
/// context.
#[derive(Debug, Deserialize)]
pub struct BatchEnvelope {
    pub batch: Vec<Value>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

/// Result of demultiplexing a batch: normalized sub-events in their
/// original relative order, plus structured diagnostics for every item
/// that was dropped along the way.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<SubEvent>,
    pub rejected: Vec<RejectedItem>,
}

#[derive(Debug)]
pub struct RejectedItem {
    /// Position of the item in the submitted sequence.
    pub index: usize,
    /// The declared kind, when one could be read.
    pub kind: Option<String>,
    pub reason: RejectReason,
}

#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("item is not a JSON object")]
    NotAnObject,
    #[error("missing or non-string \"type\" field")]
    MissingDiscriminant,
    #[error("unsupported event kind")]
    UnsupportedKind,
    #[error(transparent)]
    Invalid(#[from] IngestError),
}

impl RejectReason {
    fn cause(&self) -> &'static str {
        match self {
            RejectReason::NotAnObject => "not_an_object",
            RejectReason::MissingDiscriminant => "missing_type",
            RejectReason::UnsupportedKind => "unsupported_kind",
            RejectReason::Invalid(err) => err.cause(),
        }
    }
}

/// Processing function for the batch route.
pub fn process(body: &[u8], now: OffsetDateTime) -> Result<NormalizedEvent, IngestError> {
    let envelope: BatchEnvelope =
        serde_json::from_slice(body).map_err(|e| IngestError::RequestDecoding {
            kind: EventKind::Batch,
            detail: e.to_string(),
        })?;

    metrics::histogram!("collect_batch_size").record(envelope.batch.len() as f64);

    let sent_at = envelope.timestamp.unwrap_or(now);
    let context = encode_canonical(envelope.context.as_ref())?;

    let outcome = dispatch(envelope.batch, now);
    for item in &outcome.rejected {
        report_dropped_subevents(item.reason.cause(), 1);
        tracing::warn!(
            index = item.index,
            kind = item.kind.as_deref().unwrap_or("unknown"),
            "dropped batch item: {}",
            item.reason
        );
    }

    Ok(NormalizedEvent {
        version: PROTOCOL_VERSION,
        context,
        data: None,
        sent_at,
        body: EventBody::SubEvents(outcome.accepted),
    })
}

/// Demultiplex the batch items, running each through its kind's decoding,
/// validation and normalization. One item failing never aborts the batch,
/// and the relative order of accepted items is preserved.
pub fn dispatch(items: Vec<Value>, now: OffsetDateTime) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(mut fields) = item else {
            outcome.rejected.push(RejectedItem {
                index,
                kind: None,
                reason: RejectReason::NotAnObject,
            });
            continue;
        };

        let Some(declared) = fields
            .remove("type")
            .and_then(|value| value.as_str().map(String::from))
        else {
            outcome.rejected.push(RejectedItem {
                index,
                kind: None,
                reason: RejectReason::MissingDiscriminant,
            });
            continue;
        };

        // Nested batches are not a thing, treat them as unsupported.
        let kind = match declared.parse::<EventKind>() {
            Ok(kind) if kind != EventKind::Batch => kind,
            _ => {
                outcome.rejected.push(RejectedItem {
                    index,
                    kind: Some(declared),
                    reason: RejectReason::UnsupportedKind,
                });
                continue;
            }
        };

        match process_item(kind, fields, now) {
            Ok(subevent) => outcome.accepted.push(subevent),
            Err(err) => outcome.rejected.push(RejectedItem {
                index,
                kind: Some(declared),
                reason: RejectReason::Invalid(err),
            }),
        }
    }

    outcome
}

fn process_item(
    kind: EventKind,
    fields: Map<String, Value>,
    now: OffsetDateTime,
) -> Result<SubEvent, IngestError> {
    match kind {
        EventKind::Identify => process_sub::<Identify>(fields, now),
        EventKind::Track => process_sub::<Track>(fields, now),
        EventKind::Group => process_sub::<Group>(fields, now),
        EventKind::Alias => process_sub::<Alias>(fields, now),
        EventKind::Page => process_sub::<Page>(fields, now),
        EventKind::Screen => process_sub::<Screen>(fields, now),
        EventKind::Batch => Err(IngestError::RequestDecoding {
            kind: EventKind::Batch,
            detail: String::from("nested batch is not supported"),
        }),
    }
}

fn process_sub<P: EventPayload + Validate>(
    fields: Map<String, Value>,
    now: OffsetDateTime,
) -> Result<SubEvent, IngestError> {
    let payload: P = event::decode_lenient(fields)?;
    payload.validate().map_err(IngestError::Validation)?;
    normalize(payload, now)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    const NOW: OffsetDateTime = datetime!(2024-02-05 10:00:00 UTC);

    fn items(value: Value) -> Vec<Value> {
        value.as_array().cloned().unwrap()
    }

    #[test]
    fn valid_items_are_accepted_in_order() {
        let outcome = dispatch(
            items(json!([
                {"type": "track", "event": "A"},
                {"type": "identify", "userId": "user-1"},
                {"type": "track", "event": "B"},
            ])),
            NOW,
        );

        assert!(outcome.rejected.is_empty());
        let kinds: Vec<EventKind> = outcome.accepted.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Track, EventKind::Identify, EventKind::Track]
        );
    }

    #[test]
    fn bad_items_are_dropped_without_aborting_the_batch() {
        let outcome = dispatch(
            items(json!([
                {"type": "track", "event": "A"},
                {"type": "bogus"},
                {"type": "identify"},
                "not an object",
                {"event": "no type"},
            ])),
            NOW,
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].kind, EventKind::Track);

        assert_eq!(outcome.rejected.len(), 4);
        assert!(matches!(outcome.rejected[0].reason, RejectReason::UnsupportedKind));
        assert!(matches!(
            outcome.rejected[1].reason,
            RejectReason::Invalid(IngestError::Validation(_))
        ));
        assert!(matches!(outcome.rejected[2].reason, RejectReason::NotAnObject));
        assert!(matches!(
            outcome.rejected[3].reason,
            RejectReason::MissingDiscriminant
        ));
        assert_eq!(outcome.rejected[0].index, 1);
        assert_eq!(outcome.rejected[3].index, 4);
    }

    #[test]
    fn unknown_fields_inside_items_are_tolerated() {
        let outcome = dispatch(
            items(json!([
                {"type": "track", "event": "A", "unexpected": {"nested": true}},
            ])),
            NOW,
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn nested_batches_are_unsupported() {
        let outcome = dispatch(items(json!([{"type": "batch", "batch": []}])), NOW);
        assert!(outcome.accepted.is_empty());
        assert!(matches!(outcome.rejected[0].reason, RejectReason::UnsupportedKind));
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let body = json!({"batch": [{"type": "bogus"}]}).to_string();
        let event = process(body.as_bytes(), NOW).unwrap();
        match event.body {
            EventBody::SubEvents(subevents) => assert!(subevents.is_empty()),
            EventBody::Flows(_) => panic!("batch must produce sub-events"),
        }
    }

    #[test]
    fn envelope_tolerates_unknown_top_level_fields() {
        let body = json!({
            "batch": [{"type": "track", "event": "A"}],
            "sentFrom": "sdk",
        })
        .to_string();
        let event = process(body.as_bytes(), NOW).unwrap();
        match event.body {
            EventBody::SubEvents(subevents) => assert_eq!(subevents.len(), 1),
            EventBody::Flows(_) => panic!("batch must produce sub-events"),
        }
    }

    #[test]
    fn envelope_requires_the_batch_key() {
        let body = json!({"context": {}}).to_string();
        let err = process(body.as_bytes(), NOW).unwrap_err();
        assert!(matches!(
            err,
            IngestError::RequestDecoding { kind: EventKind::Batch, .. }
        ));
    }

    #[test]
    fn shared_context_and_timestamp_apply_to_the_envelope() {
        let body = json!({
            "batch": [],
            "context": {"library": "collect-test"},
            "timestamp": "2023-11-20T08:30:00Z",
        })
        .to_string();

        let event = process(body.as_bytes(), NOW).unwrap();
        assert_eq!(event.sent_at, datetime!(2023-11-20 08:30:00 UTC));
        let context = event.context.expect("shared context should be encoded");
        assert_eq!(context, json!({"library": "collect-test"}).to_string());
    }
}
