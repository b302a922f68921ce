use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::api::IngestError;
use crate::event::{self, EventPayload, NormalizedEvent, SubEvent};
use crate::validate::Validate;

/// Turn a validated payload into its normalized form: default the
/// timestamp to `now` when the payload carries none, canonically encode
/// the context and data maps, and map the kind to its downstream flow.
pub fn normalize<P: EventPayload>(payload: P, now: OffsetDateTime) -> Result<SubEvent, IngestError> {
    let timestamp = payload.timestamp().unwrap_or(now);
    let context = encode_canonical(payload.context())?;
    let data = encode_canonical(payload.data())?;

    Ok(SubEvent {
        kind: P::KIND,
        context,
        data,
        timestamp,
        flows: vec![payload.into_flow()],
    })
}

/// Canonical byte-exact JSON encoding of a free-form map. Absence stays
/// absent, it is never encoded as an empty object.
pub(crate) fn encode_canonical(
    fields: Option<&Map<String, Value>>,
) -> Result<Option<String>, IngestError> {
    fields
        .map(|map| {
            serde_json::to_string(map).map_err(|e| {
                tracing::error!("failed to encode payload field: {}", e);
                IngestError::PayloadEncoding
            })
        })
        .transpose()
}

/// Full pipeline for a single-event route: strict decode, validate,
/// normalize.
pub fn process_single<P: EventPayload + Validate>(
    body: &[u8],
    now: OffsetDateTime,
) -> Result<NormalizedEvent, IngestError> {
    let payload: P = event::decode_strict(body)?;
    payload.validate().map_err(IngestError::Validation)?;
    Ok(normalize(payload, now)?.into_event())
}
