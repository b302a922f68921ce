use axum::extract::State;
use axum::Json;
use bytes::Bytes;
use metrics::counter;
use tracing::instrument;

use crate::api::{IngestError, SubmitResponse};
use crate::prometheus::report_dropped_events;
use crate::registry::Trigger;
use crate::router;

/// Handler behind every registered trigger route. Decoding, validation
/// and normalization all happen synchronously in here, the transport
/// layer owns deadlines and delivery.
#[instrument(skip_all, fields(kind = %trigger.kind, payload_size = body.len()))]
pub async fn submit(
    State(state): State<router::State>,
    trigger: Trigger,
    body: Bytes,
) -> Result<Json<SubmitResponse>, IngestError> {
    counter!("collect_events_received_total", "kind" => trigger.kind.as_str()).increment(1);

    let now = state.timesource.current_time();
    let event = trigger.process(&body, now).map_err(|err| {
        report_dropped_events(err.cause(), 1);
        tracing::warn!(kind = %trigger.kind, "rejected invalid payload: {}", err);
        err
    })?;

    Ok(Json(SubmitResponse::from_event(
        event,
        trigger.show_meta,
        trigger.show_data,
    )))
}
