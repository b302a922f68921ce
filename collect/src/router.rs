use std::future::ready;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::ingest;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::registry::TriggerRegistry;
use crate::time::TimeSource;

#[derive(Clone)]
pub struct State {
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
}

async fn index() -> &'static str {
    "collect"
}

pub fn router<TZ: TimeSource + Send + Sync + 'static>(
    timesource: TZ,
    config: &Config,
    metrics: bool,
) -> Router {
    let state = State {
        timesource: Arc::new(timesource),
    };

    let registry = TriggerRegistry::new(config);

    let mut router = Router::new().route("/", get(index));
    for trigger in registry.into_triggers() {
        let path = trigger.path.clone();
        router = router.route(
            &path,
            post(move |state: axum::extract::State<State>, body: Bytes| {
                ingest::submit(state, trigger.clone(), body)
            }),
        );
    }

    let router = router
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when collect is used as a library (during tests etc)
    // does not work well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();

        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
