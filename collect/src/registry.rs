use axum::http::Method;
use time::OffsetDateTime;

use crate::api::IngestError;
use crate::batch;
use crate::config::Config;
use crate::event::{Alias, EventKind, Group, Identify, NormalizedEvent, Page, Screen, Track};
use crate::normalize::process_single;

type ProcessFn = fn(&[u8], OffsetDateTime) -> Result<NormalizedEvent, IngestError>;

/// One registered kind: the HTTP route it is reachable under, the
/// verbosity flags to apply to its responses, and the
/// decode+validate+normalize pipeline to run on its payloads.
#[derive(Clone)]
pub struct Trigger {
    pub kind: EventKind,
    pub method: Method,
    pub path: String,
    pub show_meta: bool,
    pub show_data: bool,
    process: ProcessFn,
}

impl Trigger {
    pub fn process(&self, body: &[u8], now: OffsetDateTime) -> Result<NormalizedEvent, IngestError> {
        (self.process)(body, now)
    }
}

/// Static table mapping every supported kind to its trigger. Construction
/// is deterministic and total, registration never changes after startup.
pub struct TriggerRegistry {
    triggers: Vec<Trigger>,
}

impl TriggerRegistry {
    pub fn new(config: &Config) -> Self {
        let triggers = EventKind::ALL
            .iter()
            .map(|&kind| Trigger {
                kind,
                method: Method::POST,
                path: format!("{}/v1/{}", config.prefix, kind),
                show_meta: config.show_meta,
                show_data: config.show_data,
                process: process_fn(kind),
            })
            .collect();

        TriggerRegistry { triggers }
    }

    pub fn get(&self, kind: EventKind) -> Option<&Trigger> {
        self.triggers.iter().find(|trigger| trigger.kind == kind)
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn into_triggers(self) -> Vec<Trigger> {
        self.triggers
    }
}

fn process_fn(kind: EventKind) -> ProcessFn {
    match kind {
        EventKind::Identify => process_single::<Identify>,
        EventKind::Track => process_single::<Track>,
        EventKind::Group => process_single::<Group>,
        EventKind::Alias => process_single::<Alias>,
        EventKind::Page => process_single::<Page>,
        EventKind::Screen => process_single::<Screen>,
        EventKind::Batch => batch::process,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_prefix(prefix: &str) -> Config {
        Config {
            address: "127.0.0.1:0".parse().unwrap(),
            prefix: prefix.to_string(),
            show_meta: true,
            show_data: true,
            export_prometheus: false,
        }
    }

    #[test]
    fn every_kind_is_registered() {
        let registry = TriggerRegistry::new(&config_with_prefix(""));
        assert_eq!(registry.triggers().len(), EventKind::ALL.len());
        for kind in EventKind::ALL {
            let trigger = registry.get(kind).expect("kind must be registered");
            assert_eq!(trigger.method, Method::POST);
            assert_eq!(trigger.path, format!("/v1/{kind}"));
        }
    }

    #[test]
    fn routes_honor_the_configured_prefix() {
        let registry = TriggerRegistry::new(&config_with_prefix("/cdp"));
        let trigger = registry.get(EventKind::Track).unwrap();
        assert_eq!(trigger.path, "/cdp/v1/track");
    }
}
