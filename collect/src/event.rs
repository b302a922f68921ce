use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

use crate::api::IngestError;

/// Protocol version tag carried by every normalized event.
pub const PROTOCOL_VERSION: &str = "v1.0";

/// Discriminant identifying which schema, validator and normalizer apply
/// to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Identify,
    Track,
    Group,
    Alias,
    Page,
    Screen,
    Batch,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Identify,
        EventKind::Track,
        EventKind::Group,
        EventKind::Alias,
        EventKind::Page,
        EventKind::Screen,
        EventKind::Batch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Identify => "identify",
            EventKind::Track => "track",
            EventKind::Group => "group",
            EventKind::Alias => "alias",
            EventKind::Page => "page",
            EventKind::Screen => "screen",
            EventKind::Batch => "batch",
        }
    }

    /// Schema name used in violation paths, e.g. `["analytics", "Track", "event"]`.
    pub fn schema_name(&self) -> &'static str {
        match self {
            EventKind::Identify => "Identify",
            EventKind::Track => "Track",
            EventKind::Group => "Group",
            EventKind::Alias => "Alias",
            EventKind::Page => "Page",
            EventKind::Screen => "Screen",
            EventKind::Batch => "Batch",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unsupported event kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identify" => Ok(EventKind::Identify),
            "track" => Ok(EventKind::Track),
            "group" => Ok(EventKind::Group),
            "alias" => Ok(EventKind::Alias),
            "page" => Ok(EventKind::Page),
            "screen" => Ok(EventKind::Screen),
            "batch" => Ok(EventKind::Batch),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Common capabilities of a decoded payload: its kind, its serialized
/// field names (used to drop unknown keys when decoding batch items), its
/// free-form context/data containers, and the downstream flow it maps to.
pub trait EventPayload: DeserializeOwned + Serialize {
    const KIND: EventKind;
    const FIELDS: &'static [&'static str];

    fn timestamp(&self) -> Option<OffsetDateTime>;
    fn context(&self) -> Option<&Map<String, Value>>;
    fn data(&self) -> Option<&Map<String, Value>>;
    fn into_flow(self) -> FlowDescriptor;
}

/// Strict decoding for single-event routes: unknown top-level fields are
/// rejected.
pub fn decode_strict<P: EventPayload>(body: &[u8]) -> Result<P, IngestError> {
    serde_json::from_slice(body).map_err(|e| IngestError::RequestDecoding {
        kind: P::KIND,
        detail: e.to_string(),
    })
}

/// Lenient decoding for batch sub-events: unknown keys are dropped before
/// decoding instead of failing the item.
pub fn decode_lenient<P: EventPayload>(mut fields: Map<String, Value>) -> Result<P, IngestError> {
    fields.retain(|key, _| P::FIELDS.contains(&key.as_str()));
    serde_json::from_value(Value::Object(fields)).map_err(|e| IngestError::RequestDecoding {
        kind: P::KIND,
        detail: e.to_string(),
    })
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Identify {
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub traits: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Track {
    pub event: Option<String>,
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub properties: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Group {
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub traits: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

/// Alias re-maps identities and carries no free-form data container.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Alias {
    pub previous_id: Option<String>,
    pub user_id: Option<String>,
    pub context: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Page {
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub properties: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Screen {
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub properties: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl EventPayload for Identify {
    const KIND: EventKind = EventKind::Identify;
    const FIELDS: &'static [&'static str] =
        &["userId", "anonymousId", "context", "traits", "timestamp"];

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }
    fn context(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref()
    }
    fn data(&self) -> Option<&Map<String, Value>> {
        self.traits.as_ref()
    }
    fn into_flow(self) -> FlowDescriptor {
        FlowDescriptor::Identify(self)
    }
}

impl EventPayload for Track {
    const KIND: EventKind = EventKind::Track;
    const FIELDS: &'static [&'static str] = &[
        "event",
        "userId",
        "anonymousId",
        "context",
        "properties",
        "timestamp",
    ];

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }
    fn context(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref()
    }
    fn data(&self) -> Option<&Map<String, Value>> {
        self.properties.as_ref()
    }
    fn into_flow(self) -> FlowDescriptor {
        FlowDescriptor::Track(self)
    }
}

impl EventPayload for Group {
    const KIND: EventKind = EventKind::Group;
    const FIELDS: &'static [&'static str] = &[
        "groupId",
        "userId",
        "anonymousId",
        "context",
        "traits",
        "timestamp",
    ];

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }
    fn context(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref()
    }
    fn data(&self) -> Option<&Map<String, Value>> {
        self.traits.as_ref()
    }
    fn into_flow(self) -> FlowDescriptor {
        FlowDescriptor::Group(self)
    }
}

impl EventPayload for Alias {
    const KIND: EventKind = EventKind::Alias;
    const FIELDS: &'static [&'static str] = &["previousId", "userId", "context", "timestamp"];

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }
    fn context(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref()
    }
    fn data(&self) -> Option<&Map<String, Value>> {
        None
    }
    fn into_flow(self) -> FlowDescriptor {
        FlowDescriptor::Alias(self)
    }
}

impl EventPayload for Page {
    const KIND: EventKind = EventKind::Page;
    const FIELDS: &'static [&'static str] = &[
        "name",
        "userId",
        "anonymousId",
        "context",
        "properties",
        "timestamp",
    ];

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }
    fn context(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref()
    }
    fn data(&self) -> Option<&Map<String, Value>> {
        self.properties.as_ref()
    }
    fn into_flow(self) -> FlowDescriptor {
        FlowDescriptor::Page(self)
    }
}

impl EventPayload for Screen {
    const KIND: EventKind = EventKind::Screen;
    const FIELDS: &'static [&'static str] = &[
        "name",
        "userId",
        "anonymousId",
        "context",
        "properties",
        "timestamp",
    ];

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }
    fn context(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref()
    }
    fn data(&self) -> Option<&Map<String, Value>> {
        self.properties.as_ref()
    }
    fn into_flow(self) -> FlowDescriptor {
        FlowDescriptor::Screen(self)
    }
}

/// Instruction for the downstream delivery layer: which flow should act
/// on the event, carrying the typed payload so no information is lost
/// through the mapping.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum FlowDescriptor {
    Identify(Identify),
    Track(Track),
    Group(Group),
    Alias(Alias),
    Page(Page),
    Screen(Screen),
}

impl FlowDescriptor {
    pub fn kind(&self) -> EventKind {
        match self {
            FlowDescriptor::Identify(_) => EventKind::Identify,
            FlowDescriptor::Track(_) => EventKind::Track,
            FlowDescriptor::Group(_) => EventKind::Group,
            FlowDescriptor::Alias(_) => EventKind::Alias,
            FlowDescriptor::Page(_) => EventKind::Page,
            FlowDescriptor::Screen(_) => EventKind::Screen,
        }
    }
}

/// One normalized member of a batch submission. Owned by the enclosing
/// NormalizedEvent, never persisted on its own.
#[derive(Debug, Clone)]
pub struct SubEvent {
    pub kind: EventKind,
    pub context: Option<String>,
    pub data: Option<String>,
    pub timestamp: OffsetDateTime,
    pub flows: Vec<FlowDescriptor>,
}

impl SubEvent {
    /// Lift a single-kind result into a full normalized event.
    pub fn into_event(self) -> NormalizedEvent {
        NormalizedEvent {
            version: PROTOCOL_VERSION,
            context: self.context,
            data: self.data,
            sent_at: self.timestamp,
            body: EventBody::Flows(self.flows),
        }
    }
}

/// Canonical output of the ingestion core, handed to the transport layer.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub version: &'static str,
    /// Canonical JSON encoding of the context map, if one was submitted.
    pub context: Option<String>,
    /// Canonical JSON encoding of the data/traits/properties map.
    pub data: Option<String>,
    /// Always populated: explicit payload timestamp, else normalization time.
    pub sent_at: OffsetDateTime,
    pub body: EventBody,
}

/// A normalized event carries flows (single submission) or sub-events
/// (batch submission), never both.
#[derive(Debug, Clone)]
pub enum EventBody {
    Flows(Vec<FlowDescriptor>),
    SubEvents(Vec<SubEvent>),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn kind_round_trips_through_its_wire_string() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[test]
    fn strict_decoding_rejects_unknown_fields() {
        let body = json!({"event": "Signed Up", "unexpected": true}).to_string();
        let decoded = decode_strict::<Track>(body.as_bytes());
        assert!(matches!(
            decoded,
            Err(IngestError::RequestDecoding { kind: EventKind::Track, .. })
        ));
    }

    #[test]
    fn lenient_decoding_drops_unknown_fields() {
        let fields = json!({"event": "Signed Up", "unexpected": true})
            .as_object()
            .cloned()
            .unwrap();
        let decoded: Track = decode_lenient(fields).expect("unknown field should be tolerated");
        assert_eq!(decoded.event.as_deref(), Some("Signed Up"));
    }

    #[test]
    fn timestamps_decode_from_rfc3339() {
        let body = json!({"event": "A", "timestamp": "2024-02-05T10:00:00Z"}).to_string();
        let decoded = decode_strict::<Track>(body.as_bytes()).unwrap();
        let timestamp = decoded.timestamp.unwrap();
        assert_eq!(timestamp.year(), 2024);
        assert_eq!(timestamp.offset(), time::UtcOffset::UTC);
    }

    #[test]
    fn flow_descriptor_serializes_with_kind_tag() {
        let flow = Track {
            event: Some(String::from("Signed Up")),
            ..Default::default()
        }
        .into_flow();

        let value = serde_json::to_value(&flow).unwrap();
        assert_eq!(value["flow"], json!("track"));
        assert_eq!(value["event"], json!("Signed Up"));
    }
}
