use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueueResult;

/// Prefix of the legacy entity token wire form
pub const ENTITY_TOKEN_PREFIX: &str = "::entity::";

/// Canonical wire envelope for one queued job
///
/// Serializes as `{"job": "<handler-ref>", "data": {...}}`. The handler
/// reference is resolved against the process-local [`HandlerRegistry`]
/// when the job fires.
///
/// [`HandlerRegistry`]: crate::job::HandlerRegistry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Handler reference for dispatch
    pub job: String,

    /// Data handed to the handler
    pub data: Value,
}

impl Payload {
    /// Build the canonical payload string for a job and its data.
    ///
    /// Entity references inside `data` are recursively replaced by their
    /// legacy token form so stateful domain entities travel by id, never by
    /// value.
    pub fn create(job: &str, data: Value) -> QueueResult<String> {
        let payload = Payload {
            job: job.to_string(),
            data: prepare_entities(data),
        };

        Ok(serde_json::to_string(&payload)?)
    }

    /// Decode a raw payload string back into the envelope
    pub fn decode(raw: &str) -> QueueResult<Payload> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Empty placeholder used when a raw body cannot be decoded
    pub(crate) fn unparsed() -> Payload {
        Payload {
            job: String::new(),
            data: Value::Null,
        }
    }
}

/// Reference to a stateful domain entity, carried by type and id
///
/// The structured wire form is `{"kind":"entity_ref","type":"User","id":"7"}`.
/// For interop with the legacy string encoding, [`EntityRef::token`] renders
/// `"::entity::|User|7"` and [`EntityRef::from_value`] accepts either form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "entity_ref")]
pub struct EntityRef {
    /// Entity type name
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Stable entity identifier
    pub id: String,
}

impl EntityRef {
    /// Create a new entity reference
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Render the legacy token wire form
    pub fn token(&self) -> String {
        format!("{}|{}|{}", ENTITY_TOKEN_PREFIX, self.entity_type, self.id)
    }

    /// Parse a legacy token back into a reference
    pub fn parse_token(token: &str) -> Option<Self> {
        let mut parts = token.split('|');

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ENTITY_TOKEN_PREFIX), Some(entity_type), Some(id), None) => {
                Some(Self::new(entity_type, id))
            }
            _ => None,
        }
    }

    /// Extract a reference from either wire form
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(token) => Self::parse_token(token),
            Value::Object(map) => entity_ref_from_map(map),
            _ => None,
        }
    }
}

fn entity_ref_from_map(map: &Map<String, Value>) -> Option<EntityRef> {
    if map.get("kind")?.as_str()? != "entity_ref" {
        return None;
    }

    Some(EntityRef::new(
        map.get("type")?.as_str()?,
        map.get("id")?.as_str()?,
    ))
}

/// Recursively replace structured entity references with their token form
fn prepare_entities(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(entity) = entity_ref_from_map(&map) {
                return Value::String(entity.token());
            }

            Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, prepare_entities(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(prepare_entities).collect()),
        other => other,
    }
}
