//! Push-update payloads received on the `status` namespace
//!
//! The backend sends two events: `"tag"` (scoped to one tag) and `"inbox"`
//! (global). Both carry an `attributes` field that is either the sentinel
//! string `"all"` or a partial map of field name to string value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Sentinel meaning "re-fetch the whole entity"
pub const ALL_ATTRIBUTES: &str = "all";

/// Attribute payload of a push update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Attributes {
    /// Everything may have changed; the client must refetch
    All,
    /// Only these fields changed
    Partial(BTreeMap<String, String>),
}

impl Attributes {
    pub fn is_all(&self) -> bool {
        matches!(self, Attributes::All)
    }
}

impl TryFrom<Value> for Attributes {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) if s == ALL_ATTRIBUTES => Ok(Attributes::All),
            Value::String(s) => Err(Error::Protocol(format!(
                "attributes must be \"all\" or an object, got string {:?}",
                s
            ))),
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (key, v) in map {
                    // Record<string, string> on the wire; scalars are tolerated
                    // (distance arrives as a number from some backend versions).
                    let text = match v {
                        Value::String(s) => s,
                        Value::Null => continue,
                        Value::Bool(_) | Value::Number(_) => v.to_string(),
                        other => {
                            return Err(Error::Protocol(format!(
                                "attribute {:?} has non-scalar value {}",
                                key, other
                            )))
                        }
                    };
                    fields.insert(key, text);
                }
                Ok(Attributes::Partial(fields))
            }
            other => Err(Error::Protocol(format!(
                "attributes must be \"all\" or an object, got {}",
                other
            ))),
        }
    }
}

impl From<Attributes> for Value {
    fn from(attributes: Attributes) -> Self {
        match attributes {
            Attributes::All => Value::String(ALL_ATTRIBUTES.to_string()),
            Attributes::Partial(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            ),
        }
    }
}

/// `"tag"` event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagUpdate {
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_path: Option<String>,
}

/// `"inbox"` event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxUpdate {
    pub attributes: Attributes,
}

/// Decoded event from the `status` namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum StatusEvent {
    Tag(TagUpdate),
    Inbox(InboxUpdate),
}

impl StatusEvent {
    /// Decode a named socket event.
    ///
    /// Returns `Ok(None)` for event names this client does not listen to.
    pub fn from_socket_event(name: &str, payload: Value) -> Result<Option<Self>> {
        match name {
            "tag" => Ok(Some(StatusEvent::Tag(serde_json::from_value(payload)?))),
            "inbox" => Ok(Some(StatusEvent::Inbox(serde_json::from_value(payload)?))),
            _ => Ok(None),
        }
    }
}
