//! Stream message normalization
//!
//! An openHAB event looks like
//!
//! ```json
//! {
//!   "type": "ItemStateChangedEvent",
//!   "topic": "openhab/items/Kitchen_Light/statechanged",
//!   "payload": "{\"type\":\"OnOff\",\"value\":\"ON\",\"oldType\":\"OnOff\",\"oldValue\":\"OFF\"}"
//! }
//! ```
//!
//! with the payload itself JSON-encoded as a string.

use oh_core::{resolve_concept, NormalizedEvent, TOPIC_NAMESPACES};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid event message: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Parsed `<namespace>/<concept>/<identifier>[/<suffix>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopic<'a> {
    pub namespace: &'a str,
    pub concept: &'a str,
    pub identifier: &'a str,
    pub suffix: Option<&'a str>,
}

impl<'a> EventTopic<'a> {
    /// `None` unless the namespace is known and every segment is non-empty
    pub fn parse(topic: &'a str) -> Option<Self> {
        let mut segments = topic.splitn(4, '/');
        let namespace = segments.next()?;
        let concept = segments.next().filter(|s| !s.is_empty())?;
        let identifier = segments.next().filter(|s| !s.is_empty())?;
        let suffix = match segments.next() {
            Some("") => return None,
            suffix => suffix,
        };

        if !TOPIC_NAMESPACES.contains(&namespace) {
            return None;
        }

        Some(Self {
            namespace,
            concept,
            identifier,
            suffix,
        })
    }
}

/// Parse one stream message into a normalized event
///
/// Returns `Ok(None)` for messages that are valid JSON but carry nothing to
/// publish: blank data, missing fields, an unknown namespace or concept.
pub fn parse_stream_message(data: &str) -> Result<Option<NormalizedEvent>, MessageError> {
    if data.trim().is_empty() {
        return Ok(None);
    }

    let raw: Value = serde_json::from_str(data)?;

    let Some(event_type) = non_empty_str(&raw, "type") else {
        return Ok(None);
    };
    let Some(topic) = non_empty_str(&raw, "topic") else {
        return Ok(None);
    };
    let payload = match raw.get("payload") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.is_empty() => return Ok(None),
        Some(Value::String(s)) => decode_nested(s),
        Some(other) => other.clone(),
    };

    let Some(topic) = EventTopic::parse(topic) else {
        return Ok(None);
    };
    let concept = resolve_concept(topic.concept);
    if concept.is_unknown() {
        return Ok(None);
    }

    let event = NormalizedEvent::new(
        concept.topic_for(topic.identifier),
        concept.event_payload_of(&payload),
        raw.clone(),
    )
    .with_payload_type(concept.payload_type_of(&payload))
    .with_event_type(event_type)
    .with_event_suffix(topic.suffix.map(str::to_string));

    Ok(Some(event))
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// A JSON-encoded payload string, decoded when possible
///
/// Structured values and numbers are taken as parsed; anything that does not
/// parse, or parses to `null`, stays the original string.
fn decode_nested(payload: &str) -> Value {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Null) | Err(_) => Value::String(payload.to_string()),
        Ok(value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(event_type: &str, topic: &str, payload: &str) -> String {
        json!({"type": event_type, "topic": topic, "payload": payload}).to_string()
    }

    #[test]
    fn test_item_state_event() {
        let data = message(
            "ItemStateEvent",
            "openhab/items/Kitchen_Light/state",
            r#"{"type":"OnOff","value":"ON"}"#,
        );
        let event = parse_stream_message(&data).unwrap().unwrap();

        assert_eq!(event.topic, "items/Kitchen_Light");
        assert_eq!(event.payload, json!("ON"));
        assert_eq!(event.payload_type.as_deref(), Some("OnOff"));
        assert_eq!(event.event_type.as_deref(), Some("ItemStateEvent"));
        assert_eq!(event.event_suffix.as_deref(), Some("state"));
        assert_eq!(event.raw["topic"], "openhab/items/Kitchen_Light/state");
    }

    #[test]
    fn test_payload_without_type() {
        let data = message(
            "ItemStateEvent",
            "openhab/items/Kitchen_Light/state",
            r#"{"value":"ON"}"#,
        );
        let event = parse_stream_message(&data).unwrap().unwrap();
        assert_eq!(event.topic, "items/Kitchen_Light");
        assert_eq!(event.payload, json!("ON"));
        assert_eq!(event.payload_type, None);
    }

    #[test]
    fn test_legacy_namespace() {
        let data = message(
            "ItemStateEvent",
            "smarthome/items/Temp/state",
            r#"{"type":"Decimal","value":"21.5"}"#,
        );
        let event = parse_stream_message(&data).unwrap().unwrap();
        assert_eq!(event.topic, "items/Temp");
        assert_eq!(event.payload, json!("21.5"));
    }

    #[test]
    fn test_thing_status_changed() {
        let data = message(
            "ThingStatusInfoChangedEvent",
            "openhab/things/hue:bridge:001/statuschanged",
            r#"[{"status":"ONLINE"},{"status":"OFFLINE"}]"#,
        );
        let event = parse_stream_message(&data).unwrap().unwrap();
        assert_eq!(event.topic, "things/hue:bridge:001");
        assert_eq!(event.payload, json!("ONLINE"));
        assert_eq!(event.payload_type.as_deref(), Some("ThingStatus"));
    }

    #[test]
    fn test_unknown_namespace_dropped() {
        let data = message("ItemStateEvent", "bogus/items/X/state", r#"{"value":"ON"}"#);
        assert!(parse_stream_message(&data).unwrap().is_none());
    }

    #[test]
    fn test_unknown_concept_dropped() {
        let data = message(
            "InboxAddedEvent",
            "openhab/inbox/hue:bulb:1/added",
            r#"{"label":"Bulb"}"#,
        );
        assert!(parse_stream_message(&data).unwrap().is_none());
    }

    #[test]
    fn test_missing_fields_dropped() {
        let no_type = json!({"topic": "openhab/items/X/state", "payload": "ON"}).to_string();
        assert!(parse_stream_message(&no_type).unwrap().is_none());

        let empty_topic = message("ItemStateEvent", "", "ON");
        assert!(parse_stream_message(&empty_topic).unwrap().is_none());

        let empty_payload = message("ItemStateEvent", "openhab/items/X/state", "");
        assert!(parse_stream_message(&empty_payload).unwrap().is_none());
    }

    #[test]
    fn test_blank_data_ignored() {
        assert!(parse_stream_message("").unwrap().is_none());
        assert!(parse_stream_message("  \n").unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_is_error() {
        let error = parse_stream_message("{not json").unwrap_err();
        assert!(error.to_string().starts_with("invalid event message"));
    }

    #[test]
    fn test_nested_payload_decoding() {
        assert_eq!(decode_nested(r#"{"value":"ON"}"#), json!({"value": "ON"}));
        assert_eq!(decode_nested("42"), json!(42));
        assert_eq!(decode_nested("21.5"), json!(21.5));
        assert_eq!(decode_nested("true"), json!(true));
        assert_eq!(decode_nested("null"), json!("null"));
        assert_eq!(decode_nested("ON"), json!("ON"));
    }

    #[test]
    fn test_numeric_payload_coerced() {
        let data = message("RuleStatusInfoEvent", "openhab/rules/r1/state", "7");
        let event = parse_stream_message(&data).unwrap().unwrap();
        assert_eq!(event.topic, "rules/r1");
        assert_eq!(event.payload, json!(7));
    }

    #[test]
    fn test_topic_shapes() {
        let topic = EventTopic::parse("openhab/items/Lamp").unwrap();
        assert_eq!(topic.identifier, "Lamp");
        assert_eq!(topic.suffix, None);

        let topic = EventTopic::parse("openhab/items/Lamp/state/extra").unwrap();
        assert_eq!(topic.suffix, Some("state/extra"));

        assert!(EventTopic::parse("openhab/items").is_none());
        assert!(EventTopic::parse("openhab//Lamp").is_none());
        assert!(EventTopic::parse("openhab/items/Lamp/").is_none());
    }
}
