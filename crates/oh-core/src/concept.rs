//! Concept registry
//!
//! Static table of the resource classes the bridge knows how to address on
//! the openHAB REST API: where to read them, which operations they accept,
//! and how a REST body or a stream payload is reduced to a single value.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;

use crate::resource::Operation;

/// HTTP method used by a concept endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// How a request payload is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// `text/plain`: strings verbatim, everything else JSON-encoded
    Text,
    /// `application/json`
    Json,
}

/// A write endpoint (command or update) for a concept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    /// Path template; `{id}` is replaced by the resource identifier
    pub path: &'static str,
    pub encoding: BodyEncoding,
}

impl Endpoint {
    pub fn path_for(&self, identifier: &str) -> String {
        expand(self.path, identifier)
    }
}

/// Static description of one concept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConceptSpec {
    /// Concept name as it appears in topics and locators
    pub name: &'static str,
    /// Field holding the identifier in enumeration responses
    pub id_field: &'static str,
    /// Collection endpoint listing every resource of the concept
    pub get_all_path: &'static str,
    /// Single resource endpoint, `{id}` templated
    pub get_path: &'static str,
    pub command: Option<Endpoint>,
    pub update: Option<Endpoint>,
    /// JSON pointers tried in order on a REST body; whole body if none match
    pub rest_payload: &'static [&'static str],
    /// JSON pointers tried in order on a stream payload; whole payload if none match
    pub event_payload: &'static [&'static str],
    /// JSON pointer for the payload type
    pub type_pointer: Option<&'static str>,
    /// Payload type used when the pointer yields nothing
    pub default_type: Option<&'static str>,
    /// Whether the session enumerates this concept when the connection comes up
    pub enumerate: bool,
    is_unknown: bool,
}

/// Escaped when an identifier is put into a path; `:` and `@` stay as they
/// are so thing UIDs read naturally
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Concepts enumerated on connect, in publishing order
pub const ENUMERATION_ORDER: &[&str] = &["things", "items"];

pub static ITEMS: ConceptSpec = ConceptSpec {
    name: "items",
    id_field: "name",
    get_all_path: "/rest/items",
    get_path: "/rest/items/{id}",
    command: Some(Endpoint {
        method: Method::Post,
        path: "/rest/items/{id}",
        encoding: BodyEncoding::Text,
    }),
    update: Some(Endpoint {
        method: Method::Put,
        path: "/rest/items/{id}/state",
        encoding: BodyEncoding::Text,
    }),
    rest_payload: &["/state"],
    event_payload: &["/value"],
    type_pointer: Some("/type"),
    default_type: None,
    enumerate: true,
    is_unknown: false,
};

pub static THINGS: ConceptSpec = ConceptSpec {
    name: "things",
    id_field: "UID",
    get_all_path: "/rest/things",
    get_path: "/rest/things/{id}",
    command: None,
    update: None,
    rest_payload: &["/statusInfo/status"],
    // ThingStatusInfoChangedEvent carries [new, old]
    event_payload: &["/status", "/0/status"],
    type_pointer: None,
    default_type: Some("ThingStatus"),
    enumerate: true,
    is_unknown: false,
};

pub static RULES: ConceptSpec = ConceptSpec {
    name: "rules",
    id_field: "uid",
    get_all_path: "/rest/rules",
    get_path: "/rest/rules/{id}",
    command: Some(Endpoint {
        method: Method::Post,
        path: "/rest/rules/{id}/runnow",
        encoding: BodyEncoding::Json,
    }),
    update: None,
    rest_payload: &["/status/status"],
    event_payload: &["/status"],
    type_pointer: None,
    default_type: Some("RuleStatus"),
    enumerate: false,
    is_unknown: false,
};

/// Sentinel returned for any name not in the registry
pub static UNKNOWN_CONCEPT: ConceptSpec = ConceptSpec {
    name: "unknown",
    id_field: "",
    get_all_path: "",
    get_path: "",
    command: None,
    update: None,
    rest_payload: &[],
    event_payload: &[],
    type_pointer: None,
    default_type: None,
    enumerate: false,
    is_unknown: true,
};

static REGISTRY: &[&ConceptSpec] = &[&ITEMS, &THINGS, &RULES];

/// Resolve a concept by name. Unknown names yield [`UNKNOWN_CONCEPT`].
pub fn resolve(name: &str) -> &'static ConceptSpec {
    REGISTRY
        .iter()
        .copied()
        .find(|c| c.name == name)
        .unwrap_or(&UNKNOWN_CONCEPT)
}

impl ConceptSpec {
    pub fn is_unknown(&self) -> bool {
        self.is_unknown
    }

    pub fn get_path_for(&self, identifier: &str) -> String {
        expand(self.get_path, identifier)
    }

    /// Write endpoint for an operation, `None` if the concept does not support it.
    /// `Get` is always served by [`ConceptSpec::get_path`].
    pub fn endpoint(&self, operation: Operation) -> Option<&Endpoint> {
        match operation {
            Operation::Get => None,
            Operation::Command => self.command.as_ref(),
            Operation::Update => self.update.as_ref(),
        }
    }

    /// Static capability table
    pub fn supports(&self, operation: Operation) -> bool {
        if self.is_unknown {
            return false;
        }
        match operation {
            Operation::Get => true,
            op => self.endpoint(op).is_some(),
        }
    }

    pub fn topic_for(&self, identifier: &str) -> String {
        format!("{}/{}", self.name, identifier)
    }

    /// Identifier of a resource in an enumeration response
    pub fn identifier_of<'a>(&self, resource: &'a Value) -> Option<&'a str> {
        resource
            .get(self.id_field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Reduce a REST body to its payload value
    pub fn rest_payload_of(&self, body: &Value) -> Value {
        first_match(body, self.rest_payload)
    }

    /// Reduce a stream event payload to its payload value
    pub fn event_payload_of(&self, payload: &Value) -> Value {
        first_match(payload, self.event_payload)
    }

    pub fn payload_type_of(&self, value: &Value) -> Option<String> {
        self.type_pointer
            .and_then(|p| value.pointer(p))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.default_type.map(str::to_string))
    }
}

fn first_match(value: &Value, pointers: &[&str]) -> Value {
    pointers
        .iter()
        .find_map(|p| value.pointer(p))
        .cloned()
        .unwrap_or_else(|| value.clone())
}

fn expand(template: &str, identifier: &str) -> String {
    let segment = utf8_percent_encode(identifier, PATH_SEGMENT).to_string();
    template.replace("{id}", &segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_known_and_unknown() {
        assert_eq!(resolve("items").name, "items");
        assert!(!resolve("things").is_unknown());
        assert!(resolve("sitemaps").is_unknown());
        assert!(resolve("").is_unknown());
    }

    #[test]
    fn test_capability_table() {
        assert!(ITEMS.supports(Operation::Get));
        assert!(ITEMS.supports(Operation::Command));
        assert!(ITEMS.supports(Operation::Update));

        assert!(THINGS.supports(Operation::Get));
        assert!(!THINGS.supports(Operation::Command));
        assert!(!THINGS.supports(Operation::Update));

        assert!(RULES.supports(Operation::Command));
        assert!(!RULES.supports(Operation::Update));

        assert!(!UNKNOWN_CONCEPT.supports(Operation::Get));
    }

    #[test]
    fn test_paths() {
        assert_eq!(ITEMS.get_path_for("Kitchen_Light"), "/rest/items/Kitchen_Light");
        let update = ITEMS.endpoint(Operation::Update).unwrap();
        assert_eq!(update.method, Method::Put);
        assert_eq!(update.path_for("Kitchen_Light"), "/rest/items/Kitchen_Light/state");
        let run = RULES.endpoint(Operation::Command).unwrap();
        assert_eq!(run.path_for("r1"), "/rest/rules/r1/runnow");
    }

    #[test]
    fn test_identifier_escaping() {
        assert_eq!(RULES.get_path_for("my rule"), "/rest/rules/my%20rule");
        assert_eq!(RULES.get_path_for("a/b?c#d"), "/rest/rules/a%2Fb%3Fc%23d");
        assert_eq!(ITEMS.get_path_for("100%"), "/rest/items/100%25");
        assert_eq!(
            THINGS.get_path_for("zwave:device:ctrl:node5"),
            "/rest/things/zwave:device:ctrl:node5"
        );
        assert_eq!(ITEMS.get_path_for("Küche"), "/rest/items/K%C3%BCche");
    }

    #[test]
    fn test_item_payload_extraction() {
        let body = json!({"name": "Kitchen_Light", "state": "ON", "type": "Switch"});
        assert_eq!(ITEMS.rest_payload_of(&body), json!("ON"));
        assert_eq!(ITEMS.payload_type_of(&body).as_deref(), Some("Switch"));
        assert_eq!(ITEMS.identifier_of(&body), Some("Kitchen_Light"));

        let event = json!({"type": "OnOff", "value": "ON"});
        assert_eq!(ITEMS.event_payload_of(&event), json!("ON"));
        assert_eq!(ITEMS.payload_type_of(&event).as_deref(), Some("OnOff"));
    }

    #[test]
    fn test_thing_payload_extraction() {
        let body = json!({"UID": "hue:bridge:1", "statusInfo": {"status": "ONLINE"}});
        assert_eq!(THINGS.rest_payload_of(&body), json!("ONLINE"));
        assert_eq!(THINGS.payload_type_of(&body).as_deref(), Some("ThingStatus"));

        let changed = json!([{"status": "OFFLINE"}, {"status": "ONLINE"}]);
        assert_eq!(THINGS.event_payload_of(&changed), json!("OFFLINE"));
    }

    #[test]
    fn test_payload_falls_back_to_whole_value() {
        let added = json!({"name": "New_Item", "type": "Number"});
        assert_eq!(ITEMS.event_payload_of(&added), added);
    }
}
