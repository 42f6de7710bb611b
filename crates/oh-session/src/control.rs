//! Control façade types

use oh_client::{ApiRequest, RequestBody, RequestError};
use oh_core::concept::{BodyEncoding, ConceptSpec};
use oh_core::{Operation, ResourceError, ResourceLocator};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub type ControlResult = Result<ControlOutput, ControlError>;

/// Why a control call failed
///
/// Validation failures never reach the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("missing identifier")]
    MissingIdentifier,

    #[error("unknown concept '{0}'")]
    UnknownConcept(String),

    #[error("{operation}: unsupported for '{concept}'")]
    Unsupported {
        operation: Operation,
        concept: String,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Normalized answer to a `get`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceState {
    pub topic: String,
    pub payload: Value,
    #[serde(rename = "payloadType", skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,
    /// The REST body as received
    pub openhab: Value,
}

impl ResourceState {
    pub fn from_rest(concept: &ConceptSpec, identifier: &str, body: Value) -> Self {
        Self {
            topic: concept.topic_for(identifier),
            payload: concept.rest_payload_of(&body),
            payload_type: concept.payload_type_of(&body),
            openhab: body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutput {
    /// Result of `get`
    State(ResourceState),
    /// Raw result of `command` / `update`
    Accepted(Value),
}

impl ControlOutput {
    pub fn as_state(&self) -> Option<&ResourceState> {
        match self {
            ControlOutput::State(state) => Some(state),
            ControlOutput::Accepted(_) => None,
        }
    }
}

/// Validate a control call and build its request
pub fn build_request(
    resource: &ResourceLocator,
    operation: Operation,
    payload: Option<Value>,
) -> Result<(&'static ConceptSpec, ApiRequest), ControlError> {
    if resource.identifier.trim().is_empty() {
        return Err(ControlError::MissingIdentifier);
    }

    let concept = oh_core::resolve_concept(&resource.concept);
    if concept.is_unknown() {
        return Err(ControlError::UnknownConcept(resource.concept.clone()));
    }

    if !concept.supports(operation) {
        return Err(ControlError::Unsupported {
            operation,
            concept: concept.name.to_string(),
        });
    }

    let Some(endpoint) = concept.endpoint(operation) else {
        return Ok((
            concept,
            ApiRequest::get(concept.get_path_for(&resource.identifier)),
        ));
    };

    let mut request = ApiRequest::new(endpoint.method, endpoint.path_for(&resource.identifier));
    if let Some(body) = encode_body(endpoint.encoding, payload) {
        request = request.with_body(body);
    }
    Ok((concept, request))
}

/// Text bodies carry strings verbatim and anything else JSON-encoded
fn encode_body(encoding: BodyEncoding, payload: Option<Value>) -> Option<RequestBody> {
    match (encoding, payload) {
        (BodyEncoding::Text, None) => None,
        (BodyEncoding::Text, Some(Value::String(text))) => Some(RequestBody::Text(text)),
        (BodyEncoding::Text, Some(other)) => Some(RequestBody::Text(other.to_string())),
        (BodyEncoding::Json, payload) => {
            Some(RequestBody::Json(payload.unwrap_or_else(|| json!({}))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oh_core::Method;

    #[test]
    fn test_missing_identifier() {
        let resource = ResourceLocator::new("items", "");
        assert_eq!(
            build_request(&resource, Operation::Get, None).unwrap_err(),
            ControlError::MissingIdentifier
        );
    }

    #[test]
    fn test_unknown_concept() {
        let resource = ResourceLocator::new("gadgets", "X");
        let error = build_request(&resource, Operation::Get, None).unwrap_err();
        assert_eq!(error.to_string(), "unknown concept 'gadgets'");
    }

    #[test]
    fn test_unsupported_operation() {
        let resource = ResourceLocator::new("things", "hue:bridge:001");
        let error = build_request(&resource, Operation::Command, None).unwrap_err();
        assert_eq!(error.to_string(), "command: unsupported for 'things'");

        let resource = ResourceLocator::new("rules", "r1");
        let error = build_request(&resource, Operation::Update, None).unwrap_err();
        assert_eq!(error.to_string(), "update: unsupported for 'rules'");
    }

    #[test]
    fn test_item_requests() {
        let resource = ResourceLocator::new("items", "Kitchen_Light");

        let (_, get) = build_request(&resource, Operation::Get, None).unwrap();
        assert_eq!(get.method, Method::Get);
        assert_eq!(get.path, "/rest/items/Kitchen_Light");

        let (_, command) =
            build_request(&resource, Operation::Command, Some(Value::from("ON"))).unwrap();
        assert_eq!(command.method, Method::Post);
        assert_eq!(command.path, "/rest/items/Kitchen_Light");
        assert_eq!(command.body, Some(RequestBody::Text("ON".to_string())));

        let (_, update) = build_request(&resource, Operation::Update, Some(json!(42))).unwrap();
        assert_eq!(update.method, Method::Put);
        assert_eq!(update.path, "/rest/items/Kitchen_Light/state");
        assert_eq!(update.body, Some(RequestBody::Text("42".to_string())));
    }

    #[test]
    fn test_rule_run_now() {
        let resource = ResourceLocator::new("rules", "r1");
        let (_, request) = build_request(&resource, Operation::Command, None).unwrap();
        assert_eq!(request.path, "/rest/rules/r1/runnow");
        assert_eq!(request.body, Some(RequestBody::Json(json!({}))));
    }

    #[test]
    fn test_identifier_escaped_in_path() {
        let resource = ResourceLocator::new("rules", "wake up?#1");
        let (_, request) = build_request(&resource, Operation::Command, None).unwrap();
        assert_eq!(request.path, "/rest/rules/wake%20up%3F%231/runnow");

        let resource = ResourceLocator::new("things", "hue:bridge:001");
        let (_, request) = build_request(&resource, Operation::Get, None).unwrap();
        assert_eq!(request.path, "/rest/things/hue:bridge:001");
    }

    #[test]
    fn test_resource_state_from_rest() {
        let body = json!({"name": "Kitchen_Light", "type": "Switch", "state": "ON"});
        let state =
            ResourceState::from_rest(&oh_core::concept::ITEMS, "Kitchen_Light", body.clone());
        assert_eq!(state.topic, "items/Kitchen_Light");
        assert_eq!(state.payload, json!("ON"));
        assert_eq!(state.payload_type.as_deref(), Some("Switch"));
        assert_eq!(state.openhab, body);
    }
}
