// flockwave-protocol: envelope types and message construction for the
// Flockwave drone-fleet command-and-control protocol.
//
// An envelope is an opaque record carrying a unique `id`, a `body` object
// (which must contain a `type` field), and -- for responses -- a
// `correlation_id` pointing back at the request it answers. Notifications
// never carry a correlation id. `kind` is not part of the wire format; it
// records which of the three envelope shapes this value was constructed as.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Frozen ack body type strings.
pub mod ack {
    pub const ACK_ACK: &str = "ACK-ACK";
    pub const ACK_NAK: &str = "ACK-NAK";
}

/// The key used to carry the message type inside `body`.
pub const TYPE_FIELD: &str = "type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[default]
    Request,
    Response,
    Notification,
}

/// A single Flockwave message envelope.
///
/// `kind` is skipped on the wire; an envelope decoded from JSON is always
/// classified as `Request` by the validator (see [`Validator`]) since
/// incoming traffic is, from the hub's point of view, always something that
/// may warrant a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub body: Value,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip, default)]
    pub kind: EnvelopeKind,
}

impl Envelope {
    /// The `body.type` field, if present and a string.
    pub fn message_type(&self) -> Option<&str> {
        self.body.get(TYPE_FIELD).and_then(Value::as_str)
    }

    pub fn is_request(&self) -> bool {
        self.kind == EnvelopeKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind == EnvelopeKind::Response
    }

    pub fn is_notification(&self) -> bool {
        self.kind == EnvelopeKind::Notification
    }
}

/// Error returned when an incoming raw message fails schema validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("message does not match the Flockwave envelope schema: {0}")]
    Schema(String),
}

/// Whatever the hub uses to turn a raw, decoded-but-unvalidated JSON value
/// into a well-formed [`Envelope`]. Real deployments inject a JSON-schema
/// backed implementation; `DefaultValidator` below is a minimal structural
/// check sufficient for tests and for embedding this crate standalone.
pub trait Validator: Send + Sync {
    /// Validate `raw` and, if it has an `id` field, return it even on
    /// failure so the caller can still NAK the request (spec: "validation
    /// failure produces a NAK if raw carries an id").
    fn validate(&self, raw: &Value) -> Result<Envelope, (ValidationError, Option<String>)>;
}

/// A structural validator: requires `id: string` and `body.type: string`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, raw: &Value) -> Result<Envelope, (ValidationError, Option<String>)> {
        let id = raw.get("id").and_then(Value::as_str).map(str::to_owned);

        let body = match raw.get("body") {
            Some(body) if body.is_object() => body.clone(),
            _ => {
                return Err((
                    ValidationError::Schema("missing or non-object `body`".into()),
                    id,
                ));
            }
        };

        if body.get(TYPE_FIELD).and_then(Value::as_str).is_none() {
            return Err((
                ValidationError::Schema("`body.type` must be a string".into()),
                id,
            ));
        }

        let Some(id) = id else {
            return Err((
                ValidationError::Schema("missing or non-string `id`".into()),
                None,
            ));
        };

        Ok(Envelope {
            id,
            body,
            correlation_id: None,
            kind: EnvelopeKind::Request,
        })
    }
}

/// Builds outbound envelopes with fresh, globally-unique ids.
///
/// Ids are generated from UUIDv4; uniqueness within a hub's lifetime holds
/// with overwhelming probability, matching the guarantee the original
/// Python builder made using the same underlying `uuid4()` strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageBuilder;

impl MessageBuilder {
    pub fn new() -> Self {
        Self
    }

    fn fresh_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Creates a notification envelope with a fresh id.
    pub fn create_notification(&self, body: Value) -> Envelope {
        Envelope {
            id: Self::fresh_id(),
            body,
            correlation_id: None,
            kind: EnvelopeKind::Notification,
        }
    }

    /// Creates a response to `request`, filling `body.type` from the
    /// request's type when the caller's body does not already specify one.
    /// Never mutates `request`.
    pub fn create_response_to(&self, request: &Envelope, mut body: Value) -> Envelope {
        if let Some(map) = body.as_object_mut() {
            if !map.contains_key(TYPE_FIELD) {
                if let Some(request_type) = request.message_type() {
                    map.insert(TYPE_FIELD.to_owned(), Value::String(request_type.to_owned()));
                }
            }
        }
        Envelope {
            id: Self::fresh_id(),
            body,
            correlation_id: Some(request.id.clone()),
            kind: EnvelopeKind::Response,
        }
    }

    /// Builds a positive or negative acknowledgment of `request`.
    pub fn acknowledge(&self, request: &Envelope, outcome: bool, reason: Option<&str>) -> Envelope {
        let mut body = serde_json::Map::new();
        body.insert(
            TYPE_FIELD.to_owned(),
            Value::String(
                if outcome {
                    ack::ACK_ACK
                } else {
                    ack::ACK_NAK
                }
                .to_owned(),
            ),
        );
        if !outcome {
            if let Some(reason) = reason {
                body.insert("reason".to_owned(), Value::String(reason.to_owned()));
            }
        }
        self.create_response_to(request, Value::Object(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(id: &str, body: Value) -> Envelope {
        Envelope {
            id: id.to_owned(),
            body,
            correlation_id: None,
            kind: EnvelopeKind::Request,
        }
    }

    #[test]
    fn create_notification_attaches_fresh_id_and_no_correlation() {
        let builder = MessageBuilder::new();
        let n1 = builder.create_notification(json!({"type": "UAV-INF"}));
        let n2 = builder.create_notification(json!({"type": "UAV-INF"}));
        assert!(!n1.id.is_empty());
        assert_ne!(n1.id, n2.id);
        assert_eq!(n1.correlation_id, None);
        assert!(n1.is_notification());
    }

    #[test]
    fn create_response_to_copies_type_only_when_absent() {
        let builder = MessageBuilder::new();
        let request = req("m1", json!({"type": "SYS-VER"}));

        let response = builder.create_response_to(&request, json!({"version": "1.2"}));
        assert_eq!(response.correlation_id, Some("m1".to_owned()));
        assert_eq!(response.message_type(), Some("SYS-VER"));
        assert!(response.is_response());

        let explicit = builder.create_response_to(&request, json!({"type": "OTHER"}));
        assert_eq!(explicit.message_type(), Some("OTHER"));

        // the request body itself must not have been touched
        assert_eq!(request.body, json!({"type": "SYS-VER"}));
    }

    #[test]
    fn acknowledge_positive_and_negative() {
        let builder = MessageBuilder::new();
        let request = req("m3", json!({"type": "PING"}));

        let ack = builder.acknowledge(&request, true, None);
        assert_eq!(ack.message_type(), Some(ack::ACK_ACK));
        assert_eq!(ack.correlation_id, Some("m3".to_owned()));
        assert!(ack.body.get("reason").is_none());

        let nak = builder.acknowledge(&request, false, Some("nope"));
        assert_eq!(nak.message_type(), Some(ack::ACK_NAK));
        assert_eq!(nak.body.get("reason").and_then(Value::as_str), Some("nope"));

        let nak_no_reason = builder.acknowledge(&request, false, None);
        assert!(nak_no_reason.body.get("reason").is_none());
    }

    #[test]
    fn default_validator_accepts_well_formed_and_rejects_malformed() {
        let validator = DefaultValidator;

        let ok = validator.validate(&json!({"id": "m1", "body": {"type": "PING"}}));
        assert!(ok.is_ok());

        let (err, id) = validator
            .validate(&json!({"id": "m2", "body": {}}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Schema(_)));
        assert_eq!(id, Some("m2".to_owned()));

        let (_, id) = validator.validate(&json!({"body": {"type": "PING"}})).unwrap_err();
        assert_eq!(id, None);
    }
}
