//! Message schema validation
//!
//! The schema set is embedded at build time and parsed once per process.
//! Every inbound frame goes through [`MessageValidator::validate`] before it
//! can reach application code, and every outgoing message through
//! [`MessageValidator::validate_message`] before it is framed.
//!
//! Only the subset of JSON Schema the protocol schemas use is understood:
//! `type`, `required`, `properties`, `additionalProperties` (boolean),
//! `items`, `enum`, `minLength` and `minimum`.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::message::{Message, MessageType};

/// Version of the embedded schema set
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SET: &str = include_str!("../../schemas/v1.json");

static VALIDATOR: LazyLock<MessageValidator> = LazyLock::new(|| {
    MessageValidator::from_schema_set(SCHEMA_SET).expect("embedded schema set is valid")
});

/// Why an inbound payload was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Bytes are not a UTF-8 JSON document
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Well-formed document that does not match its schema
    #[error("schema violation ({message_type}): {reason}")]
    SchemaViolation {
        message_type: String,
        reason: String,
    },
}

/// Category of a [`ValidationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    MalformedEncoding,
    SchemaViolation,
}

impl ValidationError {
    #[must_use]
    pub const fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::MalformedEncoding(_) => ValidationErrorKind::MalformedEncoding,
            Self::SchemaViolation { .. } => ValidationErrorKind::SchemaViolation,
        }
    }

    fn envelope(reason: String) -> Self {
        Self::SchemaViolation {
            message_type: "envelope".to_string(),
            reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchemaSet {
    version: u32,
    envelope: Value,
    messages: HashMap<String, Value>,
}

/// Immutable validator built from a versioned schema set
#[derive(Debug)]
pub struct MessageValidator {
    version: u32,
    envelope: Value,
    schemas: HashMap<MessageType, Value>,
}

impl MessageValidator {
    /// Process-wide validator for the embedded schema set
    #[must_use]
    pub fn global() -> &'static Self {
        &VALIDATOR
    }

    /// Build a validator from a schema set document
    ///
    /// Schemas for message types this build does not know are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not a valid schema set
    pub fn from_schema_set(document: &str) -> serde_json::Result<Self> {
        let set: SchemaSet = serde_json::from_str(document)?;

        let mut schemas = HashMap::with_capacity(set.messages.len());
        for (name, schema) in set.messages {
            match name.parse::<MessageType>() {
                Ok(message_type) => {
                    schemas.insert(message_type, schema);
                }
                Err(_) => {
                    tracing::debug!(message_type = %name, "schema for unknown message type ignored");
                }
            }
        }

        Ok(Self {
            version: set.version,
            envelope: set.envelope,
            schemas,
        })
    }

    /// Version of the loaded schema set
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Schema registered for a message type
    #[must_use]
    pub fn schema(&self, message_type: MessageType) -> Option<&Value> {
        self.schemas.get(&message_type)
    }

    /// Message types that have a schema, in protocol order
    #[must_use]
    pub fn message_types(&self) -> Vec<MessageType> {
        MessageType::ALL
            .iter()
            .copied()
            .filter(|t| self.schemas.contains_key(t))
            .collect()
    }

    /// Decode and validate one frame
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedEncoding`] for bytes that are not
    /// JSON, and [`ValidationError::SchemaViolation`] for documents that do
    /// not match the envelope or their message schema
    pub fn validate(&self, raw: &[u8]) -> Result<Message, ValidationError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ValidationError::MalformedEncoding(e.to_string()))?;
        self.validate_value(value)
    }

    /// Check an outgoing message against the schema set
    ///
    /// The encoded message must also decode back to an equal value, so
    /// nothing is lost on the way to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SchemaViolation`] if the encoded message
    /// does not match its schema or does not survive decoding
    pub fn validate_message(&self, message: &Message) -> Result<(), ValidationError> {
        let envelope = message
            .to_envelope()
            .and_then(serde_json::to_value)
            .map_err(|e| ValidationError::MalformedEncoding(e.to_string()))?;

        let decoded = self.validate_value(envelope)?;
        if decoded != *message {
            return Err(ValidationError::SchemaViolation {
                message_type: message.type_name().to_string(),
                reason: "message does not decode back to itself".to_string(),
            });
        }
        Ok(())
    }

    /// Validate an already parsed document
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SchemaViolation`] if the document does not
    /// match the envelope or its message schema
    pub fn validate_value(&self, value: Value) -> Result<Message, ValidationError> {
        let mut wrapped = serde_json::json!({ "message": value });
        check(&self.envelope, &wrapped, "").map_err(ValidationError::envelope)?;

        let Value::Object(mut envelope) = wrapped["message"].take() else {
            return Err(ValidationError::envelope("message is not an object".to_string()));
        };

        let message_type = match envelope.remove("messageType") {
            Some(Value::String(s)) => s,
            _ => return Err(ValidationError::envelope("messageType must be a string".to_string())),
        };
        let data = envelope.remove("data").unwrap_or(Value::Null);

        let Ok(known) = message_type.parse::<MessageType>() else {
            tracing::debug!(message_type = %message_type, "accepting message of unknown type");
            return Ok(Message::Other { message_type, data });
        };

        let violation = |reason: String| ValidationError::SchemaViolation {
            message_type: message_type.clone(),
            reason,
        };

        if let Some(schema) = self.schemas.get(&known) {
            check(schema, &data, "/data").map_err(violation)?;
        }

        Message::from_parts(known, data).map_err(|e| violation(e.to_string()))
    }
}

/// Check `value` against `schema`, returning the first violation found
fn check(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let matches = match expected {
            Value::String(name) => type_matches(name, value),
            Value::Array(names) => names
                .iter()
                .filter_map(Value::as_str)
                .any(|name| type_matches(name, value)),
            _ => true,
        };
        if !matches {
            return Err(format!("{} must be of type {expected}", display_path(path)));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(format!("{} must be one of {}", display_path(path), Value::Array(allowed.clone())));
        }
    }

    if let (Some(min), Value::String(s)) = (schema.get("minLength").and_then(Value::as_u64), value) {
        if (s.chars().count() as u64) < min {
            return Err(format!("{} must be at least {min} characters", display_path(path)));
        }
    }

    if let (Some(min), Some(n)) = (schema.get("minimum").and_then(Value::as_f64), value.as_f64()) {
        if n < min {
            return Err(format!("{} must be >= {min}", display_path(path)));
        }
    }

    if let Value::Object(fields) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(name) {
                    return Err(format!("{} is missing required field '{name}'", display_path(path)));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (name, sub_schema) in properties {
                if let Some(field) = fields.get(name) {
                    check(sub_schema, field, &format!("{path}/{name}"))?;
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            let extra = fields
                .keys()
                .find(|k| properties.is_none_or(|p| !p.contains_key(k.as_str())));
            if let Some(extra) = extra {
                return Err(format!("{} has unexpected field '{extra}'", display_path(path)));
            }
        }
    }

    if let (Some(items), Value::Array(elements)) = (schema.get("items"), value) {
        for (i, element) in elements.iter().enumerate() {
            check(items, element, &format!("{path}/{i}"))?;
        }
    }

    Ok(())
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "document" } else { path }
}
