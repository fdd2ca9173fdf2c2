//! Message record type for the Elko protocol.
//!
//! The protocol is externally defined and not fully enumerable, so a
//! message stays an open key/value record rather than a closed enum of
//! operation shapes. Only `make` and `HEREIS_$` are structurally
//! special-cased, and that happens in the session scan, not here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Object-creation notification.
pub const OP_MAKE: &str = "make";
/// Object announcement; carries its payload under `object` rather than `obj`.
pub const OP_HEREIS: &str = "HEREIS_$";
/// Restore a disembodied avatar to full presence.
pub const OP_CORPORATE: &str = "CORPORATE";
/// Reduce the avatar to its ghost form.
pub const OP_DISCORPORATE: &str = "DISCORPORATE";
/// Enter a context after connecting.
pub const OP_ENTERCONTEXT: &str = "entercontext";

/// One protocol message: an open key/value record.
///
/// Inbound messages carry at least one of `op` (operation name) or `to`
/// (target reference). Outbound commands are built with [`Message::command`]
/// and [`Message::with`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a decoded frame.
    ///
    /// Callers on the inbound path treat a failure as an empty record:
    /// the frame is logged and dropped, the connection stays up.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Build a command addressed to a reference or alias.
    #[must_use]
    pub fn command(op: &str, to: &str) -> Self {
        Self::new().with("op", op).with("to", to)
    }

    /// Set a field, consuming and returning the message.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// The operation name, if any.
    #[must_use]
    pub fn op(&self) -> Option<&str> {
        self.0.get("op").and_then(Value::as_str)
    }

    /// The target reference, if any.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.0.get("to").and_then(Value::as_str)
    }

    /// The object payload of a creation message.
    #[must_use]
    pub fn obj(&self) -> Option<&Value> {
        self.0.get("obj")
    }

    /// Whether this creation message belongs to the connected session.
    #[must_use]
    pub fn is_you(&self) -> bool {
        self.0.get("you").is_some_and(is_truthy)
    }

    /// Get a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// The underlying field map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The whole record as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// JavaScript-style truthiness, which is what the protocol's `you` flag
/// and modifier fields were written against.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_roundtrip() {
        let msg = Message::parse(r#"{"op":"make","to":"randy","obj":{"ref":"x"}}"#)
            .expect("parse");
        assert_eq!(msg.op(), Some("make"));
        assert_eq!(msg.to(), Some("randy"));
        let wire = serde_json::to_string(&msg).expect("serialize");
        assert_eq!(Message::parse(&wire).expect("reparse"), msg);
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(Message::parse("[1,2,3]").is_err());
        assert!(Message::parse("{\"op\":").is_err());
        assert!(Message::parse("").is_err());
    }

    #[test]
    fn test_parse_tolerates_frame_trailing_newline() {
        // Frames keep their first terminating newline.
        let msg = Message::parse("{\"op\":\"SPEAK\"}\n").expect("parse");
        assert_eq!(msg.op(), Some("SPEAK"));
    }

    #[test]
    fn test_command_builder() {
        let msg = Message::command(OP_CORPORATE, "ME").with("esp", 0);
        assert_eq!(msg.op(), Some(OP_CORPORATE));
        assert_eq!(msg.to(), Some("ME"));
        assert_eq!(msg.get("esp"), Some(&json!(0)));
    }

    #[test]
    fn test_you_truthiness() {
        assert!(Message::new().with("you", true).is_you());
        assert!(Message::new().with("you", 1).is_you());
        assert!(!Message::new().with("you", false).is_you());
        assert!(!Message::new().with("you", Value::Null).is_you());
        assert!(!Message::new().is_you());
    }
}
