use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChannelError, Result};

/// Decoded message fields. Keys are unique; order carries no meaning.
///
/// Cloning is a deep copy, so every clone is independently mutable.
pub type Fields = Map<String, Value>;

/// A decoded peer message: a name discriminator plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message name, e.g. `version`, `inv`, `headers`.
    pub name: String,
    /// Message fields.
    #[serde(default)]
    pub fields: Fields,
}

impl Message {
    /// Create a message from a name and a field map.
    pub fn new(name: impl Into<String>, fields: Fields) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Create a message that carries no fields (e.g. `verack`).
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Fields::new())
    }

    /// Create a message whose fields are the serialized form of `value`.
    ///
    /// `value` must serialize to a JSON object (or to `null`, which yields
    /// an empty field map).
    pub fn from_serialize<T: Serialize + ?Sized>(name: impl Into<String>, value: &T) -> Result<Self> {
        let name = name.into();
        match serde_json::to_value(value).map_err(|err| ChannelError::Encode(err.to_string()))? {
            Value::Object(fields) => Ok(Self::new(name, fields)),
            Value::Null => Ok(Self::empty(name)),
            other => Err(ChannelError::Encode(format!(
                "fields of '{name}' must serialize to an object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Returns true if this message has the given name.
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// Look up a single field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct Ping {
        nonce: u64,
    }

    #[test]
    fn from_serialize_struct() {
        let message = Message::from_serialize("ping", &Ping { nonce: 7 }).unwrap();
        assert!(message.is("ping"));
        assert_eq!(message.field("nonce"), Some(&json!(7)));
    }

    #[test]
    fn from_serialize_unit_is_empty() {
        let message = Message::from_serialize("verack", &()).unwrap();
        assert!(message.fields.is_empty());
    }

    #[test]
    fn from_serialize_rejects_non_object() {
        let err = Message::from_serialize("inv", &json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ChannelError::Encode(_)));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn clone_is_independent() {
        let original = Message::from_serialize("inv", &json!({ "items": [1] })).unwrap();
        let mut copy = original.clone();
        copy.fields.insert("items".to_string(), json!([]));
        copy.name.push('!');

        assert_eq!(original.field("items"), Some(&json!([1])));
        assert_eq!(original.name, "inv");
    }

    #[test]
    fn missing_fields_deserialize_as_empty() {
        let message: Message = serde_json::from_str(r#"{"name":"verack"}"#).unwrap();
        assert_eq!(message, Message::empty("verack"));
    }
}
