//! Message body encoding.
//!
//! A body whose first character is `{` is treated as a JSON record. This is
//! a content sniff, not a contract: text that happens to start with a brace
//! but does not parse stays text.

use serde_json::Value;

/// Decoded body of a queue message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Record(Value),
}

impl Payload {
    /// Decode a raw message body.
    pub fn decode(body: String) -> Self {
        if body.starts_with('{')
            && let Ok(value) = serde_json::from_str::<Value>(&body)
        {
            return Payload::Record(value);
        }
        Payload::Text(body)
    }

    /// Render the body sent to the queue. Text goes out unchanged, records as
    /// compact JSON.
    pub fn encode(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Record(value) => value.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Value> {
        match self {
            Payload::Record(value) => Some(value),
            Payload::Text(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Record(value)
    }
}
