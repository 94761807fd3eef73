use serde::{Deserialize, Serialize};
use serde_json::json;

/// Logical channel of the queue. Each kind has its own FIFO order and
/// its own persistence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Stateless,
    Stateful,
    Command,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [
        MessageType::Stateless,
        MessageType::Stateful,
        MessageType::Command,
    ];

    /// Name of the kind's persistence table.
    pub fn table_name(self) -> &'static str {
        match self {
            MessageType::Stateless => "STATELESS",
            MessageType::Stateful => "STATEFUL",
            MessageType::Command => "COMMAND",
        }
    }
}

/// One queued unit of work.
///
/// `payload` is a JSON document; an array payload counts as one message
/// per element when pushed. `module_name`/`module_type` group messages
/// for filtered consumption, `metadata` is opaque to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageType,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub module_type: String,
    #[serde(default)]
    pub metadata: String,
}

impl Message {
    pub fn new(
        kind: MessageType,
        payload: serde_json::Value,
        module_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            payload,
            module_name: module_name.into(),
            module_type: String::new(),
            metadata: String::new(),
        }
    }

    /// The placeholder returned by a peek on an empty channel: the
    /// requested kind and module fields with an empty payload.
    pub fn null(
        kind: MessageType,
        module_name: impl Into<String>,
        module_type: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            payload: json!({}),
            module_name: module_name.into(),
            module_type: module_type.into(),
            metadata: String::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.payload.as_object().is_some_and(|o| o.is_empty())
    }

    /// How many persisted items this message expands to.
    pub fn item_count(&self) -> usize {
        match &self.payload {
            serde_json::Value::Array(items) => items.len(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_payloads_count_per_element() {
        let m = Message::new(MessageType::Stateless, json!(["a", "b", "c"]), "mod");
        assert_eq!(m.item_count(), 3);
        let m = Message::new(MessageType::Stateless, json!({"data": 1}), "mod");
        assert_eq!(m.item_count(), 1);
    }

    #[test]
    fn null_message_shape() {
        let m = Message::null(MessageType::Command, "inventory", "scan");
        assert!(m.is_null());
        assert_eq!(m.module_name, "inventory");
        assert_eq!(m.module_type, "scan");
    }

    #[test]
    fn kind_serializes_screaming() {
        assert_eq!(serde_json::to_string(&MessageType::Stateful).unwrap(), "\"STATEFUL\"");
    }
}
