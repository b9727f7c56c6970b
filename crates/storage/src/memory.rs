use std::collections::BTreeMap;

use serde_json::Value;

/// Append-only keyed scratchpad the decision step reads and the loop writes.
///
/// Keys are created lazily on first write; values are only ever appended,
/// never edited in place. The snapshot handed to the prompt is a serialized
/// copy, so readers cannot mutate the store.
#[derive(Debug, Default)]
pub struct AgentMemory {
    entries: BTreeMap<String, Vec<Value>>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under a key. A sequence is appended element by element
    /// (batch semantics); anything else is appended as a single entry.
    /// Returns how many entries were added.
    pub fn save(&mut self, key: &str, value: Value) -> usize {
        let bucket = self.entries.entry(key.to_string()).or_default();
        match value {
            Value::Array(items) => {
                let count = items.len();
                bucket.extend(items);
                count
            }
            other => {
                bucket.push(other);
                1
            }
        }
    }

    /// Serialized immutable view for prompt inclusion.
    pub fn snapshot(&self) -> String {
        serde_json::to_string_pretty(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self, key: &str) -> Option<&[Value]> {
        self.entries.get(key).map(|v| v.as_slice())
    }
}
