//! Coordination messages emitted around provider execution.
//!
//! Messages are observability artifacts: the engine appends one before and
//! after each provider invocation, correlated to the active plan. The log is
//! append-only; entries are never mutated.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Notification,
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// A single coordination log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub message_type: MessageType,
    pub payload: Value,
    /// Plan id of the orchestration run this message belongs to.
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
}

impl Message {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        payload: Value,
        correlation_id: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            message_type,
            payload,
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            priority,
        }
    }
}

/// In-memory append-only message log shared across the orchestration services.
pub struct MessageLog {
    entries: RwLock<Vec<Message>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn append(&self, message: Message) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push(message);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All messages belonging to one orchestration run.
    pub fn for_correlation(&self, correlation_id: &str) -> Vec<Message> {
        self.entries
            .read()
            .map(|e| {
                e.iter()
                    .filter(|m| m.correlation_id == correlation_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_is_append_only_and_filterable() {
        let log = MessageLog::new();
        log.append(Message::new(
            "engine",
            "provider-a",
            MessageType::Notification,
            json!({"type": "executionStarting"}),
            "plan-1",
            Priority::Medium,
        ));
        log.append(Message::new(
            "provider-a",
            "engine",
            MessageType::Response,
            json!({"type": "executionCompleted", "success": true}),
            "plan-1",
            Priority::High,
        ));
        log.append(Message::new(
            "engine",
            "provider-b",
            MessageType::Notification,
            json!({}),
            "plan-2",
            Priority::Low,
        ));

        assert_eq!(log.len(), 3);
        assert_eq!(log.for_correlation("plan-1").len(), 2);
        assert_eq!(log.for_correlation("plan-2").len(), 1);
        assert!(log.for_correlation("plan-3").is_empty());
    }
}
