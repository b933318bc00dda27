//! Event Emission (spec component G).
//!
//! Published after commit of any write or batch, never before — the write
//! engine owns that ordering. The event bus itself is an external
//! collaborator (spec §1, §6); this module only shapes and dispatches to it.

use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::*;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EventType {
    DocumentCreated,
    DocumentUpdated,
    DocumentDeleted,
    DocumentSet,
}

impl EventType {
    fn as_str(&self) -> &'static str {
        match self {
            EventType::DocumentCreated => "document.created",
            EventType::DocumentUpdated => "document.updated",
            EventType::DocumentDeleted => "document.deleted",
            EventType::DocumentSet => "document.set",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub project_id: String,
    pub database_id: String,
    pub path: String,
    pub data: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub source: &'static str,
}

impl Event {
    pub fn new(
        event_type: EventType,
        project_id: String,
        database_id: String,
        path: String,
        data: BTreeMap<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Event {
            event_type,
            project_id,
            database_id,
            path,
            data,
            timestamp,
            source: "document_repository",
        }
    }
}

/// The event bus's publish contract (spec §6: `event(type, data, source)`,
/// fire-and-forget). Production wiring is the collaborator's concern; this
/// crate only calls through the trait.
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> crate::errors::RepositoryResult<()>;
}

/// Publishes an event, logging (not surfacing) a publish failure — the
/// write's success never depends on it (spec §4.G).
pub async fn publish_best_effort(publisher: &dyn EventPublisher, event: Event) {
    let event_type = event.event_type.as_str();
    let path = event.path.clone();
    if let Err(err) = publisher.publish(event).await {
        warn!("Failed to publish {event_type} event for {path}: {err}");
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingEventPublisher {
        pub events: Mutex<Vec<Event>>,
    }

    #[async_trait::async_trait]
    impl EventPublisher for RecordingEventPublisher {
        async fn publish(&self, event: Event) -> crate::errors::RepositoryResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingEventPublisher;
    use super::*;

    #[tokio::test]
    async fn best_effort_publish_records_event_on_success() {
        let publisher = RecordingEventPublisher::default();
        publish_best_effort(
            &publisher,
            Event::new(
                EventType::DocumentCreated,
                "p".to_string(),
                "d".to_string(),
                "orders/o1".to_string(),
                BTreeMap::new(),
                Utc::now(),
            ),
        )
        .await;
        assert_eq!(publisher.events.lock().unwrap().len(), 1);
    }
}
