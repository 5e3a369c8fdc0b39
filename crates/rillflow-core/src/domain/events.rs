use crate::domain::instance::InstanceId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all events in the system
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the process instance ID this event is associated with
    fn instance_id(&self) -> &InstanceId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Observer for domain events raised while signals are processed
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle one domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>);
}

/// Default event handler that logs events through `tracing`
#[derive(Debug, Default)]
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) {
        tracing::info!(
            event_type = event.event_type(),
            instance_id = %event.instance_id(),
            "domain event"
        );
    }
}

/// Event: Process instance started
#[derive(Debug)]
pub struct InstanceStarted {
    /// The unique identifier of the process instance
    pub instance_id: InstanceId,

    /// The identifier of the process definition
    pub definition_id: String,

    /// The timestamp when the instance started
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceStarted {
    fn event_type(&self) -> &'static str {
        "instance.started"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: A token entered a flow object
#[derive(Debug)]
pub struct TokenEntered {
    /// The unique identifier of the process instance
    pub instance_id: InstanceId,

    /// The name of the flow object the token entered
    pub position: String,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for TokenEntered {
    fn event_type(&self) -> &'static str {
        "token.entered"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: An activity was signaled finished
#[derive(Debug)]
pub struct ActivityCompleted {
    /// The unique identifier of the process instance
    pub instance_id: InstanceId,

    /// The name of the completed activity
    pub activity: String,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for ActivityCompleted {
    fn event_type(&self) -> &'static str {
        "activity.completed"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: A boundary timer was armed
#[derive(Debug)]
pub struct TimerArmed {
    /// The unique identifier of the process instance
    pub instance_id: InstanceId,

    /// The name of the boundary event the timer belongs to
    pub boundary: String,

    /// Timeout in milliseconds
    pub timeout_ms: u64,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for TimerArmed {
    fn event_type(&self) -> &'static str {
        "timer.armed"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: A boundary timer fired and diverted the flow
#[derive(Debug)]
pub struct TimerFired {
    /// The unique identifier of the process instance
    pub instance_id: InstanceId,

    /// The name of the boundary event whose timer fired
    pub boundary: String,

    /// The name of the interrupted activity
    pub activity: String,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for TimerFired {
    fn event_type(&self) -> &'static str {
        "timer.fired"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: A boundary timer was cancelled before it fired
#[derive(Debug)]
pub struct TimerCancelled {
    /// The unique identifier of the process instance
    pub instance_id: InstanceId,

    /// The name of the boundary event whose timer was cancelled
    pub boundary: String,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for TimerCancelled {
    fn event_type(&self) -> &'static str {
        "timer.cancelled"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Process instance ran out of tokens
#[derive(Debug)]
pub struct InstanceCompleted {
    /// The unique identifier of the process instance
    pub instance_id: InstanceId,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceCompleted {
    fn event_type(&self) -> &'static str {
        "instance.completed"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_instance_id() -> InstanceId {
        InstanceId::new("order-17")
    }

    #[test]
    fn test_instance_started_event() {
        let instance_id = create_test_instance_id();
        let timestamp = Utc::now();

        let event = InstanceStarted {
            instance_id: instance_id.clone(),
            definition_id: "order-process".to_string(),
            timestamp,
        };

        assert_eq!(event.event_type(), "instance.started");
        assert_eq!(event.instance_id(), &instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }

    #[test]
    fn test_token_entered_event() {
        let instance_id = create_test_instance_id();
        let timestamp = Utc::now();

        let event = TokenEntered {
            instance_id: instance_id.clone(),
            position: "Review Order".to_string(),
            timestamp,
        };

        assert_eq!(event.event_type(), "token.entered");
        assert_eq!(event.instance_id(), &instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }

    #[test]
    fn test_activity_completed_event() {
        let instance_id = create_test_instance_id();
        let timestamp = Utc::now();

        let event = ActivityCompleted {
            instance_id: instance_id.clone(),
            activity: "Review Order".to_string(),
            timestamp,
        };

        assert_eq!(event.event_type(), "activity.completed");
        assert_eq!(event.instance_id(), &instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }

    #[test]
    fn test_timer_events() {
        let instance_id = create_test_instance_id();
        let timestamp = Utc::now();

        let armed = TimerArmed {
            instance_id: instance_id.clone(),
            boundary: "Review Timeout".to_string(),
            timeout_ms: 5000,
            timestamp,
        };
        assert_eq!(armed.event_type(), "timer.armed");
        assert_eq!(armed.instance_id(), &instance_id);

        let fired = TimerFired {
            instance_id: instance_id.clone(),
            boundary: "Review Timeout".to_string(),
            activity: "Review Order".to_string(),
            timestamp,
        };
        assert_eq!(fired.event_type(), "timer.fired");

        let cancelled = TimerCancelled {
            instance_id: instance_id.clone(),
            boundary: "Review Timeout".to_string(),
            timestamp,
        };
        assert_eq!(cancelled.event_type(), "timer.cancelled");
    }

    #[test]
    fn test_instance_completed_event() {
        let instance_id = create_test_instance_id();
        let timestamp = Utc::now();

        let event = InstanceCompleted {
            instance_id: instance_id.clone(),
            timestamp,
        };

        assert_eq!(event.event_type(), "instance.completed");
        assert_eq!(event.instance_id(), &instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }
}
