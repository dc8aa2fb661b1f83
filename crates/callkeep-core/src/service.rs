//! Wiring of registry, relay, receiver and event channel
//!
//! [`CallKeepService`] is what a host adapter talks to: it creates
//! connections for new call legs, routes OS events by call id and hands out
//! the [`UserActionReceiver`] for alert taps. Nothing in it is global; every
//! collaborator is passed in.

use std::sync::Arc;

use tracing::info;

use crate::config::CallKeepConfig;
use crate::connection::{CallConnection, ConnectionEvent, Transition};
use crate::error::Result;
use crate::events::{AppEventSink, AppEventStream};
use crate::record::{CallAttributes, CallRecord};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::relay::{NotificationRelay, UserActionReceiver};

pub struct CallKeepService {
    config: CallKeepConfig,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<dyn NotificationRelay>,
    receiver: UserActionReceiver,
    events: AppEventSink,
}

impl CallKeepService {
    /// Build the service; the returned stream yields application events
    pub fn new(
        config: CallKeepConfig,
        relay: Arc<dyn NotificationRelay>,
    ) -> Result<(Self, AppEventStream)> {
        config.validate()?;

        let (events, rx) = AppEventSink::channel(config.event_channel_capacity);
        let registry = ConnectionRegistry::with_config(&config);
        let receiver = UserActionReceiver::new(relay.clone(), registry.clone());

        Ok((
            Self {
                config,
                registry,
                relay,
                receiver,
                events,
            },
            rx,
        ))
    }

    /// Create and register a ringing connection, then raise its alert
    pub fn report_incoming_call(
        &self,
        call_id: impl Into<String>,
        attributes: CallAttributes,
    ) -> Result<ConnectionHandle> {
        let handle = self.create_connection(call_id, attributes)?;
        handle.apply(&ConnectionEvent::ShowIncomingCallUi)?;
        Ok(handle)
    }

    /// Create and register a ringing connection without raising an alert
    pub fn create_connection(
        &self,
        call_id: impl Into<String>,
        attributes: CallAttributes,
    ) -> Result<ConnectionHandle> {
        let record = CallRecord::new(call_id, attributes);
        let connection = CallConnection::new(record, self.events.clone())
            .with_relay(self.relay.clone())
            .with_notification_config(self.config.notification.clone());
        let handle = self.registry.register(connection)?;
        info!("Created connection for call {}", handle.call_id());
        Ok(handle)
    }

    /// Route an OS telephony event to its call
    pub fn dispatch(&self, call_id: &str, event: ConnectionEvent) -> Result<Transition> {
        self.registry.dispatch(call_id, &event)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn receiver(&self) -> &UserActionReceiver {
        &self.receiver
    }

    pub fn config(&self) -> &CallKeepConfig {
        &self.config
    }

    /// Events that waited in overflow because the application fell behind
    pub fn spilled_events(&self) -> u64 {
        self.events.spilled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::error::CallKeepError;
    use crate::relay::{InMemoryRelay, UserAction};

    #[test]
    fn test_invalid_config_rejected() {
        let relay = Arc::new(InMemoryRelay::new());
        let result = CallKeepService::new(CallKeepConfig::new().with_event_channel_capacity(0), relay);
        assert!(matches!(result, Err(CallKeepError::Configuration { .. })));
    }

    #[test]
    fn test_incoming_call_shows_alert_and_answers() {
        let relay = Arc::new(InMemoryRelay::new());
        let (service, mut rx) = CallKeepService::new(
            CallKeepConfig::new().with_app_id("com.example.phone"),
            relay.clone(),
        )
        .unwrap();

        let handle = service
            .report_incoming_call("c1", [("callerName", "Alice")].into_iter().collect())
            .unwrap();
        let alert = relay.alert("c1").unwrap();
        assert_eq!(alert.channel_id, "com.example.phone.callkeep.callnew");

        service.receiver().handle(alert.answer.fire()).unwrap();
        assert_eq!(handle.state(), ConnectionState::Active);
        assert!(!relay.is_showing("c1"));
        assert_eq!(rx.try_recv().unwrap().attributes.get("callerName"), Some("Alice"));

        service.dispatch("c1", ConnectionEvent::Disconnect).unwrap();
        assert!(service.registry().is_empty());
        assert!(matches!(
            service.receiver().handle(UserAction::reject("c1")),
            Err(CallKeepError::CallNotFound { .. })
        ));
    }

    #[test]
    fn test_receiver_forgets_gestures_of_finished_calls() {
        let relay = Arc::new(InMemoryRelay::new());
        let (service, _rx) = CallKeepService::new(CallKeepConfig::default(), relay.clone()).unwrap();

        for n in 0..200 {
            let call_id = format!("c{n}");
            service
                .report_incoming_call(call_id.as_str(), CallAttributes::new())
                .unwrap();
            let alert = relay.alert(&call_id).unwrap();
            service.receiver().handle(alert.answer.fire()).unwrap();
            service.dispatch(&call_id, ConnectionEvent::Disconnect).unwrap();
        }

        assert!(service.registry().is_empty());
        assert!(service.receiver().tracked_gestures() <= 1);
    }
}
