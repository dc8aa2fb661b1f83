//! Boundary to the notification layer
//!
//! Rendering alerts is the host's job. This module defines what the
//! connection layer hands over ([`IncomingCallAlert`]), the [`NotificationRelay`]
//! trait the host implements, and the [`UserActionReceiver`] that turns taps
//! on an alert back into call transitions.

pub mod memory;
pub mod receiver;

pub use memory::InMemoryRelay;
pub use receiver::{CallController, UserAction, UserActionKind, UserActionReceiver};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::error::Result;
use crate::record::CallRecord;

/// Renders and dismisses incoming-call alerts.
///
/// Implementations must cancel any alert already showing for a call before
/// showing a new one for the same call, and `cancel` must be a no-op when
/// nothing is showing. Methods may run while the calling connection is
/// locked, so they must not drive connections synchronously.
pub trait NotificationRelay: Send + Sync {
    fn show_incoming_call(&self, alert: &IncomingCallAlert) -> Result<()>;

    fn cancel(&self, call_id: &str) -> Result<()>;

    fn cancel_all(&self) -> Result<()>;
}

/// 32-bit notification id for a call id, identical to Java's `String.hashCode`
pub fn notification_id(call_id: &str) -> i32 {
    call_id
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

/// One-shot action attached to an alert button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub call_id: String,
    pub kind: UserActionKind,
    /// Shared by every action of one alert; consumed by the first tap
    pub gesture_id: Uuid,
}

impl PendingAction {
    /// The user action delivered when this button is tapped
    pub fn fire(&self) -> UserAction {
        UserAction {
            call_id: self.call_id.clone(),
            kind: self.kind,
            gesture_id: Some(self.gesture_id),
        }
    }
}

/// Everything needed to render the alert for a ringing call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallAlert {
    pub call_id: String,
    pub notification_id: i32,
    pub caller_name: Option<String>,
    pub number: Option<String>,
    pub channel_id: String,
    pub channel_name: String,
    pub full_screen: bool,
    pub insistent: bool,
    pub answer: PendingAction,
    pub reject: PendingAction,
}

impl IncomingCallAlert {
    /// Build the alert for a call record
    pub fn for_record(record: &CallRecord, config: &NotificationConfig) -> Self {
        let call_id = record.call_id().to_string();
        let gesture_id = Uuid::new_v4();
        let action = |kind| PendingAction {
            call_id: call_id.clone(),
            kind,
            gesture_id,
        };

        Self {
            notification_id: notification_id(&call_id),
            caller_name: record.caller_name().map(str::to_string),
            number: record.number().map(str::to_string),
            channel_id: config.channel_id(),
            channel_name: config.channel_name.clone(),
            full_screen: config.full_screen,
            insistent: config.insistent,
            answer: action(UserActionKind::Answer),
            reject: action(UserActionKind::Reject),
            call_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CallAttributes, keys};

    #[test]
    fn test_notification_id_matches_java_hash() {
        assert_eq!(notification_id(""), 0);
        assert_eq!(notification_id("a"), 97);
        assert_eq!(notification_id("hello"), 99_162_322);
        // overflow wraps like Java int arithmetic
        assert_eq!(notification_id("polygenelubricants"), i32::MIN);
    }

    #[test]
    fn test_alert_actions_share_gesture() {
        let record = CallRecord::new(
            "c1",
            [(keys::CALLER_NAME, "Alice"), (keys::NUMBER, "1001")]
                .into_iter()
                .collect::<CallAttributes>(),
        );
        let alert = IncomingCallAlert::for_record(&record, &NotificationConfig::default());

        assert_eq!(alert.caller_name.as_deref(), Some("Alice"));
        assert_eq!(alert.number.as_deref(), Some("1001"));
        assert_eq!(alert.notification_id, notification_id("c1"));
        assert_eq!(alert.answer.gesture_id, alert.reject.gesture_id);
        assert_eq!(alert.answer.kind, UserActionKind::Answer);
        assert_eq!(alert.reject.fire().kind, UserActionKind::Reject);

        let again = IncomingCallAlert::for_record(&record, &NotificationConfig::default());
        assert_ne!(alert.answer.gesture_id, again.answer.gesture_id);
    }
}
