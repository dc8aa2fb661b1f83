//! User actions coming back from incoming-call alerts

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::NotificationRelay;
use crate::error::Result;
use crate::record::keys;

/// Extras key carrying the call id
pub const EXTRA_CALL_ID: &str = keys::CALL_ID;
/// Extras flag set on the answer button
pub const EXTRA_CALL_ANSWER: &str = "CALL_ANSWER";
/// Extras flag set on the reject button
pub const EXTRA_CALL_REJECT: &str = "CALL_REJECT";
/// Extras key carrying the alert's gesture id
pub const EXTRA_GESTURE_ID: &str = "gestureId";

/// Button the user tapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserActionKind {
    Answer,
    Reject,
}

/// A tap on an alert button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAction {
    pub call_id: String,
    pub kind: UserActionKind,
    /// Alert gesture this tap belongs to; `None` for taps without one
    pub gesture_id: Option<Uuid>,
}

impl UserAction {
    pub fn answer(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            kind: UserActionKind::Answer,
            gesture_id: None,
        }
    }

    pub fn reject(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            kind: UserActionKind::Reject,
            gesture_id: None,
        }
    }

    /// Decode an action from intent-style extras.
    ///
    /// Returns `None` when the extras carry no call id or neither flag; the
    /// answer flag wins if both are set.
    pub fn from_extras(extras: &HashMap<String, String>) -> Option<Self> {
        let call_id = extras.get(EXTRA_CALL_ID).filter(|id| !id.is_empty())?;
        let flag = |key: &str| extras.get(key).is_some_and(|v| v == "true");

        let kind = if flag(EXTRA_CALL_ANSWER) {
            UserActionKind::Answer
        } else if flag(EXTRA_CALL_REJECT) {
            UserActionKind::Reject
        } else {
            return None;
        };

        let gesture_id = extras
            .get(EXTRA_GESTURE_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok());

        Some(Self {
            call_id: call_id.clone(),
            kind,
            gesture_id,
        })
    }
}

/// Application-side call control driven by user actions
pub trait CallController: Send + Sync {
    fn answer_incoming_call(&self, call_id: &str) -> Result<()>;

    fn reject_call(&self, call_id: &str) -> Result<()>;

    /// Whether the call is still registered and not disconnected
    fn is_live(&self, call_id: &str) -> bool;
}

/// Turns alert taps into call transitions.
///
/// The alert is silenced before the controller is invoked: the tapped call's
/// alert is cancelled, and an answer also clears every other alert. Each
/// gesture id is honoured once, so one alert can produce an answer or a
/// reject but never both.
///
/// Consumed gestures are tracked per call and forgotten once the call is no
/// longer live, so tracking is bounded by the number of live calls. A
/// gesture tap for a call that is gone only dismisses its alert.
pub struct UserActionReceiver {
    relay: Arc<dyn NotificationRelay>,
    controller: Arc<dyn CallController>,
    consumed_gestures: DashMap<String, Uuid>,
}

impl UserActionReceiver {
    pub fn new(relay: Arc<dyn NotificationRelay>, controller: Arc<dyn CallController>) -> Self {
        Self {
            relay,
            controller,
            consumed_gestures: DashMap::new(),
        }
    }

    /// Handle raw extras delivered by the host; extras without an action are ignored
    pub fn handle_extras(&self, extras: &HashMap<String, String>) -> Result<()> {
        match UserAction::from_extras(extras) {
            Some(action) => self.handle(action),
            None => {
                debug!("Extras carry no call action, ignoring");
                Ok(())
            }
        }
    }

    pub fn handle(&self, action: UserAction) -> Result<()> {
        if let Some(gesture_id) = action.gesture_id {
            if !self.controller.is_live(&action.call_id) {
                debug!(
                    "Call {} is gone, dismissing alert for stale {:?} tap",
                    action.call_id, action.kind
                );
                self.cancel_alert(&action.call_id);
                return Ok(());
            }
            if !self.claim_gesture(&action.call_id, gesture_id) {
                debug!(
                    "Gesture {} for call {} already handled, ignoring {:?}",
                    gesture_id, action.call_id, action.kind
                );
                return Ok(());
            }
        }

        info!("Handling {:?} for call {}", action.kind, action.call_id);
        self.cancel_alert(&action.call_id);

        let result = match action.kind {
            UserActionKind::Answer => {
                if let Err(e) = self.relay.cancel_all() {
                    error!("Failed to clear outstanding alerts: {}", e);
                }
                self.controller.answer_incoming_call(&action.call_id)
            }
            UserActionKind::Reject => self.controller.reject_call(&action.call_id),
        };

        self.consumed_gestures
            .retain(|call_id, _| self.controller.is_live(call_id));
        result
    }

    /// Number of calls with a consumed gesture still tracked
    pub fn tracked_gestures(&self) -> usize {
        self.consumed_gestures.len()
    }

    /// Record the gesture for the call; false if it was already consumed
    fn claim_gesture(&self, call_id: &str, gesture_id: Uuid) -> bool {
        match self.consumed_gestures.entry(call_id.to_string()) {
            Entry::Occupied(entry) if *entry.get() == gesture_id => false,
            Entry::Occupied(mut entry) => {
                entry.insert(gesture_id);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(gesture_id);
                true
            }
        }
    }

    fn cancel_alert(&self, call_id: &str) {
        if let Err(e) = self.relay.cancel(call_id) {
            error!("Failed to cancel alert for call {}: {}", call_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::config::NotificationConfig;
    use crate::error::CallKeepError;
    use crate::record::CallRecord;
    use crate::relay::{InMemoryRelay, IncomingCallAlert};
    use parking_lot::Mutex;

    /// Rejected and hung-up calls stop being live
    #[derive(Default)]
    struct RecordingController {
        calls: Mutex<Vec<(UserActionKind, String)>>,
        ended: Mutex<HashSet<String>>,
    }

    impl RecordingController {
        fn hang_up(&self, call_id: &str) {
            self.ended.lock().insert(call_id.to_string());
        }
    }

    impl CallController for RecordingController {
        fn answer_incoming_call(&self, call_id: &str) -> Result<()> {
            self.calls.lock().push((UserActionKind::Answer, call_id.to_string()));
            Ok(())
        }

        fn reject_call(&self, call_id: &str) -> Result<()> {
            self.calls.lock().push((UserActionKind::Reject, call_id.to_string()));
            self.hang_up(call_id);
            Ok(())
        }

        fn is_live(&self, call_id: &str) -> bool {
            !self.ended.lock().contains(call_id)
        }
    }

    fn alert(call_id: &str) -> IncomingCallAlert {
        let record = CallRecord::new(call_id, Default::default());
        IncomingCallAlert::for_record(&record, &NotificationConfig::default())
    }

    struct FailingRelay;

    impl NotificationRelay for FailingRelay {
        fn show_incoming_call(&self, _alert: &IncomingCallAlert) -> Result<()> {
            Err(CallKeepError::relay("no display"))
        }
        fn cancel(&self, _call_id: &str) -> Result<()> {
            Err(CallKeepError::relay("no display"))
        }
        fn cancel_all(&self) -> Result<()> {
            Err(CallKeepError::relay("no display"))
        }
    }

    fn extras(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_extras() {
        let action = UserAction::from_extras(&extras(&[
            (EXTRA_CALL_ID, "c1"),
            (EXTRA_CALL_REJECT, "true"),
        ]))
        .unwrap();
        assert_eq!(action, UserAction::reject("c1"));

        assert!(UserAction::from_extras(&extras(&[(EXTRA_CALL_ANSWER, "true")])).is_none());
        assert!(UserAction::from_extras(&extras(&[(EXTRA_CALL_ID, ""), (EXTRA_CALL_ANSWER, "true")])).is_none());
        assert!(UserAction::from_extras(&extras(&[(EXTRA_CALL_ID, "c1")])).is_none());
    }

    #[test]
    fn test_answer_clears_all_alerts_first() {
        let relay = Arc::new(InMemoryRelay::new());
        let controller = Arc::new(RecordingController::default());
        let receiver = UserActionReceiver::new(relay.clone(), controller.clone());

        for id in ["c1", "c2"] {
            relay.show_incoming_call(&alert(id)).unwrap();
        }

        receiver.handle(UserAction::answer("c1")).unwrap();
        assert_eq!(relay.active_count(), 0);
        assert_eq!(
            *controller.calls.lock(),
            vec![(UserActionKind::Answer, "c1".to_string())]
        );
    }

    #[test]
    fn test_reject_cancels_only_its_alert() {
        let relay = Arc::new(InMemoryRelay::new());
        let controller = Arc::new(RecordingController::default());
        let receiver = UserActionReceiver::new(relay.clone(), controller.clone());

        for id in ["c1", "c2"] {
            relay.show_incoming_call(&alert(id)).unwrap();
        }

        receiver
            .handle_extras(&extras(&[(EXTRA_CALL_ID, "c2"), (EXTRA_CALL_REJECT, "true")]))
            .unwrap();
        assert!(relay.is_showing("c1"));
        assert!(!relay.is_showing("c2"));
        assert_eq!(
            *controller.calls.lock(),
            vec![(UserActionKind::Reject, "c2".to_string())]
        );
    }

    #[test]
    fn test_gesture_fires_once() {
        let relay = Arc::new(InMemoryRelay::new());
        let controller = Arc::new(RecordingController::default());
        let receiver = UserActionReceiver::new(relay.clone(), controller.clone());

        let alert = alert("c1");

        receiver.handle(alert.answer.fire()).unwrap();
        receiver.handle(alert.answer.fire()).unwrap();
        receiver.handle(alert.reject.fire()).unwrap();

        assert_eq!(controller.calls.lock().len(), 1);
        assert_eq!(controller.calls.lock()[0].0, UserActionKind::Answer);
    }

    #[test]
    fn test_relay_failure_does_not_block_action() {
        let controller = Arc::new(RecordingController::default());
        let receiver = UserActionReceiver::new(Arc::new(FailingRelay), controller.clone());

        receiver.handle(UserAction::answer("c1")).unwrap();
        assert_eq!(controller.calls.lock().len(), 1);
    }

    #[test]
    fn test_stale_tap_after_reject_only_dismisses() {
        let relay = Arc::new(InMemoryRelay::new());
        let controller = Arc::new(RecordingController::default());
        let receiver = UserActionReceiver::new(relay.clone(), controller.clone());

        let alert = alert("c1");
        relay.show_incoming_call(&alert).unwrap();
        receiver.handle(alert.reject.fire()).unwrap();
        assert_eq!(receiver.tracked_gestures(), 0);

        // re-shown by a late redelivery, then tapped again
        relay.show_incoming_call(&alert).unwrap();
        receiver.handle(alert.reject.fire()).unwrap();
        assert!(!relay.is_showing("c1"));
        assert_eq!(controller.calls.lock().len(), 1);
    }

    #[test]
    fn test_gesture_tracking_is_bounded_by_live_calls() {
        let relay = Arc::new(InMemoryRelay::new());
        let controller = Arc::new(RecordingController::default());
        let receiver = UserActionReceiver::new(relay, controller.clone());

        for n in 0..1000 {
            let call_id = format!("c{n}");
            receiver.handle(alert(&call_id).answer.fire()).unwrap();
            controller.hang_up(&call_id);
        }

        assert_eq!(controller.calls.lock().len(), 1000);
        assert!(receiver.tracked_gestures() <= 1);
    }
}
