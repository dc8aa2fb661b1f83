//! Per-call connection state machine
//!
//! A [`CallConnection`] owns one [`CallRecord`] and moves through
//! `RINGING -> ACTIVE <-> HELD -> DISCONNECTED`, driven by the OS telephony
//! layer and by taps on the incoming-call alert. Every accepted transition
//! updates the OS-visible [`TelecomState`] and queues an [`AppEvent`] for the
//! application.
//!
//! ```text
//!            answer(video)          hold
//! RINGING ───────────────► ACTIVE ◄──────► HELD
//!    │                       │     unhold   │
//!    │ reject/abort          │ disconnect   │ disconnect
//!    ▼                       ▼              ▼
//!    └──────────────► DISCONNECTED ◄────────┘
//! ```
//!
//! Once DISCONNECTED, every event is rejected with
//! [`CallKeepError::CallTerminated`] and nothing else is emitted. Reaching
//! DISCONNECTED releases the connection from its owning registry through a
//! weak [`ConnectionReleaser`] handle.

mod state;
mod telecom;

pub use state::{
    Capabilities, ConnectionState, DisconnectCause, TelecomState, Transition,
    VIDEO_STATE_AUDIO_ONLY,
};
pub use telecom::{ConnectionEvent, TelecomConnection};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::error::{CallKeepError, Result};
use crate::events::{AppEvent, AppEventKind, AppEventSink};
use crate::record::{CallAttributes, CallRecord, keys};
use crate::relay::{IncomingCallAlert, NotificationRelay};

/// Extras key under which the OS delivers an updated attribute map
pub const EXTRA_ATTRIBUTE_MAP: &str = "attributeMap";

/// Removes a disconnected connection from whatever owns it
pub trait ConnectionReleaser: Send + Sync {
    fn release(&self, call_id: &str) -> Result<()>;
}

/// Whether a character is a valid DTMF tone
pub fn is_dtmf_digit(digit: char) -> bool {
    matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D')
}

/// Lock-free view of a connection's state, shared with its registry entry
#[derive(Debug, Clone)]
pub(crate) struct StateMirror(Arc<AtomicU8>);

impl StateMirror {
    fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// State machine for a single call leg
pub struct CallConnection {
    record: CallRecord,
    state: ConnectionState,
    mirror: StateMirror,
    muted: bool,
    telecom: TelecomState,
    events: AppEventSink,
    relay: Option<Arc<dyn NotificationRelay>>,
    notification: NotificationConfig,
    releaser: Option<Weak<dyn ConnectionReleaser>>,
}

impl std::fmt::Debug for CallConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallConnection")
            .field("call_id", &self.record.call_id())
            .field("state", &self.state)
            .field("muted", &self.muted)
            .field("telecom", &self.telecom)
            .finish()
    }
}

impl CallConnection {
    /// Create a ringing connection for a call record
    pub fn new(record: CallRecord, events: AppEventSink) -> Self {
        let mut connection = Self {
            record,
            state: ConnectionState::Ringing,
            mirror: StateMirror::new(ConnectionState::Ringing),
            muted: false,
            telecom: TelecomState::default(),
            events,
            relay: None,
            notification: NotificationConfig::default(),
            releaser: None,
        };
        connection.sync_presentation();
        connection
    }

    /// Attach the relay used to show and dismiss the incoming-call alert
    pub fn with_relay(mut self, relay: Arc<dyn NotificationRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_notification_config(mut self, config: NotificationConfig) -> Self {
        self.notification = config;
        self
    }

    pub(crate) fn attach_releaser(&mut self, releaser: Weak<dyn ConnectionReleaser>) {
        self.releaser = Some(releaser);
    }

    pub(crate) fn mirror(&self) -> StateMirror {
        self.mirror.clone()
    }

    pub fn call_id(&self) -> &str {
        self.record.call_id()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn record(&self) -> &CallRecord {
        &self.record
    }

    pub fn telecom(&self) -> &TelecomState {
        &self.telecom
    }

    pub fn disconnect_cause(&self) -> Option<DisconnectCause> {
        self.telecom.disconnect_cause
    }

    fn set_state(&mut self, next: ConnectionState) -> Transition {
        let from = self.state;
        self.state = next;
        self.mirror.set(next);
        debug!("Call {} transitioned {} -> {}", self.record.call_id(), from, next);
        Transition::Changed { from, to: next }
    }

    fn notify(&self, kind: AppEventKind) {
        self.events.emit(AppEvent::new(
            kind,
            self.record.call_id(),
            self.record.snapshot(),
        ));
    }

    /// Reject events once the call is over
    fn ensure_live(&self, event: &'static str) -> Result<()> {
        if self.state.is_terminal() {
            debug!("Call {} already disconnected, rejecting {}", self.record.call_id(), event);
            return Err(CallKeepError::CallTerminated {
                call_id: self.record.call_id().to_string(),
                event: event.to_string(),
            });
        }
        Ok(())
    }

    fn invalid(&self, event: &'static str) -> CallKeepError {
        warn!(
            "Call {}: {} is not valid in state {}",
            self.record.call_id(),
            event,
            self.state
        );
        CallKeepError::InvalidTransition {
            call_id: self.record.call_id().to_string(),
            state: self.state,
            event: event.to_string(),
        }
    }

    /// Mirror number and caller name into the OS-visible presentation
    fn sync_presentation(&mut self) {
        self.telecom.address = self.record.number().map(str::to_string);
        self.telecom.caller_display_name = self
            .record
            .caller_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string);
    }

    fn cancel_alert(&self) {
        if let Some(relay) = &self.relay {
            if let Err(e) = relay.cancel(self.record.call_id()) {
                error!("Failed to cancel alert for call {}: {}", self.record.call_id(), e);
            }
        }
    }

    fn terminate(&mut self, cause: Option<DisconnectCause>, event: &'static str) -> Transition {
        let was_ringing = self.state == ConnectionState::Ringing;
        if cause.is_some() {
            self.telecom.disconnect_cause = cause;
        }
        let transition = self.set_state(ConnectionState::Disconnected);
        self.notify(AppEventKind::CallEnded);
        info!(
            "Call {} disconnected by {} (cause {:?})",
            self.record.call_id(),
            event,
            self.telecom.disconnect_cause
        );

        if was_ringing {
            self.cancel_alert();
        }
        self.release();
        transition
    }

    fn release(&mut self) {
        let call_id = self.record.call_id();
        match &self.releaser {
            Some(weak) => match weak.upgrade() {
                Some(releaser) => {
                    if let Err(e) = releaser.release(call_id) {
                        warn!("Failed to release call {}: {}", call_id, e);
                    }
                }
                None => warn!("Owner of call {} already torn down, skipping release", call_id),
            },
            None => debug!("Call {} has no owner to release from", call_id),
        }
        self.telecom.destroyed = true;
    }

    fn decode_extras(extras: &Value) -> Result<Option<CallAttributes>> {
        match extras.get(EXTRA_ATTRIBUTE_MAP) {
            None | Some(Value::Null) => Ok(None),
            Some(map) => CallAttributes::from_json(map).map(Some),
        }
    }
}

impl TelecomConnection for CallConnection {
    fn on_show_incoming_call_ui(&mut self) -> Result<Transition> {
        const EVENT: &str = "show_incoming_call_ui";
        self.ensure_live(EVENT)?;
        if self.state != ConnectionState::Ringing {
            return Err(self.invalid(EVENT));
        }

        let Some(relay) = &self.relay else {
            debug!("No relay attached, not showing alert for call {}", self.record.call_id());
            return Ok(Transition::Unchanged(self.state));
        };

        let alert = IncomingCallAlert::for_record(&self.record, &self.notification);
        match relay.show_incoming_call(&alert) {
            Ok(()) => debug!(
                "Showing incoming call alert for {} (id {})",
                alert.call_id, alert.notification_id
            ),
            Err(e) => error!("Failed to show alert for call {}: {}", alert.call_id, e),
        }
        Ok(Transition::Unchanged(self.state))
    }

    fn on_answer(&mut self) -> Result<Transition> {
        self.ensure_live("answer")?;
        debug!("Call {}: answer without video state ignored", self.record.call_id());
        Ok(Transition::Ignored(self.state))
    }

    fn on_answer_with_video_state(&mut self, video_state: i32) -> Result<Transition> {
        const EVENT: &str = "answer_with_video_state";
        self.ensure_live(EVENT)?;
        if self.state != ConnectionState::Ringing {
            return Err(self.invalid(EVENT));
        }

        self.telecom.capabilities.insert(Capabilities::HOLD);
        self.telecom.audio_mode_is_voip = true;
        self.telecom.video_state = Some(video_state);
        let transition = self.set_state(ConnectionState::Active);
        self.cancel_alert();

        self.notify(AppEventKind::CallAnswered);
        self.notify(AppEventKind::AudioSessionReady);
        info!("Call {} answered (video state {})", self.record.call_id(), video_state);
        Ok(transition)
    }

    fn on_reject(&mut self) -> Result<Transition> {
        const EVENT: &str = "reject";
        self.ensure_live(EVENT)?;
        if self.state != ConnectionState::Ringing {
            return Err(self.invalid(EVENT));
        }
        Ok(self.terminate(Some(DisconnectCause::Rejected), EVENT))
    }

    fn on_abort(&mut self) -> Result<Transition> {
        const EVENT: &str = "abort";
        self.ensure_live(EVENT)?;
        if self.state != ConnectionState::Ringing {
            return Err(self.invalid(EVENT));
        }
        Ok(self.terminate(Some(DisconnectCause::Rejected), EVENT))
    }

    fn on_hold(&mut self) -> Result<Transition> {
        const EVENT: &str = "hold";
        self.ensure_live(EVENT)?;
        if self.state != ConnectionState::Active {
            return Err(self.invalid(EVENT));
        }
        let transition = self.set_state(ConnectionState::Held);
        self.notify(AppEventKind::CallHeld);
        Ok(transition)
    }

    fn on_unhold(&mut self) -> Result<Transition> {
        const EVENT: &str = "unhold";
        self.ensure_live(EVENT)?;
        if self.state != ConnectionState::Held {
            return Err(self.invalid(EVENT));
        }
        let transition = self.set_state(ConnectionState::Active);
        self.notify(AppEventKind::CallUnheld);
        Ok(transition)
    }

    fn on_disconnect(&mut self) -> Result<Transition> {
        const EVENT: &str = "disconnect";
        self.ensure_live(EVENT)?;
        Ok(self.terminate(Some(DisconnectCause::Local), EVENT))
    }

    fn report_disconnect(&mut self, reason: i32) -> Result<Transition> {
        const EVENT: &str = "report_disconnect";
        self.ensure_live(EVENT)?;
        let cause = DisconnectCause::from_reason_code(reason);
        if cause.is_none() {
            debug!("Call {}: reason code {} has no cause mapping", self.record.call_id(), reason);
        }
        Ok(self.terminate(cause, EVENT))
    }

    fn on_extras_changed(&mut self, extras: &Value) -> Result<Transition> {
        self.ensure_live("extras_changed")?;
        match Self::decode_extras(extras) {
            Ok(Some(attributes)) if !attributes.is_empty() => {
                debug!(
                    "Call {}: replacing {} attributes with {}",
                    self.record.call_id(),
                    self.record.attributes().len(),
                    attributes.len()
                );
                self.record.replace_attributes(attributes);
                self.sync_presentation();
            }
            Ok(_) => debug!("Call {}: extras carry no attributes", self.record.call_id()),
            Err(e) => warn!("Call {}: ignoring extras update: {}", self.record.call_id(), e),
        }
        Ok(Transition::Unchanged(self.state))
    }

    fn on_call_audio_state_changed(&mut self, muted: bool) -> Result<Transition> {
        self.ensure_live("audio_state_changed")?;
        if muted == self.muted {
            return Ok(Transition::Unchanged(self.state));
        }
        self.muted = muted;
        self.notify(if muted {
            AppEventKind::CallMuted
        } else {
            AppEventKind::CallUnmuted
        });
        Ok(Transition::Unchanged(self.state))
    }

    fn on_play_dtmf_tone(&mut self, digit: char) -> Result<Transition> {
        self.ensure_live("play_dtmf_tone")?;
        if !is_dtmf_digit(digit) {
            warn!("Call {}: ignoring invalid DTMF digit {:?}", self.record.call_id(), digit);
            return Ok(Transition::Unchanged(self.state));
        }
        self.record.set(keys::DTMF_DIGIT, digit.to_string());
        self.notify(AppEventKind::DtmfTone);
        Ok(Transition::Unchanged(self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AppEventStream;
    use crate::relay::InMemoryRelay;
    use serde_json::json;

    fn connection() -> (CallConnection, AppEventStream) {
        let (sink, rx) = AppEventSink::channel(64);
        let record = CallRecord::new(
            "c1",
            [(keys::CALLER_NAME, "Alice"), (keys::NUMBER, "tel:1001")]
                .into_iter()
                .collect(),
        );
        (CallConnection::new(record, sink), rx)
    }

    fn drain(rx: &mut AppEventStream) -> Vec<AppEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[test]
    fn test_new_connection_presentation() {
        let (conn, _rx) = connection();
        assert_eq!(conn.state(), ConnectionState::Ringing);
        assert_eq!(conn.telecom().address.as_deref(), Some("tel:1001"));
        assert_eq!(conn.telecom().caller_display_name.as_deref(), Some("Alice"));

        let (sink, _rx) = AppEventSink::channel(4);
        let nameless = CallConnection::new(
            CallRecord::new("c2", [(keys::CALLER_NAME, "")].into_iter().collect()),
            sink,
        );
        assert_eq!(nameless.telecom().caller_display_name, None);
        assert_eq!(nameless.telecom().address, None);
    }

    #[test]
    fn test_answer_sets_capabilities_and_notifies() {
        let (mut conn, mut rx) = connection();
        let transition = conn.on_answer_with_video_state(VIDEO_STATE_AUDIO_ONLY).unwrap();

        assert_eq!(
            transition,
            Transition::Changed {
                from: ConnectionState::Ringing,
                to: ConnectionState::Active
            }
        );
        assert!(conn.telecom().capabilities.contains(Capabilities::HOLD));
        assert!(conn.telecom().audio_mode_is_voip);
        assert_eq!(conn.telecom().video_state, Some(0));
        assert_eq!(
            drain(&mut rx),
            vec![AppEventKind::CallAnswered, AppEventKind::AudioSessionReady]
        );
    }

    #[test]
    fn test_legacy_answer_is_noop() {
        let (mut conn, mut rx) = connection();
        assert_eq!(
            conn.on_answer().unwrap(),
            Transition::Ignored(ConnectionState::Ringing)
        );
        assert_eq!(conn.state(), ConnectionState::Ringing);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_hold_requires_active() {
        let (mut conn, mut rx) = connection();
        let err = conn.on_hold().unwrap_err();
        assert!(matches!(
            err,
            CallKeepError::InvalidTransition {
                state: ConnectionState::Ringing,
                ..
            }
        ));
        assert!(conn.on_unhold().is_err());
        assert_eq!(conn.state(), ConnectionState::Ringing);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_abort_rejects_ringing_call() {
        let (mut conn, mut rx) = connection();
        conn.on_abort().unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.disconnect_cause(), Some(DisconnectCause::Rejected));
        assert!(conn.telecom().destroyed);
        assert_eq!(drain(&mut rx), vec![AppEventKind::CallEnded]);
    }

    #[test]
    fn test_local_disconnect_from_held() {
        let (mut conn, mut rx) = connection();
        conn.on_answer_with_video_state(0).unwrap();
        conn.on_hold().unwrap();
        conn.on_disconnect().unwrap();

        assert_eq!(conn.disconnect_cause(), Some(DisconnectCause::Local));
        assert_eq!(
            drain(&mut rx),
            vec![
                AppEventKind::CallAnswered,
                AppEventKind::AudioSessionReady,
                AppEventKind::CallHeld,
                AppEventKind::CallEnded,
            ]
        );
    }

    #[test]
    fn test_unmapped_reason_leaves_cause_unset() {
        let (mut conn, mut rx) = connection();
        conn.report_disconnect(99).unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.disconnect_cause(), None);
        assert_eq!(drain(&mut rx), vec![AppEventKind::CallEnded]);
    }

    #[test]
    fn test_terminal_state_rejects_everything() {
        let (mut conn, mut rx) = connection();
        conn.report_disconnect(3).unwrap();
        assert_eq!(conn.disconnect_cause(), Some(DisconnectCause::Busy));
        drain(&mut rx);

        for event in [
            ConnectionEvent::Answer,
            ConnectionEvent::AnswerWithVideoState(0),
            ConnectionEvent::Disconnect,
            ConnectionEvent::ReportDisconnect(1),
            ConnectionEvent::AudioStateChanged { muted: true },
            ConnectionEvent::PlayDtmfTone('5'),
        ] {
            let err = conn.apply(&event).unwrap_err();
            assert!(matches!(err, CallKeepError::CallTerminated { .. }));
        }
        assert_eq!(conn.disconnect_cause(), Some(DisconnectCause::Busy));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_mute_changes_are_deduplicated() {
        let (mut conn, mut rx) = connection();
        conn.on_call_audio_state_changed(false).unwrap();
        conn.on_call_audio_state_changed(true).unwrap();
        conn.on_call_audio_state_changed(true).unwrap();
        conn.on_call_audio_state_changed(false).unwrap();

        assert!(!conn.is_muted());
        assert_eq!(
            drain(&mut rx),
            vec![AppEventKind::CallMuted, AppEventKind::CallUnmuted]
        );
    }

    #[test]
    fn test_dtmf_stores_digit() {
        let (mut conn, mut rx) = connection();
        conn.on_play_dtmf_tone('#').unwrap();
        assert_eq!(conn.record().get(keys::DTMF_DIGIT), Some("#"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, AppEventKind::DtmfTone);
        assert_eq!(event.attributes.get(keys::DTMF_DIGIT), Some("#"));
        assert_eq!(event.attributes.get(keys::CALL_ID), Some("c1"));
    }

    #[test]
    fn test_invalid_dtmf_digit_is_skipped() {
        let (mut conn, mut rx) = connection();
        assert!(conn.on_play_dtmf_tone('x').is_ok());
        assert_eq!(conn.record().get(keys::DTMF_DIGIT), None);
        assert!(drain(&mut rx).is_empty());

        conn.on_play_dtmf_tone('7').unwrap();
        assert_eq!(drain(&mut rx), vec![AppEventKind::DtmfTone]);
    }

    #[test]
    fn test_extras_replace_attributes() {
        let (mut conn, _rx) = connection();
        conn.on_extras_changed(&json!({
            "attributeMap": { "callerName": "Bob", "note": "vip" }
        }))
        .unwrap();

        assert_eq!(conn.record().caller_name(), Some("Bob"));
        assert_eq!(conn.record().number(), None);
        assert_eq!(conn.record().get(keys::CALL_ID), Some("c1"));
        assert_eq!(conn.telecom().caller_display_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_malformed_or_empty_extras_keep_attributes() {
        let (mut conn, mut rx) = connection();
        let before = conn.record().snapshot();

        for extras in [
            json!({ "attributeMap": { "number": 42 } }),
            json!({ "attributeMap": "garbage" }),
            json!({ "attributeMap": {} }),
            json!({ "unrelated": true }),
            json!(null),
        ] {
            assert!(conn.on_extras_changed(&extras).is_ok());
        }
        assert_eq!(conn.record().snapshot(), before);

        // still responsive afterwards
        conn.on_answer_with_video_state(0).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![AppEventKind::CallAnswered, AppEventKind::AudioSessionReady]
        );
    }

    #[test]
    fn test_show_ui_goes_through_relay() {
        let relay = Arc::new(InMemoryRelay::new());
        let (conn, _rx) = connection();
        let mut conn = conn.with_relay(relay.clone());

        conn.on_show_incoming_call_ui().unwrap();
        let alert = relay.alert("c1").unwrap();
        assert_eq!(alert.caller_name.as_deref(), Some("Alice"));

        conn.on_reject().unwrap();
        assert!(!relay.is_showing("c1"));
        assert!(conn.on_show_incoming_call_ui().is_err());
    }

    #[test]
    fn test_release_without_owner_is_harmless() {
        struct Gone;
        impl ConnectionReleaser for Gone {
            fn release(&self, _call_id: &str) -> Result<()> {
                Ok(())
            }
        }

        let (mut conn, _rx) = connection();
        let owner: Arc<dyn ConnectionReleaser> = Arc::new(Gone);
        conn.attach_releaser(Arc::downgrade(&owner));
        drop(owner);

        conn.on_reject().unwrap();
        assert!(conn.telecom().destroyed);
    }

    #[test]
    fn test_dtmf_alphabet() {
        for digit in "0123456789*#ABCD".chars() {
            assert!(is_dtmf_digit(digit));
        }
        for digit in "aEx ".chars() {
            assert!(!is_dtmf_digit(digit));
        }
    }
}
