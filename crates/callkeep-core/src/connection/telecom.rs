//! Inbound telephony events and the capability interface the OS adapter drives

use serde_json::Value;

use super::state::Transition;
use crate::error::Result;

/// Event delivered to a connection by the OS telephony layer or the UI
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The OS asks for the incoming-call alert to be shown
    ShowIncomingCallUi,
    /// Legacy answer without a video state; accepted and ignored
    Answer,
    /// Answer with the given video state
    AnswerWithVideoState(i32),
    Reject,
    Abort,
    Hold,
    Unhold,
    /// Locally initiated hang-up
    Disconnect,
    /// Application-reported end of call with a numeric reason code
    ReportDisconnect(i32),
    /// Connection extras changed; attributes travel under `attributeMap`
    ExtrasChanged(Value),
    AudioStateChanged { muted: bool },
    PlayDtmfTone(char),
}

impl ConnectionEvent {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::ShowIncomingCallUi => "show_incoming_call_ui",
            ConnectionEvent::Answer => "answer",
            ConnectionEvent::AnswerWithVideoState(_) => "answer_with_video_state",
            ConnectionEvent::Reject => "reject",
            ConnectionEvent::Abort => "abort",
            ConnectionEvent::Hold => "hold",
            ConnectionEvent::Unhold => "unhold",
            ConnectionEvent::Disconnect => "disconnect",
            ConnectionEvent::ReportDisconnect(_) => "report_disconnect",
            ConnectionEvent::ExtrasChanged(_) => "extras_changed",
            ConnectionEvent::AudioStateChanged { .. } => "audio_state_changed",
            ConnectionEvent::PlayDtmfTone(_) => "play_dtmf_tone",
        }
    }
}

/// Transition methods an OS telephony adapter calls on a connection.
///
/// Each method either applies its transition or reports why the event was
/// rejected; a rejected event leaves the connection untouched.
pub trait TelecomConnection {
    fn on_show_incoming_call_ui(&mut self) -> Result<Transition>;

    /// Legacy entry point; never changes state
    fn on_answer(&mut self) -> Result<Transition>;

    fn on_answer_with_video_state(&mut self, video_state: i32) -> Result<Transition>;

    fn on_reject(&mut self) -> Result<Transition>;

    fn on_abort(&mut self) -> Result<Transition>;

    fn on_hold(&mut self) -> Result<Transition>;

    fn on_unhold(&mut self) -> Result<Transition>;

    fn on_disconnect(&mut self) -> Result<Transition>;

    fn report_disconnect(&mut self, reason: i32) -> Result<Transition>;

    fn on_extras_changed(&mut self, extras: &Value) -> Result<Transition>;

    fn on_call_audio_state_changed(&mut self, muted: bool) -> Result<Transition>;

    fn on_play_dtmf_tone(&mut self, digit: char) -> Result<Transition>;

    /// Route an event to the matching transition method
    fn apply(&mut self, event: &ConnectionEvent) -> Result<Transition> {
        match event {
            ConnectionEvent::ShowIncomingCallUi => self.on_show_incoming_call_ui(),
            ConnectionEvent::Answer => self.on_answer(),
            ConnectionEvent::AnswerWithVideoState(video_state) => {
                self.on_answer_with_video_state(*video_state)
            }
            ConnectionEvent::Reject => self.on_reject(),
            ConnectionEvent::Abort => self.on_abort(),
            ConnectionEvent::Hold => self.on_hold(),
            ConnectionEvent::Unhold => self.on_unhold(),
            ConnectionEvent::Disconnect => self.on_disconnect(),
            ConnectionEvent::ReportDisconnect(reason) => self.report_disconnect(*reason),
            ConnectionEvent::ExtrasChanged(extras) => self.on_extras_changed(extras),
            ConnectionEvent::AudioStateChanged { muted } => {
                self.on_call_audio_state_changed(*muted)
            }
            ConnectionEvent::PlayDtmfTone(digit) => self.on_play_dtmf_tone(*digit),
        }
    }
}
