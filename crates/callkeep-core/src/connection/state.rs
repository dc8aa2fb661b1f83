//! Connection states and the OS-visible call properties

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a call connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Offered, not yet answered; the incoming-call alert is showing
    Ringing,
    /// Answered, audio flowing
    Active,
    /// Answered, audio suspended by the user
    Held,
    /// Terminal
    Disconnected,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Ringing => 0,
            ConnectionState::Active => 1,
            ConnectionState::Held => 2,
            ConnectionState::Disconnected => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Ringing,
            1 => ConnectionState::Active,
            2 => ConnectionState::Held,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Ringing => "RINGING",
            ConnectionState::Active => "ACTIVE",
            ConnectionState::Held => "HELD",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// Reason a call ended, as surfaced to the OS telephony UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectCause {
    Error,
    Local,
    Remote,
    Busy,
    AnsweredElsewhere,
    Missed,
    Rejected,
}

impl DisconnectCause {
    /// Map an application reason code to a cause.
    ///
    /// | code | cause |
    /// |------|-------|
    /// | 1 | `Error` |
    /// | 2, 5 | `Remote` |
    /// | 3 | `Busy` |
    /// | 4 | `AnsweredElsewhere` |
    /// | 6 | `Missed` |
    ///
    /// Any other code leaves the cause unset.
    pub fn from_reason_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DisconnectCause::Error),
            2 | 5 => Some(DisconnectCause::Remote),
            3 => Some(DisconnectCause::Busy),
            4 => Some(DisconnectCause::AnsweredElsewhere),
            6 => Some(DisconnectCause::Missed),
            _ => None,
        }
    }
}

/// Connection capability bits advertised to the OS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// The call can be put on hold
    pub const HOLD: Capabilities = Capabilities(0x0000_0001);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Capabilities) {
        self.0 |= other.0;
    }
}

/// Audio-only video state, the default for answers coming from the UI
pub const VIDEO_STATE_AUDIO_ONLY: i32 = 0;

/// Call properties mirrored to the OS telephony service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelecomState {
    pub capabilities: Capabilities,
    pub audio_mode_is_voip: bool,
    pub address: Option<String>,
    pub caller_display_name: Option<String>,
    pub video_state: Option<i32>,
    pub disconnect_cause: Option<DisconnectCause>,
    /// Set once the connection has been released to the OS
    pub destroyed: bool,
}

/// Outcome of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The connection moved to a new state
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The event was handled without a state change
    Unchanged(ConnectionState),
    /// The event is accepted but deliberately does nothing
    Ignored(ConnectionState),
}

impl Transition {
    /// State after the event
    pub fn state(&self) -> ConnectionState {
        match *self {
            Transition::Changed { to, .. } => to,
            Transition::Unchanged(state) | Transition::Ignored(state) => state,
        }
    }
}
