//! Driver states, resource events and the protocol transition table.
//!
//! Every (state, event) pair is spelled out in [`transition`] with no
//! wildcard arms, so adding a state or an event does not compile until the
//! table says what happens.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolState {
    #[serde(rename = "DRIVER_STATE_UNKNOWN")]
    Unknown,
    #[serde(rename = "DRIVER_STATE_COMMAND")]
    Command,
    #[serde(rename = "DRIVER_STATE_AUTOSAMPLE")]
    Autosample,
    #[serde(rename = "DRIVER_STATE_POLL")]
    Poll,
    #[serde(rename = "DRIVER_STATE_DIRECT_ACCESS")]
    DirectAccess,
}

impl ProtocolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolState::Unknown => "DRIVER_STATE_UNKNOWN",
            ProtocolState::Command => "DRIVER_STATE_COMMAND",
            ProtocolState::Autosample => "DRIVER_STATE_AUTOSAMPLE",
            ProtocolState::Poll => "DRIVER_STATE_POLL",
            ProtocolState::DirectAccess => "DRIVER_STATE_DIRECT_ACCESS",
        }
    }
}

/// Connection level and, once connected, the operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    Unconfigured,
    Disconnected,
    Connected(ProtocolState),
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Unconfigured => "DRIVER_STATE_UNCONFIGURED",
            DriverState::Disconnected => "DRIVER_STATE_DISCONNECTED",
            DriverState::Connected(state) => state.as_str(),
        }
    }

    pub fn protocol_state(&self) -> Option<ProtocolState> {
        match self {
            DriverState::Connected(state) => Some(*state),
            _ => None,
        }
    }
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DriverState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolEvent {
    #[serde(rename = "DRIVER_EVENT_START_AUTOSAMPLE")]
    StartAutosample,
    #[serde(rename = "DRIVER_EVENT_STOP_AUTOSAMPLE")]
    StopAutosample,
    #[serde(rename = "DRIVER_EVENT_START_POLL")]
    StartPoll,
    #[serde(rename = "DRIVER_EVENT_STOP_POLL")]
    StopPoll,
    #[serde(rename = "DRIVER_EVENT_ACQUIRE_SAMPLE")]
    AcquireSample,
    #[serde(rename = "DRIVER_EVENT_START_DIRECT")]
    StartDirect,
    #[serde(rename = "DRIVER_EVENT_STOP_DIRECT")]
    StopDirect,
    #[serde(rename = "DRIVER_EVENT_EXECUTE_DIRECT")]
    ExecuteDirect,
    #[serde(rename = "DRIVER_EVENT_RESET")]
    Reset,
    #[serde(rename = "DRIVER_EVENT_BREAK")]
    Break,
}

impl ProtocolEvent {
    pub const ALL: [ProtocolEvent; 10] = [
        ProtocolEvent::StartAutosample,
        ProtocolEvent::StopAutosample,
        ProtocolEvent::StartPoll,
        ProtocolEvent::StopPoll,
        ProtocolEvent::AcquireSample,
        ProtocolEvent::StartDirect,
        ProtocolEvent::StopDirect,
        ProtocolEvent::ExecuteDirect,
        ProtocolEvent::Reset,
        ProtocolEvent::Break,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolEvent::StartAutosample => "DRIVER_EVENT_START_AUTOSAMPLE",
            ProtocolEvent::StopAutosample => "DRIVER_EVENT_STOP_AUTOSAMPLE",
            ProtocolEvent::StartPoll => "DRIVER_EVENT_START_POLL",
            ProtocolEvent::StopPoll => "DRIVER_EVENT_STOP_POLL",
            ProtocolEvent::AcquireSample => "DRIVER_EVENT_ACQUIRE_SAMPLE",
            ProtocolEvent::StartDirect => "DRIVER_EVENT_START_DIRECT",
            ProtocolEvent::StopDirect => "DRIVER_EVENT_STOP_DIRECT",
            ProtocolEvent::ExecuteDirect => "DRIVER_EVENT_EXECUTE_DIRECT",
            ProtocolEvent::Reset => "DRIVER_EVENT_RESET",
            ProtocolEvent::Break => "DRIVER_EVENT_BREAK",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl std::fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work the driver performs for an accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EnterAutosample,
    LeaveAutosample,
    EnterPoll,
    LeavePoll,
    /// Take one sample starting from the command console
    AcquireFromCommand,
    AcquireFromPoll,
    EnterDirect,
    LeaveDirect,
    PassThrough,
    BreakConsole,
    ResetInstrument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    /// State once the instrument confirms the action
    pub target: ProtocolState,
}

const fn to(action: Action, target: ProtocolState) -> Option<Transition> {
    Some(Transition { action, target })
}

/// `None` means the event is a known command that the state does not accept.
pub fn transition(state: ProtocolState, event: ProtocolEvent) -> Option<Transition> {
    use Action as A;
    use ProtocolEvent as E;
    use ProtocolState as S;

    match state {
        S::Unknown => match event {
            E::StartAutosample
            | E::StopAutosample
            | E::StartPoll
            | E::StopPoll
            | E::AcquireSample
            | E::StartDirect
            | E::StopDirect
            | E::ExecuteDirect
            | E::Reset
            | E::Break => None,
        },
        S::Command => match event {
            E::StartAutosample => to(A::EnterAutosample, S::Autosample),
            E::StartPoll => to(A::EnterPoll, S::Poll),
            E::StartDirect => to(A::EnterDirect, S::DirectAccess),
            E::AcquireSample => to(A::AcquireFromCommand, S::Command),
            E::Break => to(A::BreakConsole, S::Command),
            E::Reset => to(A::ResetInstrument, S::Command),
            E::StopAutosample | E::StopPoll | E::StopDirect | E::ExecuteDirect => None,
        },
        S::Autosample => match event {
            E::StopAutosample => to(A::LeaveAutosample, S::Command),
            E::StartAutosample
            | E::StartPoll
            | E::StopPoll
            | E::AcquireSample
            | E::StartDirect
            | E::StopDirect
            | E::ExecuteDirect
            | E::Reset
            | E::Break => None,
        },
        S::Poll => match event {
            E::AcquireSample => to(A::AcquireFromPoll, S::Poll),
            E::StopPoll => to(A::LeavePoll, S::Command),
            E::StartPoll
            | E::StartAutosample
            | E::StopAutosample
            | E::StartDirect
            | E::StopDirect
            | E::ExecuteDirect
            | E::Reset
            | E::Break => None,
        },
        S::DirectAccess => match event {
            E::StopDirect => to(A::LeaveDirect, S::Command),
            E::ExecuteDirect => to(A::PassThrough, S::DirectAccess),
            E::StartAutosample
            | E::StopAutosample
            | E::StartPoll
            | E::StopPoll
            | E::AcquireSample
            | E::StartDirect
            | E::Reset
            | E::Break => None,
        },
    }
}
