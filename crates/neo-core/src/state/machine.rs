//! State machine for a device dialogue.
//!
//! A dialogue runs `Disconnected -> Handshaking -> Active`, moves between
//! `Active` and `Transfer` for every block exchange and always returns to
//! `Disconnected` through the closing reset.

use std::fmt;

/// Position within a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogueState {
    /// No dialogue open; the device is in its reset state.
    #[default]
    Disconnected,
    /// Hello, reset and applet switch in progress.
    Handshaking,
    /// Framed request/response exchange allowed.
    Active,
    /// Block data moving in either direction.
    Transfer,
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogueState::Disconnected => write!(f, "DISCONNECTED"),
            DialogueState::Handshaking => write!(f, "HANDSHAKING"),
            DialogueState::Active => write!(f, "ACTIVE"),
            DialogueState::Transfer => write!(f, "TRANSFER"),
        }
    }
}

impl DialogueState {
    /// Check if `next` is a legal successor of this state.
    pub fn can_transition(&self, next: DialogueState) -> bool {
        use DialogueState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Handshaking)
                | (Handshaking, Active)
                | (Active, Transfer)
                | (Transfer, Active)
        )
    }
}

/// Tracks the dialogue state of one session.
#[derive(Debug, Default)]
pub struct DialogueMachine {
    state: DialogueState,
    /// Dialogues opened since the session was created.
    pub dialogues: u64,
}

impl DialogueMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DialogueState {
        self.state
    }

    /// True while a dialogue is open.
    pub fn is_open(&self) -> bool {
        matches!(self.state, DialogueState::Active | DialogueState::Transfer)
    }

    /// Transition to a new state, returning the previous one.
    pub fn goto_state(&mut self, new_state: DialogueState) -> DialogueState {
        if !self.state.can_transition(new_state) {
            tracing::warn!(from = %self.state, to = %new_state, "Unexpected state transition");
        } else {
            tracing::trace!(from = %self.state, to = %new_state, "State transition");
        }
        if new_state == DialogueState::Handshaking {
            self.dialogues += 1;
        }
        std::mem::replace(&mut self.state, new_state)
    }
}
