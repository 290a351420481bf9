//! Dialogue state tracking.

pub mod machine;

pub use machine::{DialogueMachine, DialogueState};
