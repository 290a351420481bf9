//! Protocol module - AlphaSmart Neo wire definitions.

pub mod checksum;
pub mod constants;
pub mod message;

pub use checksum::{checksum8, checksum16};
pub use constants::*;
pub use message::Message;
