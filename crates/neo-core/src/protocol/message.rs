//! Fixed 8-byte command/response frame.
//!
//! Byte 0 carries the command code, bytes 1-6 carry big-endian arguments at
//! caller-chosen offsets and byte 7 is the 8-bit additive checksum of bytes
//! 0-6. Every mutation keeps the checksum byte consistent.

use std::fmt;

use super::checksum::checksum8;
use super::constants::{MESSAGE_SIZE, describe};

const CHECKSUM_OFFSET: usize = MESSAGE_SIZE - 1;

/// A single protocol frame.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Message {
    raw: [u8; MESSAGE_SIZE],
}

impl Message {
    /// Create a frame for `command` with all arguments zeroed.
    pub fn new(command: u8) -> Self {
        let mut message = Self::default();
        message.set_command(command);
        message
    }

    /// Wrap a frame received from the device. The checksum is not altered.
    pub fn from_bytes(raw: [u8; MESSAGE_SIZE]) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_SIZE] {
        &self.raw
    }

    pub fn command(&self) -> u8 {
        self.raw[0]
    }

    /// Reset the frame to `command` with zero arguments.
    pub fn set_command(&mut self, command: u8) {
        self.raw = [0; MESSAGE_SIZE];
        self.raw[0] = command;
        self.update_checksum();
    }

    /// Read a big-endian argument of `width` bytes starting at `offset`.
    pub fn argument(&self, offset: usize, width: usize) -> u32 {
        debug_assert!((1..=4).contains(&width), "argument width out of range");
        debug_assert!(offset >= 1 && offset + width <= CHECKSUM_OFFSET, "argument overlaps frame");

        self.raw[offset..offset + width]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32)
    }

    /// Store `value` big-endian in `width` bytes at `offset`. High bits that
    /// do not fit are discarded.
    pub fn set_argument(&mut self, value: u32, offset: usize, width: usize) {
        debug_assert!((1..=4).contains(&width), "argument width out of range");
        debug_assert!(offset >= 1 && offset + width <= CHECKSUM_OFFSET, "argument overlaps frame");

        let bytes = value.to_be_bytes();
        self.raw[offset..offset + width].copy_from_slice(&bytes[4 - width..]);
        self.update_checksum();
    }

    /// Builder form of [`Message::set_argument`].
    pub fn with_argument(mut self, value: u32, offset: usize, width: usize) -> Self {
        self.set_argument(value, offset, width);
        self
    }

    /// True if the checksum byte matches the frame contents.
    pub fn is_valid(&self) -> bool {
        self.raw[CHECKSUM_OFFSET] == checksum8(&self.raw[..CHECKSUM_OFFSET])
    }

    fn update_checksum(&mut self) {
        self.raw[CHECKSUM_OFFSET] = checksum8(&self.raw[..CHECKSUM_OFFSET]);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message({} [{}])", describe(self.command()), self)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.raw.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_new_message_is_valid() {
        let msg = Message::new(REQUEST_LIST_APPLETS);
        assert_eq!(msg.command(), REQUEST_LIST_APPLETS);
        assert_eq!(&msg.as_bytes()[1..7], &[0; 6]);
        assert!(msg.is_valid());
    }

    #[test]
    fn test_argument_round_trip() {
        let mut msg = Message::new(REQUEST_READ_FILE);
        msg.set_argument(0x0abcde, 1, 3);
        msg.set_argument(7, 4, 1);
        msg.set_argument(0xa000, 5, 2);

        assert_eq!(msg.argument(1, 3), 0x0abcde);
        assert_eq!(msg.argument(4, 1), 7);
        assert_eq!(msg.argument(5, 2), 0xa000);
        assert!(msg.is_valid());
    }

    #[test]
    fn test_argument_truncates_to_width() {
        let msg = Message::new(REQUEST_BLOCK_WRITE).with_argument(0x1234_5678, 5, 2);
        assert_eq!(msg.argument(5, 2), 0x5678);
        assert_eq!(msg.argument(1, 4), 0);
    }

    #[test]
    fn test_checksum_byte() {
        let msg = Message::new(REQUEST_BLOCK_WRITE)
            .with_argument(0x400, 1, 4)
            .with_argument(0xff, 5, 2);
        assert_eq!(msg.as_bytes(), &[0x02, 0, 0, 0x04, 0, 0, 0xff, 0x05]);
    }

    #[test]
    fn test_corrupted_frame_is_invalid() {
        let mut raw = *Message::new(REQUEST_RESTART).as_bytes();
        raw[3] ^= 0x10;
        assert!(!Message::from_bytes(raw).is_valid());
    }

    #[test]
    fn test_set_command_clears_arguments() {
        let mut msg = Message::new(REQUEST_COMMIT).with_argument(3, 4, 1);
        msg.set_command(REQUEST_BLOCK_READ);
        assert_eq!(msg.as_bytes(), &[0x10, 0, 0, 0, 0, 0, 0, 0x10]);
    }
}
