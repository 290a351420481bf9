//! Settings item lists exchanged with GET_SETTINGS / SET_SETTINGS.
//!
//! A list is a packed run of TLV items, each padded to an even length. The
//! list ends at an all-zero item header or when the next item would run past
//! the end of the data.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use thiserror::Error;

use crate::applet::c_string;

/// Item type codes.
pub mod item_type {
    /// End of data marker.
    pub const NONE: u16 = 0x0000;
    /// Fixed label (C string).
    pub const LABEL: u16 = 0x0001;
    /// Numeric range: {default, min, max} as u32.
    pub const RANGE32: u16 = 0x0102;
    /// Option list: {default, a, b, c...} as u16 idents.
    pub const OPTION: u16 = 0x0103;
    /// Password, max 6 characters (C string).
    pub const PASSWORD6: u16 = 0x0105;
    /// Descriptive text (C string).
    pub const DESCRIPTION: u16 = 0x0106;
    /// File password; the file is identified by the ident field.
    pub const FILE_PASSWORD: u16 = 0xc001;
    /// u16 applet ID.
    pub const APPLET_ID: u16 = 0x8002;
}

/// Item identifiers.
pub mod ident {
    pub const NONE: u16 = 0x0000;
    pub const ON: u16 = 0x1001;
    pub const OFF: u16 = 0x1002;
    pub const YES: u16 = 0x100c;
    pub const NO: u16 = 0x100d;
    /// Master password, as a PASSWORD6 item.
    pub const SYSTEM_PASSWORD: u16 = 0x400b;
    /// Clear all AlphaWord files, as an OPTION item set to `ON`.
    pub const ALPHAWORD_CLEAR_FILES: u16 = 0x8003;
    /// AlphaWord maximum file size, as RANGE32.
    pub const ALPHAWORD_MAX_FILE_SIZE: u16 = 0x1010;
    /// AlphaWord minimum file size, as RANGE32.
    pub const ALPHAWORD_MIN_FILE_SIZE: u16 = 0x1011;
}

const ITEM_HEADER_SIZE: usize = 6;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("No item started")]
    NoItem,
    #[error("Settings buffer full: need {needed} bytes, {available} available")]
    Full { needed: usize, available: usize },
    #[error("Item too long")]
    ItemTooLong,
}

/// One item borrowed from a settings list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsItem<'a> {
    pub item_type: u16,
    pub ident: u16,
    pub value: &'a [u8],
}

impl SettingsItem<'_> {
    pub fn value_u8(&self, index: usize) -> Option<u8> {
        self.value.get(index).copied()
    }

    pub fn value_u16(&self, index: usize) -> Option<u16> {
        self.value.get(index * 2..index * 2 + 2).map(BigEndian::read_u16)
    }

    pub fn value_u32(&self, index: usize) -> Option<u32> {
        self.value.get(index * 4..index * 4 + 4).map(BigEndian::read_u32)
    }

    /// Value decoded as a NUL-terminated string.
    pub fn value_str(&self) -> String {
        c_string(self.value)
    }
}

impl fmt::Display for SettingsItem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type {:04x}  ident {:04x}  length {:04x}  value: ",
            self.item_type,
            self.ident,
            self.value.len()
        )?;
        match self.item_type {
            item_type::LABEL
            | item_type::PASSWORD6
            | item_type::DESCRIPTION
            | item_type::FILE_PASSWORD => write!(f, "{}", self.value_str()),
            item_type::OPTION | item_type::APPLET_ID => {
                write!(f, "{{")?;
                for v in self.value.chunks_exact(2).map(BigEndian::read_u16) {
                    write!(f, " {:04x}", v)?;
                }
                write!(f, " }}")
            }
            item_type::RANGE32 => {
                write!(f, "{{")?;
                for v in self.value.chunks_exact(4).map(BigEndian::read_u32) {
                    write!(f, " {:04x}", v)?;
                }
                write!(f, " }}")
            }
            _ => {
                write!(f, "{{")?;
                for b in self.value {
                    write!(f, " {:02x}", b)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// A settings list, either read from a device or built for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsList {
    data: Vec<u8>,
    capacity: usize,
    new_item: Option<usize>,
}

impl SettingsList {
    /// Empty list that may grow to `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            new_item: None,
        }
    }

    /// Wrap data received from a device.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let capacity = data.len();
        Self {
            data,
            capacity,
            new_item: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes still available for new items.
    pub fn space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    fn load_item(&self, offset: usize) -> Option<(SettingsItem<'_>, usize)> {
        let header = self.data.get(offset..offset + ITEM_HEADER_SIZE)?;
        let item_type = BigEndian::read_u16(&header[0..2]);
        let ident = BigEndian::read_u16(&header[2..4]);
        let length = BigEndian::read_u16(&header[4..6]) as usize;
        if item_type == 0 && ident == 0 && length == 0 {
            return None;
        }
        let total = ITEM_HEADER_SIZE + length + (length & 1);
        if offset + total > self.data.len() {
            return None;
        }
        let start = offset + ITEM_HEADER_SIZE;
        Some((
            SettingsItem {
                item_type,
                ident,
                value: &self.data[start..start + length],
            },
            total,
        ))
    }

    /// Iterate over the items in order.
    pub fn iter(&self) -> impl Iterator<Item = SettingsItem<'_>> {
        let mut offset = 0;
        std::iter::from_fn(move || {
            let (item, total) = self.load_item(offset)?;
            offset += total;
            Some(item)
        })
    }

    pub fn item_at(&self, index: usize) -> Option<SettingsItem<'_>> {
        self.iter().nth(index)
    }

    /// First item with the given type and ident.
    pub fn find(&self, item_type: u16, ident: u16) -> Option<SettingsItem<'_>> {
        self.iter()
            .find(|item| item.item_type == item_type && item.ident == ident)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.new_item = None;
    }

    /// Start a new item with no data, padding the previous one to an even length.
    pub fn new_item(&mut self, item_type: u16, ident: u16) -> Result<(), SettingsError> {
        let padded = self.data.len() + (self.data.len() & 1);
        let needed = padded + ITEM_HEADER_SIZE;
        if needed > self.capacity {
            return Err(SettingsError::Full {
                needed: needed - self.data.len(),
                available: self.space(),
            });
        }
        self.data.resize(padded, 0);
        self.new_item = Some(padded);
        self.data.extend_from_slice(&item_type.to_be_bytes());
        self.data.extend_from_slice(&ident.to_be_bytes());
        self.data.extend_from_slice(&0u16.to_be_bytes());
        Ok(())
    }

    /// Append raw bytes to the item started by [`SettingsList::new_item`].
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), SettingsError> {
        let item = self.new_item.ok_or(SettingsError::NoItem)?;
        let needed = bytes.len() + (bytes.len() & 1);
        if needed > self.space() {
            return Err(SettingsError::Full {
                needed,
                available: self.space(),
            });
        }
        let length = BigEndian::read_u16(&self.data[item + 4..item + 6]) as usize + bytes.len();
        let length = u16::try_from(length).map_err(|_| SettingsError::ItemTooLong)?;
        self.data.extend_from_slice(bytes);
        BigEndian::write_u16(&mut self.data[item + 4..item + 6], length);
        Ok(())
    }

    /// Append a string with its NUL terminator.
    pub fn append_str(&mut self, value: &str) -> Result<(), SettingsError> {
        let mut bytes: Vec<u8> = value.bytes().collect();
        bytes.push(0);
        self.append_bytes(&bytes)
    }

    pub fn append_u8(&mut self, value: u8) -> Result<(), SettingsError> {
        self.append_bytes(&[value])
    }

    pub fn append_u16(&mut self, value: u16) -> Result<(), SettingsError> {
        self.append_bytes(&value.to_be_bytes())
    }

    pub fn append_u32(&mut self, value: u32) -> Result<(), SettingsError> {
        self.append_bytes(&value.to_be_bytes())
    }
}

impl fmt::Display for SettingsList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in self.iter() {
            writeln!(f, "  {}", item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_clear_files_list() {
        let mut list = SettingsList::with_capacity(12);
        list.new_item(item_type::OPTION, ident::ALPHAWORD_CLEAR_FILES).unwrap();
        list.append_u16(ident::ON).unwrap();
        list.append_u16(ident::ON).unwrap();
        list.append_u16(ident::OFF).unwrap();

        assert_eq!(
            list.as_bytes(),
            &[0x01, 0x03, 0x80, 0x03, 0x00, 0x06, 0x10, 0x01, 0x10, 0x01, 0x10, 0x02]
        );
        assert_eq!(list.space(), 0);
        assert!(list.append_u8(1).is_err());
    }

    #[test]
    fn test_odd_item_is_padded() {
        let mut list = SettingsList::with_capacity(64);
        list.new_item(item_type::PASSWORD6, ident::SYSTEM_PASSWORD).unwrap();
        list.append_str("abcd").unwrap();
        list.new_item(item_type::APPLET_ID, 0).unwrap();
        list.append_u16(0xa000).unwrap();

        assert_eq!(list.len(), 6 + 5 + 1 + 6 + 2);
        let items: Vec<_> = list.iter().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].value_str(), "abcd");
        assert_eq!(items[1].value_u16(0), Some(0xa000));
    }

    #[test]
    fn test_find_and_index() {
        let mut list = SettingsList::with_capacity(64);
        list.new_item(item_type::RANGE32, ident::ALPHAWORD_MIN_FILE_SIZE).unwrap();
        list.append_u32(512).unwrap();
        list.append_u32(256).unwrap();
        list.append_u32(4096).unwrap();
        list.new_item(item_type::LABEL, 0x2001).unwrap();
        list.append_str("Hi").unwrap();

        let range = list
            .find(item_type::RANGE32, ident::ALPHAWORD_MIN_FILE_SIZE)
            .unwrap();
        assert_eq!(range.value_u32(2), Some(4096));
        assert_eq!(list.item_at(1).unwrap().value_str(), "Hi");
        assert!(list.item_at(2).is_none());
        assert!(list.find(item_type::LABEL, 0x9999).is_none());
    }

    #[test]
    fn test_walk_stops_at_terminator_and_overrun() {
        let data = vec![
            0x00, 0x01, 0x00, 0x02, 0x00, 0x02, b'o', b'k', // label
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // terminator
            0x00, 0x01, 0x00, 0x03, 0x00, 0x02, b'n', b'o',
        ];
        assert_eq!(SettingsList::from_bytes(data).iter().count(), 1);

        let overrun = vec![0x00, 0x01, 0x00, 0x02, 0x00, 0x10, b'x'];
        assert_eq!(SettingsList::from_bytes(overrun).iter().count(), 0);
    }

    #[test]
    fn test_append_without_item() {
        let mut list = SettingsList::with_capacity(8);
        assert_eq!(list.append_u8(1), Err(SettingsError::NoItem));
    }
}
