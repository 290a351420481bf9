//! Applet header records and the TLV settings walker.
//!
//! Every applet on a Neo (including the OS itself) starts with a 0x84-byte
//! big-endian header. Applets that expose settings carry a TLV list at
//! `settings_offset` within the full applet image.

use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::io::{Cursor, Read};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid signature: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidSignature { expected: u32, actual: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifier of an applet on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppletId(pub u16);

impl AppletId {
    pub const INVALID: AppletId = AppletId(0xffff);
    /// The operating system.
    pub const SYSTEM: AppletId = AppletId(0x0000);
    pub const ALPHAWORD: AppletId = AppletId(0xa000);
    /// Spell-check dictionary.
    pub const DICTIONARY: AppletId = AppletId(0xa005);

    pub fn raw(self) -> u16 {
        self.0
    }
}

impl Default for AppletId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for AppletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for AppletId {
    fn from(id: u16) -> Self {
        AppletId(id)
    }
}

// ============================================================================
// Header
// ============================================================================

/// Parsed applet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppletHeader {
    pub signature: u32,
    pub rom_size: u32,
    pub ram_size: u32,
    /// Offset of the TLV settings list within the applet image, or zero.
    pub settings_offset: u32,
    pub flags: u32,
    pub applet_id: AppletId,
    pub header_version: u8,
    pub file_count: u8,
    pub name: String,
    pub version_major: u8,
    pub version_minor: u8,
    /// ASCII revision character.
    pub version_revision: u8,
    pub language_id: u8,
    pub info: String,
    pub min_asm_version: u32,
    pub file_space: u32,
}

impl AppletHeader {
    pub const SIZE: usize = 0x84;
    pub const SIGNATURE: u32 = 0xc0ff_eead;
    pub const NAME_LENGTH: usize = 36;
    pub const INFO_LENGTH: usize = 60;
    pub const FLAG_HIDDEN: u32 = 0x01;

    /// Parse a header from the first [`AppletHeader::SIZE`] bytes of `data`.
    ///
    /// A wrong signature is not an error here; check [`AppletHeader::is_valid`].
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..Self::SIZE]);
        let signature = cursor.read_u32::<BigEndian>()?;
        let rom_size = cursor.read_u32::<BigEndian>()?;
        let ram_size = cursor.read_u32::<BigEndian>()?;
        let settings_offset = cursor.read_u32::<BigEndian>()?;
        let flags = cursor.read_u32::<BigEndian>()?;
        let applet_id = AppletId(cursor.read_u16::<BigEndian>()?);
        let header_version = cursor.read_u8()?;
        let file_count = cursor.read_u8()?;
        let name = read_fixed_string(&mut cursor, Self::NAME_LENGTH)?;
        let version_major = cursor.read_u8()?;
        let version_minor = cursor.read_u8()?;
        let version_revision = cursor.read_u8()?;
        let language_id = cursor.read_u8()?;
        let info = read_fixed_string(&mut cursor, Self::INFO_LENGTH)?;
        let min_asm_version = cursor.read_u32::<BigEndian>()?;
        let file_space = cursor.read_u32::<BigEndian>()?;

        Ok(Self {
            signature,
            rom_size,
            ram_size,
            settings_offset,
            flags,
            applet_id,
            header_version,
            file_count,
            name,
            version_major,
            version_minor,
            version_revision,
            language_id,
            info,
            min_asm_version,
            file_space,
        })
    }

    /// True if the signature word matches.
    pub fn is_valid(&self) -> bool {
        self.signature == Self::SIGNATURE
    }

    pub fn is_hidden(&self) -> bool {
        self.flags & Self::FLAG_HIDDEN != 0
    }

    pub fn has_settings(&self) -> bool {
        self.settings_offset != 0
    }

    pub fn language_name(&self) -> &'static str {
        language_name(self.language_id)
    }

    /// Version as "major.minor" with the revision character appended when printable.
    pub fn version_string(&self) -> String {
        let revision = self.version_revision;
        if revision.is_ascii_graphic() {
            format!("{}.{}{}", self.version_major, self.version_minor, revision as char)
        } else {
            format!("{}.{}", self.version_major, self.version_minor)
        }
    }
}

/// Printable name for an applet language code.
pub fn language_name(id: u8) -> &'static str {
    match id {
        1 => "English (US)",
        2 => "English (UK)",
        3 => "French",
        4 => "French (CR)",
        5 => "Italian",
        6 => "German",
        7 => "Spanish",
        8 => "Dutch",
        9 => "Swedish",
        _ => "<unknown>",
    }
}

/// NUL-terminated string stored in a fixed-size field.
fn read_fixed_string(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<String, HeaderError> {
    let mut field = vec![0u8; len];
    cursor.read_exact(&mut field)?;
    Ok(c_string(&field))
}

/// Decode bytes up to the first NUL as Latin-1.
pub(crate) fn c_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

// ============================================================================
// TLV
// ============================================================================

/// One `{type, ident, length, value}` entry borrowed from applet data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// Byte offset of the entry within the applet image.
    pub offset: usize,
    pub item_type: u16,
    pub ident: u16,
    pub value: &'a [u8],
}

impl<'a> Tlv<'a> {
    pub const HEADER_SIZE: usize = 6;

    /// Decode the entry at `offset`. Returns `None` for a terminator or an
    /// entry that runs past the end of `data`.
    pub fn at(data: &'a [u8], offset: usize) -> Option<Self> {
        let header = data.get(offset..offset.checked_add(Self::HEADER_SIZE)?)?;
        let item_type = u16::from_be_bytes([header[0], header[1]]);
        let ident = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if item_type == 0 {
            return None;
        }
        let start = offset + Self::HEADER_SIZE;
        let value = data.get(start..start + length)?;
        Some(Self {
            offset,
            item_type,
            ident,
            value,
        })
    }

    pub fn length(&self) -> usize {
        self.value.len()
    }

    /// Offset of the following entry (value padded to an even length).
    pub fn next_offset(&self) -> usize {
        let length = self.length();
        self.offset + Self::HEADER_SIZE + length + (length & 1)
    }
}

// ============================================================================
// Applet
// ============================================================================

/// An applet as known to a session: its header plus, optionally, the full
/// applet image needed to walk its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applet {
    header: AppletHeader,
    image: Option<Vec<u8>>,
}

impl Applet {
    /// Offset of the pointer to the OS header within an OS image.
    const OS_HEADER_POINTER: usize = 0x48;

    /// Applet known only by its header (as returned by enumeration).
    pub fn from_header(header: AppletHeader) -> Self {
        Self {
            header,
            image: None,
        }
    }

    /// Load a complete applet image whose header starts at byte 0.
    pub fn load_applet(image: Vec<u8>) -> Result<Self, HeaderError> {
        Self::load_with_header_offset(image, 0)
    }

    /// Load an OS image; the header offset is stored at 0x48.
    pub fn load_os(image: Vec<u8>) -> Result<Self, HeaderError> {
        let pointer = image
            .get(Self::OS_HEADER_POINTER..Self::OS_HEADER_POINTER + 4)
            .ok_or(HeaderError::BufferTooSmall {
                expected: Self::OS_HEADER_POINTER + 4,
                actual: image.len(),
            })?;
        let offset = u32::from_be_bytes([pointer[0], pointer[1], pointer[2], pointer[3]]) as usize;
        tracing::debug!(size = image.len(), offset, "Loading OS image");
        Self::load_with_header_offset(image, offset)
    }

    fn load_with_header_offset(image: Vec<u8>, offset: usize) -> Result<Self, HeaderError> {
        let header_bytes = image.get(offset..).unwrap_or_default();
        let header = AppletHeader::parse(header_bytes).map_err(|e| match e {
            HeaderError::BufferTooSmall { expected, .. } => HeaderError::BufferTooSmall {
                expected: offset + expected,
                actual: image.len(),
            },
            other => other,
        })?;
        if !header.is_valid() {
            return Err(HeaderError::InvalidSignature {
                expected: AppletHeader::SIGNATURE,
                actual: header.signature,
            });
        }
        Ok(Self {
            header,
            image: Some(image),
        })
    }

    pub fn header(&self) -> &AppletHeader {
        &self.header
    }

    pub fn id(&self) -> AppletId {
        self.header.applet_id
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    /// First settings entry, if the applet has settings and its image is loaded.
    pub fn first_tlv(&self) -> Option<Tlv<'_>> {
        if !self.header.has_settings() {
            return None;
        }
        let image = self.image.as_deref()?;
        Tlv::at(image, self.header.settings_offset as usize)
    }

    /// Entry following `tlv`, or `None` at the end of the list.
    pub fn next_tlv(&self, tlv: &Tlv<'_>) -> Option<Tlv<'_>> {
        let image = self.image.as_deref()?;
        Tlv::at(image, tlv.next_offset())
    }

    /// Iterate over all settings entries.
    pub fn tlvs(&self) -> impl Iterator<Item = Tlv<'_>> {
        std::iter::successors(self.first_tlv(), move |tlv| self.next_tlv(tlv))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a header record for tests.
    pub(crate) fn header_bytes(id: u16, name: &str, settings_offset: u32) -> Vec<u8> {
        let mut buf = vec![0u8; AppletHeader::SIZE];
        buf[0..4].copy_from_slice(&AppletHeader::SIGNATURE.to_be_bytes());
        buf[4..8].copy_from_slice(&0x8000u32.to_be_bytes());
        buf[8..12].copy_from_slice(&0x400u32.to_be_bytes());
        buf[0x0c..0x10].copy_from_slice(&settings_offset.to_be_bytes());
        buf[0x14..0x16].copy_from_slice(&id.to_be_bytes());
        buf[0x17] = 2;
        buf[0x18..0x18 + name.len()].copy_from_slice(name.as_bytes());
        buf[0x3c] = 3;
        buf[0x3d] = 4;
        buf[0x3e] = b'a';
        buf[0x3f] = 2;
        buf
    }

    fn push_tlv(buf: &mut Vec<u8>, item_type: u16, ident: u16, value: &[u8]) {
        buf.extend_from_slice(&item_type.to_be_bytes());
        buf.extend_from_slice(&ident.to_be_bytes());
        buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        buf.extend_from_slice(value);
        if value.len() % 2 == 1 {
            buf.push(0);
        }
    }

    #[test]
    fn test_parse_header() {
        let header = AppletHeader::parse(&header_bytes(0xa000, "AlphaWord Plus", 0)).unwrap();
        assert!(header.is_valid());
        assert_eq!(header.applet_id, AppletId::ALPHAWORD);
        assert_eq!(header.name, "AlphaWord Plus");
        assert_eq!(header.file_count, 2);
        assert_eq!(header.ram_size, 0x400);
        assert_eq!(header.version_string(), "3.4a");
        assert_eq!(header.language_name(), "English (UK)");
        assert!(!header.has_settings());
    }

    #[test]
    fn test_bad_signature_is_soft() {
        let mut bytes = header_bytes(0xa000, "X", 0);
        bytes[0] = 0;
        let header = AppletHeader::parse(&bytes).unwrap();
        assert!(!header.is_valid());
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(matches!(
            AppletHeader::parse(&[0u8; 0x40]),
            Err(HeaderError::BufferTooSmall { expected: 0x84, actual: 0x40 })
        ));
    }

    #[test]
    fn test_tlv_walk() {
        let mut image = header_bytes(0xa000, "AlphaWord", AppletHeader::SIZE as u32);
        push_tlv(&mut image, 0x0001, 0x2001, b"Label\0");
        push_tlv(&mut image, 0x0102, 0x1010, &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 9]);
        push_tlv(&mut image, 0x0105, 0x400b, b"pass\0");
        push_tlv(&mut image, 0x8002, 0x0000, &[0xa0, 0x00]);
        image.extend_from_slice(&[0u8; 6]);

        let applet = Applet::load_applet(image).unwrap();
        let items: Vec<_> = applet.tlvs().collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].value, b"Label\0");
        assert_eq!(items[2].ident, 0x400b);
        assert_eq!(items[2].length(), 5);
        assert_eq!(items[3].offset, items[2].offset + 6 + 6);
        assert_eq!(items[3].value, &[0xa0, 0x00]);
    }

    #[test]
    fn test_tlv_requires_loaded_image() {
        let header = AppletHeader::parse(&header_bytes(0xa000, "AlphaWord", 0x84)).unwrap();
        let applet = Applet::from_header(header);
        assert!(applet.first_tlv().is_none());
    }

    #[test]
    fn test_tlv_overrun_stops_walk() {
        let mut image = header_bytes(0x1234, "Test", AppletHeader::SIZE as u32);
        push_tlv(&mut image, 0x0001, 0x0001, b"ok");
        image.extend_from_slice(&[0x01, 0x03, 0x00, 0x01, 0x00, 0x40]);

        let applet = Applet::load_applet(image).unwrap();
        assert_eq!(applet.tlvs().count(), 1);
    }

    #[test]
    fn test_load_os_uses_header_pointer() {
        let mut image = vec![0u8; 0x100];
        image[0x48..0x4c].copy_from_slice(&0x100u32.to_be_bytes());
        image.extend_from_slice(&header_bytes(0x0000, "System", 0));

        let applet = Applet::load_os(image).unwrap();
        assert_eq!(applet.id(), AppletId::SYSTEM);
        assert!(applet.is_loaded());

        assert!(matches!(
            Applet::load_os(vec![0u8; 0x40]),
            Err(HeaderError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_load_rejects_bad_signature() {
        let mut image = header_bytes(0xa000, "X", 0);
        image[3] = 0;
        assert!(matches!(
            Applet::load_applet(image),
            Err(HeaderError::InvalidSignature { .. })
        ));
    }
}
