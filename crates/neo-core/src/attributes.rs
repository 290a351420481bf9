//! 40-byte file attribute record.
//!
//! | Offset | Size | Field                         |
//! |--------|------|-------------------------------|
//! | 0x00   | 16   | filename, NUL terminated      |
//! | 0x10   | 8    | password, NUL terminated      |
//! | 0x18   | 4    | minimum size                  |
//! | 0x1c   | 4    | allocated size                |
//! | 0x20   | 4    | flags                         |
//! | 0x24   | 1    | unknown                       |
//! | 0x25   | 1    | file-space code               |
//! | 0x26   | 2    | unknown                       |

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

use crate::applet::{HeaderError, c_string};

/// Raw codes stored for "unbound" and file spaces 1 to 8.
const FILE_SPACE_CODES: [u8; 9] = [0xff, 0x2d, 0x2c, 0x04, 0x0f, 0x0e, 0x0a, 0x01, 0x27];

const RECORD_SIZE: usize = 40;
const NAME_OFFSET: usize = 0x00;
const NAME_FIELD: usize = 16;
const PASSWORD_OFFSET: usize = 0x10;
const PASSWORD_FIELD: usize = 8;
const MIN_SIZE_OFFSET: usize = 0x18;
const ALLOC_SIZE_OFFSET: usize = 0x1c;
const FLAGS_OFFSET: usize = 0x20;
const FILE_SPACE_OFFSET: usize = 0x25;

/// Attributes of one file slot on the device.
#[derive(Clone, PartialEq, Eq)]
pub struct FileAttributes {
    raw: [u8; RECORD_SIZE],
}

impl FileAttributes {
    pub const SIZE: usize = RECORD_SIZE;
    pub const NAME_MAX: usize = 15;
    pub const PASSWORD_MAX: usize = 6;

    pub const FLAG_UNKNOWN0: u32 = 0x01;
    /// File is the applet's currently active file.
    pub const FLAG_CURRENT: u32 = 0x02;
    pub const FLAG_UNKNOWN1: u32 = 0x04;

    /// Attributes for a new file: "filename", 512 bytes, unbound.
    pub fn new() -> Self {
        let mut attr = Self {
            raw: [0; Self::SIZE],
        };
        attr.set_file_name("filename");
        attr.set_password("password");
        attr.set_min_size(512);
        attr.set_alloc_size(512);
        attr.set_flags(0);
        attr.set_file_space(0);
        attr
    }

    /// Copy attributes out of a record read from the device.
    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        let raw: [u8; Self::SIZE] = data
            .get(..Self::SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            })?;
        Ok(Self { raw })
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.raw
    }

    pub fn file_name(&self) -> String {
        c_string(&self.raw[NAME_OFFSET..NAME_OFFSET + NAME_FIELD])
    }

    /// Store a filename, truncating to 15 characters. Returns false if the
    /// name had to be altered.
    pub fn set_file_name(&mut self, name: &str) -> bool {
        self.set_text(NAME_OFFSET, NAME_FIELD, Self::NAME_MAX, name)
    }

    pub fn password(&self) -> String {
        c_string(&self.raw[PASSWORD_OFFSET..PASSWORD_OFFSET + PASSWORD_FIELD])
    }

    /// Store a password, truncating to 6 characters. Returns false if the
    /// password had to be altered.
    pub fn set_password(&mut self, password: &str) -> bool {
        self.set_text(PASSWORD_OFFSET, PASSWORD_FIELD, Self::PASSWORD_MAX, password)
    }

    pub fn min_size(&self) -> u32 {
        BigEndian::read_u32(&self.raw[MIN_SIZE_OFFSET..])
    }

    pub fn set_min_size(&mut self, size: u32) {
        BigEndian::write_u32(&mut self.raw[MIN_SIZE_OFFSET..], size);
    }

    pub fn alloc_size(&self) -> u32 {
        BigEndian::read_u32(&self.raw[ALLOC_SIZE_OFFSET..])
    }

    pub fn set_alloc_size(&mut self, size: u32) {
        BigEndian::write_u32(&mut self.raw[ALLOC_SIZE_OFFSET..], size);
    }

    pub fn flags(&self) -> u32 {
        BigEndian::read_u32(&self.raw[FLAGS_OFFSET..])
    }

    pub fn set_flags(&mut self, flags: u32) {
        BigEndian::write_u32(&mut self.raw[FLAGS_OFFSET..], flags);
    }

    pub fn is_current(&self) -> bool {
        self.flags() & Self::FLAG_CURRENT != 0
    }

    /// File space number: 0 for unbound, 1 to 8 for the keyboard file keys.
    /// An unrecognised code is reported and treated as unbound.
    pub fn file_space(&self) -> u8 {
        let code = self.raw[FILE_SPACE_OFFSET];
        match FILE_SPACE_CODES.iter().position(|&c| c == code) {
            Some(space) => space as u8,
            None => {
                tracing::warn!(code = %format!("0x{:02x}", code), attributes = ?self, "Unrecognised file space code");
                0
            }
        }
    }

    /// Bind to a file space; anything above 8 becomes unbound.
    pub fn set_file_space(&mut self, space: u8) {
        let space = if space > 8 { 0 } else { space as usize };
        self.raw[FILE_SPACE_OFFSET] = FILE_SPACE_CODES[space];
    }

    /// True if the record can safely be written to a device.
    pub fn is_writable(&self) -> bool {
        self.raw[NAME_OFFSET] != 0 && self.raw[PASSWORD_OFFSET] != 0
    }

    fn set_text(&mut self, offset: usize, field: usize, max: usize, text: &str) -> bool {
        let mut exact = true;
        let bytes: Vec<u8> = text
            .chars()
            .map(|c| {
                u8::try_from(c as u32).unwrap_or_else(|_| {
                    exact = false;
                    b'?'
                })
            })
            .collect();
        let len = if bytes.len() > max {
            exact = false;
            max
        } else {
            bytes.len()
        };

        self.raw[offset..offset + field].fill(0);
        self.raw[offset..offset + len].copy_from_slice(&bytes[..len]);
        exact
    }
}

impl Default for FileAttributes {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16}  {:<8}   {:08x} {:08x} [",
            self.file_name(),
            self.password(),
            self.min_size(),
            self.alloc_size()
        )?;
        for pair in self.raw[FLAGS_OFFSET..].chunks(2) {
            write!(f, " {:02x}{:02x}", pair[0], pair[1])?;
        }
        write!(f, " ]")
    }
}
