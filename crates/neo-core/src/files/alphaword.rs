//! AlphaWord documents.
//!
//! An AlphaWord file is a byte array of Neo character codes mixed with
//! layout codes:
//!
//! | Byte | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 09   | tab                                                  |
//! | 0d   | end of paragraph                                     |
//! | 81   | line-breaking space                                  |
//! | 8d   | line-breaking tab                                    |
//! | 8f   | break hint after a run of non-breaking characters    |
//! | a1   | as 81 (older AlphaWord)                              |
//! | a3   | as 8d (older AlphaWord)                              |
//! | a4   | as 8f (older AlphaWord)                              |
//! | a7   | fill byte                                            |
//! | ad   | line-breaking hyphen                                 |
//! | b0   | escape: `b0 xx b0` carries a literal Neo code `xx`   |
//!
//! Codes 09, 0a, 0d and a1 to bf are escaped when they stand for themselves.

use tracing::warn;

use super::charset::{BOM, NeoCode, UNTRANSLATABLE, neo_to_unicode, unicode_to_neo};
use super::{AppletInfo, FileError, NeoFile};

const ESCAPE: u8 = 0xb0;
const FILL: u8 = 0xa7;
const BREAK_HINT: u8 = 0x8f;
const BREAKING_SPACE: u8 = 0x81;
const BREAKING_TAB: u8 = 0x8d;
const BREAKING_HYPHEN: u8 = 0xad;
const PARAGRAPH: u8 = 0x0d;

/// Non-breaking characters between inserted break hints.
const HARD_BREAK_INTERVAL: usize = 24;
/// Characters after which the last breakable character is made breaking.
const SOFT_BREAK_INTERVAL: usize = 40;

/// Default minimum image size.
pub const DEFAULT_MIN_FILE_SIZE: usize = 512;
/// Floor applied by the size setters.
pub const SIZE_FLOOR: usize = 256;

#[derive(Debug, Clone)]
pub struct AlphaWordFile {
    data: Vec<u8>,
    min_file_size: usize,
    max_file_size: usize,
    applet: Option<AppletInfo>,
}

impl AlphaWordFile {
    /// An empty document, padded to the minimum size.
    pub fn new() -> Self {
        Self {
            data: vec![FILL; DEFAULT_MIN_FILE_SIZE],
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            max_file_size: usize::MAX,
            applet: None,
        }
    }

    pub fn min_file_size(&self) -> usize {
        self.min_file_size
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Set the size imported text is padded to. Raises the maximum if needed.
    pub fn set_min_file_size(&mut self, size: usize) {
        let size = size.max(SIZE_FLOOR);
        self.min_file_size = size;
        if size > self.max_file_size {
            self.max_file_size = size;
        }
    }

    /// Set the largest image an import may produce. Lowers the minimum if needed.
    pub fn set_max_file_size(&mut self, size: usize) {
        let size = size.max(SIZE_FLOOR);
        self.max_file_size = size;
        if size < self.min_file_size {
            self.min_file_size = size;
        }
    }

    fn encode(text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() * 2);
        let mut soft_count = 0usize;
        let mut hard_count = 0usize;
        let mut last_breakable: Option<usize> = None;

        for unit in text.encode_utf16() {
            if unit == BOM {
                continue;
            }

            let neo = match unicode_to_neo(unit) {
                // Keep the alternate "not" sign clear of the breaking-space code
                NeoCode::Byte(BREAKING_SPACE) => NeoCode::Byte(0xac),
                other => other,
            };
            let (escape, code) = match neo {
                NeoCode::Byte(c @ (0xa1..=0xbf | 0x09 | 0x0a | 0x0d)) => (true, c),
                NeoCode::Tab => (false, 0x09),
                NeoCode::Newline | NeoCode::Return => (false, PARAGRAPH),
                NeoCode::Byte(c) => (false, c),
                NeoCode::Unknown => (false, UNTRANSLATABLE),
            };

            let is_break = !escape && code == PARAGRAPH;
            let is_breakable = !escape && matches!(code, b'-' | b' ' | 0x09);

            hard_count += 1;
            soft_count += 1;

            if is_break {
                last_breakable = None;
                soft_count = 0;
                hard_count = 0;
            } else if is_breakable {
                last_breakable = Some(out.len());
                hard_count = 0;
            } else if hard_count >= HARD_BREAK_INTERVAL {
                out.push(BREAK_HINT);
                hard_count = 0;
                soft_count = 0;
                last_breakable = None;
            }

            if escape {
                out.extend_from_slice(&[ESCAPE, code, ESCAPE]);
            } else {
                out.push(code);
            }

            if soft_count >= SOFT_BREAK_INTERVAL
                && let Some(pos) = last_breakable.take()
            {
                out[pos] = match out[pos] {
                    b'-' => BREAKING_HYPHEN,
                    b' ' => BREAKING_SPACE,
                    _ => BREAKING_TAB,
                };
                soft_count = 0;
                hard_count = 0;
            }
        }

        out
    }
}

impl Default for AlphaWordFile {
    fn default() -> Self {
        Self::new()
    }
}

impl NeoFile for AlphaWordFile {
    fn data(&self) -> &[u8] {
        &self.data
    }

    /// Any byte sequence is a usable AlphaWord file.
    fn load(&mut self, data: Vec<u8>) -> Result<(), FileError> {
        self.data = data;
        Ok(())
    }

    fn import_text(&mut self, text: &str) -> Result<(), FileError> {
        let mut image = Self::encode(text);
        let total = image.len().max(self.min_file_size);
        if total > self.max_file_size {
            warn!(size = total, max = self.max_file_size, "Import exceeds maximum file size");
            return Err(FileError::TooLarge {
                size: total,
                max: self.max_file_size,
            });
        }
        image.resize(total, FILL);
        self.data = image;
        Ok(())
    }

    fn export_text(&self, bom: bool) -> Result<String, FileError> {
        let data = &self.data;
        let mut units: Vec<u16> = Vec::with_capacity(data.len() + 1);
        if bom {
            units.push(BOM);
        }

        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            i += 1;
            let code = match byte {
                0xa4 | FILL | BREAK_HINT => continue,
                0x09 => NeoCode::Tab,
                0x0a => NeoCode::Newline,
                PARAGRAPH => NeoCode::Return,
                BREAKING_SPACE | 0xa1 => NeoCode::Byte(b' '),
                BREAKING_TAB | 0xa3 => NeoCode::Tab,
                BREAKING_HYPHEN => NeoCode::Byte(b'-'),
                ESCAPE => {
                    if data.len() - i < 2 {
                        warn!(offset = i - 1, "Truncated escape sequence");
                        NeoCode::Byte(ESCAPE)
                    } else {
                        let literal = data[i];
                        i += 1;
                        if data[i] == ESCAPE {
                            i += 1;
                        }
                        NeoCode::Byte(literal)
                    }
                }
                0xa1..=0xbf => {
                    warn!(code = %format!("0x{:02x}", byte), offset = i - 1, "Possible untrapped escape");
                    continue;
                }
                other => NeoCode::Byte(other),
            };
            units.push(neo_to_unicode(code));
        }

        Ok(String::from_utf16_lossy(&units))
    }

    fn applet_info(&self) -> Option<AppletInfo> {
        self.applet
    }

    fn set_applet_info(&mut self, info: AppletInfo) {
        self.applet = Some(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imported(text: &str) -> AlphaWordFile {
        let mut file = AlphaWordFile::new();
        file.import_text(text).unwrap();
        file
    }

    #[test]
    fn test_new_file_is_padding() {
        let file = AlphaWordFile::new();
        assert_eq!(file.file_size(), DEFAULT_MIN_FILE_SIZE);
        assert!(file.data().iter().all(|&b| b == FILL));
        assert_eq!(file.export_text(false).unwrap(), "");
    }

    #[test]
    fn test_printable_ascii_round_trip() {
        let text: String = (0x20u8..0x7f).map(char::from).collect();
        let file = imported(&text);
        assert_eq!(file.file_size(), DEFAULT_MIN_FILE_SIZE);
        assert_eq!(file.export_text(false).unwrap(), text);
    }

    #[test]
    fn test_newline_becomes_paragraph() {
        let file = imported("one\ntwo\r\n");
        assert_eq!(&file.data()[..9], b"one\rtwo\r\r");
        assert_eq!(file.export_text(false).unwrap(), "one\rtwo\r\r");
    }

    #[test]
    fn test_tab_is_plain_code() {
        let file = imported("a\tb");
        assert_eq!(&file.data()[..3], &[b'a', 0x09, b'b']);
        assert_eq!(file.export_text(false).unwrap(), "a\tb");
    }

    #[test]
    fn test_high_codes_are_escaped() {
        // U+00B5 is Neo 0xb5, inside the escaped range
        let file = imported("\u{b5}");
        assert_eq!(&file.data()[..3], &[ESCAPE, 0xb5, ESCAPE]);
        assert_eq!(file.export_text(false).unwrap(), "\u{b5}");
    }

    #[test]
    fn test_not_sign_is_remapped() {
        let file = imported("\u{ac}");
        assert_eq!(&file.data()[..3], &[ESCAPE, 0xac, ESCAPE]);
        assert_eq!(file.export_text(false).unwrap(), "\u{ac}");
    }

    #[test]
    fn test_hard_break_hint() {
        let word = "x".repeat(30);
        let file = imported(&word);
        assert_eq!(file.data()[23], BREAK_HINT);
        assert_eq!(&file.data()[..23], &b"x".repeat(23)[..]);
        assert_eq!(file.export_text(false).unwrap(), word);
    }

    #[test]
    fn test_soft_break_rewrites_last_space() {
        let text = format!("{} {}", "ab".repeat(10), "cd".repeat(10));
        let file = imported(&text);
        assert_eq!(file.data()[20], BREAKING_SPACE);
        assert_eq!(file.export_text(false).unwrap(), text);
    }

    #[test]
    fn test_bom_handling() {
        let file = imported("\u{feff}hi");
        assert_eq!(&file.data()[..2], b"hi");
        assert_eq!(file.export_text(true).unwrap(), "\u{feff}hi");
    }

    #[test]
    fn test_escaped_control_uses_table() {
        let mut file = AlphaWordFile::new();
        file.load(vec![ESCAPE, 0x0d, ESCAPE, b'!']).unwrap();
        assert_eq!(file.export_text(false).unwrap(), "\u{21b5}!");
    }

    #[test]
    fn test_legacy_codes_and_untrapped_escape() {
        let mut file = AlphaWordFile::new();
        file.load(vec![b'a', 0xa1, b'b', 0xa4, 0xa3, 0xb5, b'c']).unwrap();
        assert_eq!(file.export_text(false).unwrap(), "a b\tc");
    }

    #[test]
    fn test_truncated_escape_is_kept() {
        let mut file = AlphaWordFile::new();
        file.load(vec![b'a', ESCAPE, b'b']).unwrap();
        assert_eq!(file.export_text(false).unwrap(), "a\u{b0}b");
    }

    #[test]
    fn test_size_limits() {
        let mut file = AlphaWordFile::new();
        file.set_min_file_size(10);
        assert_eq!(file.min_file_size(), SIZE_FLOOR);

        file.set_max_file_size(300);
        assert!(matches!(
            file.import_text(&"a ".repeat(200)),
            Err(FileError::TooLarge { .. })
        ));
        assert_eq!(file.file_size(), DEFAULT_MIN_FILE_SIZE);

        file.set_min_file_size(1000);
        assert_eq!(file.max_file_size(), 1000);
        file.set_max_file_size(400);
        assert_eq!(file.min_file_size(), 400);
    }
}
