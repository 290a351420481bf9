//! Generic file passthrough, exported as a small XML document of hex bytes.
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <appletID>0xa000</appletID>
//! <appletVersionMajor>3</appletVersionMajor>
//! <appletVersionMinor>4</appletVersionMinor>
//! <data>
//!   000102...
//! </data>
//! ```

use std::fmt::Write;

use tracing::warn;

use super::{AppletInfo, FileError, NeoFile};

const BYTES_PER_LINE: usize = 32;

const TAG_APPLET_ID: &str = "appletID";
const TAG_VERSION_MAJOR: &str = "appletVersionMajor";
const TAG_VERSION_MINOR: &str = "appletVersionMinor";
const TAG_DATA: &str = "data";

#[derive(Debug, Clone, Default)]
pub struct GenericFile {
    data: Vec<u8>,
    applet: Option<AppletInfo>,
}

impl GenericFile {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_c_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}

/// Text between the first `<key>` and the following `</key>`, trimmed.
fn extract_tag<'a>(input: &'a str, key: &str) -> Option<&'a str> {
    let open = format!("<{}>", key);
    let close = format!("</{}>", key);
    let start = input.find(&open)? + open.len();
    let rest = input[start..].trim_start_matches(is_c_space);
    let end = rest.find(&close)?;
    Some(rest[..end].trim_end_matches(is_c_space))
}

/// Parse a leading integer the way `%i` does: optional sign, then `0x` hex,
/// `0` octal or decimal. Trailing text is ignored.
fn parse_c_int(text: &str) -> Option<i64> {
    let text = text.trim_start_matches(is_c_space);
    let (negative, text) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if hex.starts_with(|c: char| c.is_ascii_hexdigit()) {
            (16, hex)
        } else {
            // "0x" with no digits scans as the number zero
            (8, "0")
        }
    } else if text.starts_with('0') {
        (8, text)
    } else {
        (10, text)
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some(if negative { -value } else { value })
}

fn read_int(input: &str, key: &'static str) -> Result<i64, FileError> {
    extract_tag(input, key)
        .and_then(parse_c_int)
        .ok_or(FileError::MissingTag(key))
}

fn read_data(input: &str) -> Result<Vec<u8>, FileError> {
    let open = format!("<{}>", TAG_DATA);
    let close = format!("</{}>", TAG_DATA);
    let start = input
        .find(&open)
        .map(|p| p + open.len())
        .ok_or(FileError::MissingTag(TAG_DATA))?;
    let end = input[start..]
        .find(&close)
        .map(|p| p + start)
        .ok_or(FileError::MissingTag(TAG_DATA))?;

    let mut data = Vec::with_capacity((end - start) / 2);
    let mut high: Option<u8> = None;
    for c in input[start..end].chars() {
        if is_c_space(c) {
            continue;
        }
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| FileError::InvalidData(format!("unexpected character {:?} in data", c)))?
            as u8;
        match high.take() {
            Some(h) => data.push((h << 4) | nibble),
            None => high = Some(nibble),
        }
    }
    if high.is_some() {
        return Err(FileError::InvalidData("odd number of hex digits in data".into()));
    }
    Ok(data)
}

impl NeoFile for GenericFile {
    fn data(&self) -> &[u8] {
        &self.data
    }

    /// Any content is accepted.
    fn load(&mut self, data: Vec<u8>) -> Result<(), FileError> {
        self.data = data;
        Ok(())
    }

    fn import_text(&mut self, text: &str) -> Result<(), FileError> {
        // Reduce to Latin-1; the document itself is plain ASCII
        let input: String = text
            .encode_utf16()
            .map(|u| match u {
                1..=255 => char::from(u as u8),
                _ => '?',
            })
            .collect();

        if let Some(info) = self.applet {
            let applet_id = read_int(&input, TAG_APPLET_ID)?;
            let major = read_int(&input, TAG_VERSION_MAJOR)?;
            let minor = read_int(&input, TAG_VERSION_MINOR)?;
            if applet_id != i64::from(info.applet_id.raw()) || major != i64::from(info.version_major) {
                warn!(
                    want = %info,
                    got = %format!("0x{:04x} v{}.{}", applet_id, major, minor),
                    "Backup belongs to another applet"
                );
                return Err(FileError::AppletMismatch {
                    expected: info.applet_id,
                    expected_major: info.version_major,
                    actual: applet_id,
                    actual_major: major,
                });
            }
        }

        self.data = read_data(&input)?;
        Ok(())
    }

    fn export_text(&self, bom: bool) -> Result<String, FileError> {
        let mut out = String::with_capacity(1024 + self.data.len() * 2 + self.data.len() / 10);
        if bom {
            out.push('\u{feff}');
        }
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        if let Some(info) = self.applet {
            let _ = writeln!(out, "<{0}>0x{1:04x}</{0}>", TAG_APPLET_ID, info.applet_id.raw());
            let _ = writeln!(out, "<{0}>{1}</{0}>", TAG_VERSION_MAJOR, info.version_major);
            let _ = writeln!(out, "<{0}>{1}</{0}>", TAG_VERSION_MINOR, info.version_minor);
        }

        out.push_str("<data>");
        for line in self.data.chunks(BYTES_PER_LINE) {
            out.push_str("\n  ");
            for byte in line {
                let _ = write!(out, "{:02x}", byte);
            }
        }
        out.push_str("\n</data>");
        Ok(out)
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
    use crate::applet::AppletId;

    fn alphaword_info() -> AppletInfo {
        AppletInfo {
            applet_id: AppletId::ALPHAWORD,
            version_major: 3,
            version_minor: 4,
        }
    }

    #[test]
    fn test_export_layout() {
        let mut file = GenericFile::new();
        file.set_applet_info(alphaword_info());
        file.load((0u8..40).collect()).unwrap();

        let text = file.export_text(false).unwrap();
        let expected = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <appletID>0xa000</appletID>\n\
             <appletVersionMajor>3</appletVersionMajor>\n\
             <appletVersionMinor>4</appletVersionMinor>\n\
             <data>\n  {}\n  {}\n</data>",
            (0u8..32).map(|b| format!("{:02x}", b)).collect::<String>(),
            (32u8..40).map(|b| format!("{:02x}", b)).collect::<String>(),
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_import_matching_applet() {
        let mut source = GenericFile::new();
        source.set_applet_info(alphaword_info());
        source.load(b"\x00\xffNeo".to_vec()).unwrap();
        let text = source.export_text(true).unwrap();

        let mut target = GenericFile::new();
        target.set_applet_info(AppletInfo {
            version_minor: 9,
            ..alphaword_info()
        });
        target.import_text(&text).unwrap();
        assert_eq!(target.data(), b"\x00\xffNeo");
    }

    #[test]
    fn test_import_rejects_other_applet() {
        let mut target = GenericFile::new();
        target.set_applet_info(alphaword_info());
        target.load(vec![1, 2, 3]).unwrap();

        let text = "<appletID>0xa005</appletID><appletVersionMajor>3</appletVersionMajor>\
                    <appletVersionMinor>4</appletVersionMinor><data>00</data>";
        assert!(matches!(
            target.import_text(text),
            Err(FileError::AppletMismatch { actual: 0xa005, .. })
        ));
        assert_eq!(target.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_import_requires_all_tags() {
        let mut target = GenericFile::new();
        target.set_applet_info(alphaword_info());
        let text = "<appletID>40960</appletID><appletVersionMajor>3</appletVersionMajor><data>00</data>";
        assert!(matches!(
            target.import_text(text),
            Err(FileError::MissingTag("appletVersionMinor"))
        ));
    }

    #[test]
    fn test_import_without_applet_info() {
        let mut target = GenericFile::new();
        target.import_text("<data>\n  0A 0b\n\t0C\n</data>").unwrap();
        assert_eq!(target.data(), &[0x0a, 0x0b, 0x0c]);
    }

    #[test]
    fn test_import_rejects_bad_hex() {
        let mut target = GenericFile::new();
        assert!(matches!(
            target.import_text("<data>0g</data>"),
            Err(FileError::InvalidData(_))
        ));
        assert!(matches!(
            target.import_text("<data>abc</data>"),
            Err(FileError::InvalidData(_))
        ));
        assert!(matches!(target.import_text("<data>00"), Err(FileError::MissingTag("data"))));
    }

    #[test]
    fn test_c_int_forms() {
        assert_eq!(parse_c_int("0xa000"), Some(0xa000));
        assert_eq!(parse_c_int("40960"), Some(40960));
        assert_eq!(parse_c_int("010"), Some(8));
        assert_eq!(parse_c_int("-3 trailing"), Some(-3));
        assert_eq!(parse_c_int("0"), Some(0));
        assert_eq!(parse_c_int("x"), None);
    }

    #[test]
    fn test_extract_tag_trims() {
        assert_eq!(extract_tag("<a>\n  12 \n</a>", "a"), Some("12"));
        assert_eq!(extract_tag("<a>1</a><a>2</a>", "a"), Some("1"));
        assert_eq!(extract_tag("<a>1", "a"), None);
    }
}
