//! File objects: typed views over the contents of one device file slot.
//!
//! Each file type owns its byte image and knows how to translate it to and
//! from text. The helpers at the bottom move an image between a file object
//! and a device session.

pub mod alphaword;
pub mod charset;
pub mod dictionary;
pub mod generic;

pub use alphaword::AlphaWordFile;
pub use dictionary::UserDictionaryFile;
pub use generic::GenericFile;

use std::fmt;

use thiserror::Error;
use tracing::{info, instrument};

use crate::applet::{AppletHeader, AppletId};
use crate::events::NeoObserver;
use crate::session::{NeoSession, SessionError};
use crate::transport::NeoTransport;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File too large: {size} bytes (limit {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid file data: {0}")]
    InvalidData(String),

    #[error("Missing <{0}> tag")]
    MissingTag(&'static str),

    #[error("Applet mismatch: want {expected} version {expected_major}, got {actual:#06x} version {actual_major}")]
    AppletMismatch {
        expected: AppletId,
        expected_major: u8,
        actual: i64,
        actual_major: i64,
    },

    #[error("Dictionary full")]
    DictionaryFull,

    #[error("Word length {0} outside 2..=20")]
    WordLength(usize),

    #[error("Partial load of {max} bytes needs at least {minimum}")]
    PartialLoad { max: usize, minimum: usize },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Applet a file belongs to, used to check that imported text matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppletInfo {
    pub applet_id: AppletId,
    pub version_major: u8,
    pub version_minor: u8,
}

impl From<&AppletHeader> for AppletInfo {
    fn from(header: &AppletHeader) -> Self {
        Self {
            applet_id: header.applet_id,
            version_major: header.version_major,
            version_minor: header.version_minor,
        }
    }
}

impl fmt::Display for AppletInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}.{}",
            self.applet_id, self.version_major, self.version_minor
        )
    }
}

/// A device file held in memory.
pub trait NeoFile {
    /// The raw file image.
    fn data(&self) -> &[u8];

    /// Replace the image with `data` if it is valid for this file type.
    /// The current image is kept when validation fails.
    fn load(&mut self, data: Vec<u8>) -> Result<(), FileError>;

    /// Replace the image with a translation of `text`.
    fn import_text(&mut self, text: &str) -> Result<(), FileError>;

    /// Translate the image to text, optionally with a leading BOM.
    fn export_text(&self, bom: bool) -> Result<String, FileError>;

    fn applet_info(&self) -> Option<AppletInfo>;

    fn set_applet_info(&mut self, info: AppletInfo);

    /// Smallest prefix of the file that can be parsed, or 0 if the file
    /// must always be read whole.
    fn minimum_load_size(&self) -> usize {
        0
    }

    fn file_size(&self) -> usize {
        self.data().len()
    }
}

/// Read a file slot into `file`. `max_bytes` of `Some(n)` reads at most `n`
/// bytes for a preview.
#[instrument(level = "debug", skip(file, session), fields(applet = %applet))]
pub fn load_from_device<F, T, O>(
    file: &mut F,
    session: &mut NeoSession<T, O>,
    applet: AppletId,
    index: u8,
    max_bytes: Option<usize>,
) -> Result<(), FileError>
where
    F: NeoFile + ?Sized,
    T: NeoTransport,
    O: NeoObserver,
{
    if let Some(max) = max_bytes
        && file.minimum_load_size() > max
    {
        return Err(FileError::PartialLoad {
            max,
            minimum: file.minimum_load_size(),
        });
    }

    let attributes = session.file_attributes(applet, index)?;
    let mut size = attributes.alloc_size() as usize;
    if let Some(max) = max_bytes {
        size = size.min(max);
    }

    let data = session.read_file(applet, index, true, size)?;
    info!(index, bytes = data.len(), "Loaded file");
    file.load(data)
}

/// Write `file` over an existing slot.
pub fn save_to_device<F, T, O>(
    file: &F,
    session: &mut NeoSession<T, O>,
    applet: AppletId,
    index: u8,
) -> Result<(), FileError>
where
    F: NeoFile + ?Sized,
    T: NeoTransport,
    O: NeoObserver,
{
    session.write_file(applet, index, true, file.data())?;
    Ok(())
}

/// Write `file` to the slot called `name`, creating it if needed. Returns
/// the slot index.
#[instrument(level = "debug", skip(file, session), fields(applet = %applet))]
pub fn save_to_device_named<F, T, O>(
    file: &F,
    session: &mut NeoSession<T, O>,
    applet: AppletId,
    name: &str,
    password: &str,
) -> Result<u8, FileError>
where
    F: NeoFile + ?Sized,
    T: NeoTransport,
    O: NeoObserver,
{
    match session.find_file(applet, name)? {
        Some(index) => {
            session.write_file(applet, index, true, file.data())?;
            Ok(index)
        }
        None => Ok(session.create_file(applet, name, password, file.data(), true)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::FileAttributes;
    use crate::events::NullObserver;
    use crate::protocol::Message;
    use crate::protocol::constants::*;
    use crate::session::SessionConfig;
    use crate::transport::MockTransport;
    use std::sync::Arc;

    fn session(mock: &MockTransport) -> NeoSession<MockTransport, NullObserver> {
        let config = SessionConfig {
            hello_retry_delay_ms: 0,
            ..Default::default()
        };
        NeoSession::with_observer(mock.clone(), config, Arc::new(NullObserver))
    }

    #[test]
    fn test_load_alphaword_from_device() {
        let mock = MockTransport::new();
        let mut attributes = FileAttributes::new();
        attributes.set_alloc_size(5);

        mock.queue_dialogue_start();
        mock.queue_sized_reply(RESPONSE_GET_FILE_ATTRIBUTES, attributes.as_bytes());
        mock.queue_dialogue_start();
        mock.queue_message(Message::new(RESPONSE_READ_FILE));
        mock.queue_sized_reply(RESPONSE_BLOCK_READ, b"hello");

        let mut file = AlphaWordFile::new();
        let mut session = session(&mock);
        load_from_device(&mut file, &mut session, AppletId::ALPHAWORD, 1, None).unwrap();

        assert_eq!(file.data(), b"hello");
        assert_eq!(file.export_text(false).unwrap(), "hello");
    }

    #[test]
    fn test_preview_load_caps_read_size() {
        let mock = MockTransport::new();
        let mut attributes = FileAttributes::new();
        attributes.set_alloc_size(4096);

        mock.queue_dialogue_start();
        mock.queue_sized_reply(RESPONSE_GET_FILE_ATTRIBUTES, attributes.as_bytes());
        mock.queue_dialogue_start();
        mock.queue_message(Message::new(RESPONSE_READ_FILE));
        mock.queue_sized_reply(RESPONSE_BLOCK_READ, &[0xab; 16]);

        let mut file = GenericFile::new();
        let mut session = session(&mock);
        load_from_device(&mut file, &mut session, AppletId::ALPHAWORD, 2, Some(16)).unwrap();
        assert_eq!(file.file_size(), 16);

        let read = mock
            .get_writes()
            .into_iter()
            .find(|w| w.len() == 8 && w[0] == REQUEST_READ_RAW_FILE)
            .unwrap();
        let read = Message::from_bytes(read.try_into().unwrap());
        assert_eq!(read.argument(1, 3), 16);
        assert_eq!(read.argument(4, 1), 2);
    }
}
