//! AlphaWord user dictionary.
//!
//! The file starts with 19 big-endian u16 offsets, one per word length from
//! 2 to 20, each giving the start of the words of that length. Words are
//! stored without separators, sorted within each length, and the regions
//! run back to back up to the end of the file.

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, warn};

use super::charset::{self, BOM, NeoCode, neo_to_unicode};
use super::{AppletInfo, FileError, NeoFile};

pub const MIN_WORD_LENGTH: usize = 2;
pub const MAX_WORD_LENGTH: usize = 20;
/// Size of the offset table, and of an empty dictionary.
pub const MIN_FILE_SIZE: usize = (MAX_WORD_LENGTH - MIN_WORD_LENGTH + 1) * 2;
pub const MAX_FILE_SIZE: usize = 64 * 1024;

/// Slot holding the end of all word data.
const END: usize = MAX_WORD_LENGTH + 1;

#[derive(Debug, Clone)]
pub struct UserDictionaryFile {
    data: Vec<u8>,
    /// `offsets[n]..offsets[n + 1]` holds the words of length `n`.
    offsets: [usize; MAX_WORD_LENGTH + 2],
    applet: Option<AppletInfo>,
}

impl UserDictionaryFile {
    /// An empty dictionary.
    pub fn new() -> Self {
        let mut dictionary = Self {
            data: Vec::new(),
            offsets: [0; MAX_WORD_LENGTH + 2],
            applet: None,
        };
        dictionary.remove_all_words();
        dictionary
    }

    pub fn word_count(&self) -> usize {
        (MIN_WORD_LENGTH..=MAX_WORD_LENGTH)
            .map(|len| (self.offsets[len + 1] - self.offsets[len]) / len)
            .sum()
    }

    pub fn contains_word(&self, word: &str) -> bool {
        self.locate(&Self::neo_word(word)).is_some()
    }

    /// Word number `index`, counting shortest words first.
    pub fn word_at(&self, index: usize) -> Option<String> {
        self.word_bytes().nth(index).map(|w| charset::decode(w, false))
    }

    /// All words, shortest first and sorted within each length.
    pub fn words(&self) -> impl Iterator<Item = String> + '_ {
        self.word_bytes().map(|w| charset::decode(w, false))
    }

    /// Add a word. Adding a word that is already present succeeds.
    pub fn add_word(&mut self, word: &str) -> Result<(), FileError> {
        self.add_neo_word(&Self::neo_word(word))
    }

    /// Remove a word, returning whether it was present.
    pub fn remove_word(&mut self, word: &str) -> bool {
        let word = Self::neo_word(word);
        let Some(position) = self.locate(&word) else {
            return false;
        };
        let len = word.len();
        self.data.drain(position..position + len);
        for offset in &mut self.offsets[len + 1..] {
            *offset -= len;
        }
        self.save_offsets();
        true
    }

    pub fn remove_all_words(&mut self) {
        self.data = vec![0; MIN_FILE_SIZE];
        self.offsets = [0; MAX_WORD_LENGTH + 2];
        self.offsets[MIN_WORD_LENGTH..=END].fill(MIN_FILE_SIZE);
        self.save_offsets();
    }

    /// Words are compared as Neo bytes; anything after an untranslatable
    /// character is dropped.
    fn neo_word(word: &str) -> Vec<u8> {
        let mut bytes = charset::encode(word, false);
        if let Some(end) = bytes.iter().position(|&b| b == charset::UNTRANSLATABLE) {
            bytes.truncate(end);
        }
        bytes
    }

    fn region(&self, len: usize) -> &[u8] {
        &self.data[self.offsets[len]..self.offsets[len + 1]]
    }

    fn word_bytes(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (MIN_WORD_LENGTH..=MAX_WORD_LENGTH).flat_map(move |len| self.region(len).chunks_exact(len))
    }

    fn locate(&self, word: &[u8]) -> Option<usize> {
        let len = word.len();
        if !(MIN_WORD_LENGTH..=MAX_WORD_LENGTH).contains(&len) {
            return None;
        }
        self.region(len)
            .chunks_exact(len)
            .position(|w| w == word)
            .map(|i| self.offsets[len] + i * len)
    }

    fn add_neo_word(&mut self, word: &[u8]) -> Result<(), FileError> {
        let len = word.len();
        if !(MIN_WORD_LENGTH..=MAX_WORD_LENGTH).contains(&len) {
            return Err(FileError::WordLength(len));
        }

        let mut position = self.offsets[len + 1];
        for (i, existing) in self.region(len).chunks_exact(len).enumerate() {
            match existing.cmp(word) {
                std::cmp::Ordering::Equal => return Ok(()),
                std::cmp::Ordering::Greater => {
                    position = self.offsets[len] + i * len;
                    break;
                }
                std::cmp::Ordering::Less => {}
            }
        }

        // The last stored offset must still fit in a u16
        let last_stored = self.offsets[MAX_WORD_LENGTH] + if len < MAX_WORD_LENGTH { len } else { 0 };
        if self.data.len() + len > MAX_FILE_SIZE || last_stored > u16::MAX as usize {
            return Err(FileError::DictionaryFull);
        }

        self.data.splice(position..position, word.iter().copied());
        for offset in &mut self.offsets[len + 1..] {
            *offset += len;
        }
        self.save_offsets();
        Ok(())
    }

    fn save_offsets(&mut self) {
        for len in MIN_WORD_LENGTH..=MAX_WORD_LENGTH {
            let at = (len - MIN_WORD_LENGTH) * 2;
            BigEndian::write_u16(&mut self.data[at..at + 2], self.offsets[len] as u16);
        }
    }

    fn parse_offsets(data: &[u8]) -> Result<[usize; MAX_WORD_LENGTH + 2], FileError> {
        if data.len() < MIN_FILE_SIZE || data.len() > MAX_FILE_SIZE {
            return Err(FileError::InvalidData(format!(
                "dictionary size {} outside {}..={}",
                data.len(),
                MIN_FILE_SIZE,
                MAX_FILE_SIZE
            )));
        }

        let mut offsets = [0; MAX_WORD_LENGTH + 2];
        offsets[END] = data.len();
        for len in MIN_WORD_LENGTH..=MAX_WORD_LENGTH {
            let at = (len - MIN_WORD_LENGTH) * 2;
            offsets[len] = BigEndian::read_u16(&data[at..at + 2]) as usize;
        }

        if offsets[MIN_WORD_LENGTH] < MIN_FILE_SIZE {
            return Err(FileError::InvalidData(format!(
                "word data starts at {} inside the offset table",
                offsets[MIN_WORD_LENGTH]
            )));
        }
        for len in MIN_WORD_LENGTH..=MAX_WORD_LENGTH {
            let (start, end) = (offsets[len], offsets[len + 1]);
            if start > end || end > data.len() {
                return Err(FileError::InvalidData(format!(
                    "bad region for length {}: {}..{}",
                    len, start, end
                )));
            }
            if (end - start) % len != 0 {
                return Err(FileError::InvalidData(format!(
                    "region for length {} holds a partial word",
                    len
                )));
            }
        }
        Ok(offsets)
    }
}

impl Default for UserDictionaryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl NeoFile for UserDictionaryFile {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn load(&mut self, data: Vec<u8>) -> Result<(), FileError> {
        let offsets = Self::parse_offsets(&data).inspect_err(|e| warn!(error = %e, "Rejected dictionary"))?;
        self.data = data;
        self.offsets = offsets;
        Ok(())
    }

    /// Replace the contents with the words in `text`. Words are split on ASCII
    /// whitespace and punctuation; words of unusable length are skipped.
    fn import_text(&mut self, text: &str) -> Result<(), FileError> {
        self.remove_all_words();

        let bytes = charset::encode(text, true);
        let separator = |b: &u8| b.is_ascii_whitespace() || *b == 0x0b || b.is_ascii_punctuation();
        for token in bytes.split(separator).filter(|t| !t.is_empty()) {
            let word = match token.iter().position(|&b| b == charset::UNTRANSLATABLE) {
                Some(end) => &token[..end],
                None => token,
            };
            if let Err(e) = self.add_neo_word(word) {
                debug!(error = %e, "Skipped word");
            }
        }
        Ok(())
    }

    fn export_text(&self, bom: bool) -> Result<String, FileError> {
        if self.word_count() == 0 {
            return Ok(String::new());
        }

        let mut units: Vec<u16> = Vec::new();
        if bom {
            units.push(BOM);
        }
        for (i, word) in self.word_bytes().enumerate() {
            if i > 0 {
                units.push(u16::from(b' '));
            }
            units.extend(word.iter().map(|&b| neo_to_unicode(NeoCode::Byte(b))));
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

    #[test]
    fn test_empty_dictionary() {
        let dictionary = UserDictionaryFile::new();
        assert_eq!(dictionary.file_size(), MIN_FILE_SIZE);
        assert_eq!(dictionary.word_count(), 0);
        for pair in dictionary.data().chunks(2) {
            assert_eq!(pair, &[0x00, 0x26]);
        }
        assert_eq!(dictionary.export_text(true).unwrap(), "");
    }

    #[test]
    fn test_add_contains_remove() {
        let mut dictionary = UserDictionaryFile::new();
        dictionary.add_word("hello").unwrap();
        dictionary.add_word("hello").unwrap();
        assert_eq!(dictionary.word_count(), 1);
        assert!(dictionary.contains_word("hello"));
        assert_eq!(dictionary.file_size(), MIN_FILE_SIZE + 5);

        assert!(dictionary.remove_word("hello"));
        assert!(!dictionary.remove_word("hello"));
        assert!(!dictionary.contains_word("hello"));
        assert_eq!(dictionary.file_size(), MIN_FILE_SIZE);
    }

    #[test]
    fn test_words_sorted_by_length_then_bytes() {
        let mut dictionary = UserDictionaryFile::new();
        for word in ["pear", "fig", "apple", "kiwi", "ox"] {
            dictionary.add_word(word).unwrap();
        }
        let words: Vec<String> = dictionary.words().collect();
        assert_eq!(words, ["ox", "fig", "kiwi", "pear", "apple"]);
        assert_eq!(dictionary.word_at(2).as_deref(), Some("kiwi"));
        assert_eq!(dictionary.word_at(5), None);

        // Length-4 region starts after "ox" and "fig"
        assert_eq!(&dictionary.data()[4..6], &[0x00, 0x2b]);
    }

    #[test]
    fn test_word_length_limits() {
        let mut dictionary = UserDictionaryFile::new();
        assert!(matches!(dictionary.add_word("a"), Err(FileError::WordLength(1))));
        assert!(dictionary.add_word(&"z".repeat(20)).is_ok());
        assert!(matches!(
            dictionary.add_word(&"z".repeat(21)),
            Err(FileError::WordLength(21))
        ));
    }

    #[test]
    fn test_dictionary_full() {
        let mut dictionary = UserDictionaryFile::new();
        let mut n = 0u32;
        let result = loop {
            let word = format!("w{:019}", n);
            if let Err(e) = dictionary.add_word(&word) {
                break e;
            }
            n += 1;
        };
        assert!(matches!(result, FileError::DictionaryFull));
        assert!(dictionary.file_size() <= MAX_FILE_SIZE);
        assert_eq!(dictionary.word_count(), n as usize);
    }

    #[test]
    fn test_import_export() {
        let mut dictionary = UserDictionaryFile::new();
        dictionary.add_word("stale").unwrap();
        dictionary
            .import_text("Zebra, apple;\tzebra\nI  banana-split")
            .unwrap();
        assert!(!dictionary.contains_word("stale"));
        assert_eq!(
            dictionary.export_text(false).unwrap(),
            "Zebra apple split zebra banana"
        );
    }

    #[test]
    fn test_load_round_trip() {
        let mut source = UserDictionaryFile::new();
        source.import_text("alpha beta gamma").unwrap();

        let mut loaded = UserDictionaryFile::new();
        loaded.load(source.data().to_vec()).unwrap();
        assert_eq!(loaded.word_count(), 3);
        assert!(loaded.contains_word("gamma"));
    }

    #[test]
    fn test_load_rejects_bad_images() {
        let mut dictionary = UserDictionaryFile::new();
        assert!(dictionary.load(vec![0; 10]).is_err());

        // Offset beyond the end of the data
        let mut image = UserDictionaryFile::new().data().to_vec();
        image[0..2].copy_from_slice(&0x0100u16.to_be_bytes());
        assert!(dictionary.load(image).is_err());

        // Three bytes in the length-2 region
        let mut image = UserDictionaryFile::new().data().to_vec();
        image.extend_from_slice(b"abc");
        for len in 3..=MAX_WORD_LENGTH {
            let at = (len - MIN_WORD_LENGTH) * 2;
            image[at..at + 2].copy_from_slice(&41u16.to_be_bytes());
        }
        assert!(dictionary.load(image).is_err());

        assert_eq!(dictionary.file_size(), MIN_FILE_SIZE);
    }
}
