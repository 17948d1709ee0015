//! In-memory access to the zip container of an EPUB.

use crate::error::{FolioError, Result};
use regex::Regex;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// How an entry lookup matches archive paths.
#[derive(Debug, Clone)]
pub enum EntryPattern {
    /// Exact archive path, e.g. `OPS/toc.ncx`.
    Exact(String),
    /// Path suffix, ASCII case-insensitive, e.g. `toc.ncx`.
    Suffix(String),
    /// Regular expression tested against the full path.
    Regex(Regex),
}

impl EntryPattern {
    pub fn suffix(s: impl Into<String>) -> Self {
        EntryPattern::Suffix(s.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(EntryPattern::Regex(Regex::new(pattern)?))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            EntryPattern::Exact(p) => p == path,
            EntryPattern::Suffix(s) => {
                path.len() >= s.len()
                    && path.is_char_boundary(path.len() - s.len())
                    && path[path.len() - s.len()..].eq_ignore_ascii_case(s)
            }
            EntryPattern::Regex(re) => re.is_match(path),
        }
    }
}

/// An opened EPUB container.
///
/// Reads go through `&mut self`, so callers naturally serialize them.
pub struct ArchiveHandle {
    zip: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<String>,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ArchiveHandle {
    /// Open a zip container from a byte buffer.
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        let zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| FolioError::CorruptArchive(e.to_string()))?;
        let entries = (0..zip.len())
            .filter_map(|i| zip.name_for_index(i).map(|s| s.to_string()))
            .filter(|name| !name.ends_with('/'))
            .collect();
        Ok(Self { zip, entries })
    }

    /// Entry paths in archive-listing order (directories excluded).
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e == name)
    }

    /// First entry matching `pattern`, in listing order.
    pub fn find_entry(&self, pattern: &EntryPattern) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| pattern.matches(e))
            .map(String::as_str)
    }

    /// Every entry matching `pattern`, in listing order.
    pub fn find_entries(&self, pattern: &EntryPattern) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| pattern.matches(e))
            .map(String::as_str)
            .collect()
    }

    /// Entry whose full path equals `name` ignoring ASCII case.
    pub fn find_ignore_case(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    pub fn read_binary(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut entry = self.zip.by_name(name)?;
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read an entry as text. Invalid UTF-8 is replaced rather than rejected;
    /// a leading byte-order mark is dropped.
    pub fn read_text(&mut self, name: &str) -> Result<String> {
        let bytes = self.read_binary(name)?;
        let text = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("{name} is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Ok(match text.strip_prefix('\u{feff}') {
            Some(rest) => rest.to_string(),
            None => text,
        })
    }
}
