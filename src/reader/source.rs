//! Where book bytes come from.

use crate::error::{FolioError, Result};
use std::path::{Component, Path, PathBuf};

/// Supplies the raw bytes of an EPUB by identifier. How the bytes are stored
/// or transferred is up to the implementation.
pub trait BookSource {
    fn fetch_book_bytes(&self, id: &str) -> Result<Vec<u8>>;
}

/// Books stored as files in one directory, identified by file name with or
/// without the `.epub` extension.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File names of the `.epub` files in the directory, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.to_ascii_lowercase().ends_with(".epub") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn locate(&self, id: &str) -> Result<PathBuf> {
        let plain = Path::new(id)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if id.is_empty() || !plain {
            return Err(FolioError::BookNotFound(id.to_string()));
        }
        [self.root.join(id), self.root.join(format!("{id}.epub"))]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| FolioError::BookNotFound(id.to_string()))
    }
}

impl BookSource for DirectorySource {
    fn fetch_book_bytes(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.locate(id)?;
        log::debug!("reading book {id} from {}", path.display());
        Ok(std::fs::read(path)?)
    }
}
