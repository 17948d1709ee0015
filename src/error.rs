use thiserror::Error;

#[derive(Error, Debug)]
pub enum FolioError {
    #[error("cannot open book: {0}")]
    CorruptArchive(String),

    #[error("navigation document not found or unreadable: {0}")]
    NavigationMissing(String),

    #[error("chapter not found: {href}")]
    ChapterNotFound { href: String },

    #[error("chapter {href} could not be parsed: {reason}")]
    ChapterParse { href: String, reason: String },

    #[error("book not found: {0}")]
    BookNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl FolioError {
    /// Book-level failures end the open operation; everything else is local
    /// to a single chapter and leaves the reader usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FolioError::CorruptArchive(_) | FolioError::NavigationMissing(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FolioError>;
