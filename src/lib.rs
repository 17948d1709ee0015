//! Reading core for EPUB books.
//!
//! A book is opened from raw bytes into an [`reader::OpenBook`]: the zip
//! archive, its navigation tree, embedded stylesheets and images, and the
//! groups of chapters whose content is identical. The
//! [`reader::ReaderController`] then loads chapters on demand, tags the
//! elements that look like chapter headings, and splits each chapter into
//! two-column pages of bounded height.
//!
//! ```no_run
//! use folio::config::ReaderConfig;
//! use folio::reader::ReaderController;
//!
//! # fn main() -> folio::error::Result<()> {
//! let mut reader = ReaderController::new(ReaderConfig::default());
//! reader.open_book(std::fs::read("book.epub")?)?;
//! let position = reader.start()?;
//! println!("{} ({}/{})", position.label, position.page + 1, position.page_count);
//! # Ok(())
//! # }
//! ```

pub mod chapter;
pub mod config;
pub mod epub;
pub mod error;
pub mod markup;
pub mod paginate;
pub mod reader;

pub use error::{FolioError, Result};
