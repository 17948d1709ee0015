//! The reading session: an open book plus the page-turning state machine
//! that drives chapter loading and pagination.

pub mod source;

use crate::chapter::duplicates::{DuplicateGroups, detect_duplicates};
use crate::chapter::{ChapterLoader, LoadedChapter};
use crate::config::ReaderConfig;
use crate::epub::archive::ArchiveHandle;
use crate::epub::navigation::{NavigationDocument, PLACEHOLDER_LABEL, load_navigation};
use crate::epub::resources::{BookResources, ResourceMap, load_resources};
use crate::epub::{Chapter, ancestors_of, flatten_chapters, fragment, parent_dir};
use crate::error::{FolioError, Result};
use crate::paginate::measure::{BlockMeasurer, FontMetricsMeasurer};
use crate::paginate::{Page, PageLayout, Pagination, paginate};
use serde::Serialize;
use source::BookSource;

/// One entry of the flattened chapter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadingItem {
    pub label: String,
    pub href: String,
    pub level: usize,
}

/// Everything derived from one EPUB, built once when the book is opened and
/// read-only afterwards apart from archive reads.
#[derive(Debug)]
pub struct OpenBook {
    archive: ArchiveHandle,
    navigation: NavigationDocument,
    nav_dir: String,
    resources: BookResources,
    duplicates: DuplicateGroups,
    reading_order: Vec<ReadingItem>,
    titles: Vec<String>,
}

impl OpenBook {
    /// Open a book from its bytes: archive, then navigation, then resources,
    /// then duplicate detection.
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = ArchiveHandle::open(bytes)?;
        let navigation = load_navigation(&mut archive)?;
        let nav_dir = parent_dir(&navigation.path).to_string();
        let resources = load_resources(&mut archive);

        let flat = flatten_chapters(&navigation.chapters);
        let duplicates = detect_duplicates(&mut archive, &flat, &nav_dir);
        let reading_order: Vec<ReadingItem> = flat
            .iter()
            .map(|c| ReadingItem {
                label: c.label.clone(),
                href: c.href.clone(),
                level: c.level,
            })
            .collect();
        let mut titles: Vec<String> = Vec::new();
        for item in &reading_order {
            if item.label != PLACEHOLDER_LABEL && !titles.contains(&item.label) {
                titles.push(item.label.clone());
            }
        }

        log::info!(
            "opened book: {} chapters, {} images, {} duplicate groups",
            reading_order.len(),
            resources.images.len(),
            duplicates.len()
        );
        Ok(Self {
            archive,
            navigation,
            nav_dir,
            resources,
            duplicates,
            reading_order,
            titles,
        })
    }

    pub fn fetch(source: &dyn BookSource, id: &str) -> Result<Self> {
        Self::open(source.fetch_book_bytes(id)?)
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.navigation.chapters
    }

    /// Archive path of the navigation document.
    pub fn navigation_path(&self) -> &str {
        &self.navigation.path
    }

    pub fn reading_order(&self) -> &[ReadingItem] {
        &self.reading_order
    }

    /// Chapter titles used for heading detection.
    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn stylesheet(&self) -> &str {
        &self.resources.stylesheet
    }

    pub fn images(&self) -> &ResourceMap {
        &self.resources.images
    }

    pub fn duplicates(&self) -> &DuplicateGroups {
        &self.duplicates
    }

    /// Labels from the root chapter down to the one at `href`.
    pub fn breadcrumbs(&self, href: &str) -> Vec<&str> {
        ancestors_of(&self.navigation.chapters, href)
            .into_iter()
            .map(|c| c.label.as_str())
            .collect()
    }

    pub fn index_of(&self, href: &str) -> Option<usize> {
        self.reading_order.iter().position(|item| item.href == href)
    }

    /// Load one chapter. With a threshold, elements resembling a chapter
    /// title are tagged as headings.
    pub fn load_chapter(&mut self, href: &str, heading_threshold: Option<f64>) -> Result<LoadedChapter> {
        let mut loader = ChapterLoader::new(&self.resources.images, &self.nav_dir);
        if let Some(threshold) = heading_threshold {
            loader = loader.with_titles(&self.titles);
            loader.heading_threshold = threshold;
        }
        loader.load(&mut self.archive, href)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReaderState {
    Idle,
    ArchiveLoading,
    NavigationReady,
    ChapterLoading,
    Paginating,
    PageDisplayed,
    Error,
}

/// Page to show once a chapter has been paginated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAt {
    First,
    Last,
    /// The page the heading with this title landed on, else the first page.
    Heading(String),
}

/// A chapter load in flight. Only the most recently issued ticket may
/// display its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    index: usize,
    href: String,
    start: StartAt,
}

impl LoadTicket {
    pub fn href(&self) -> &str {
        &self.href
    }
}

/// What the reader is showing, for display and status lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub href: String,
    pub label: String,
    /// Zero-based.
    pub page: usize,
    pub page_count: usize,
    pub heading: Option<String>,
    pub breadcrumbs: Vec<String>,
}

#[derive(Debug)]
struct Displayed {
    index: usize,
    href: String,
    pagination: Pagination,
    page: usize,
}

impl Displayed {
    fn is_last_page(&self) -> bool {
        self.page + 1 >= self.pagination.page_count()
    }
}

/// Drives an [`OpenBook`] through chapter loads and page turns.
///
/// At most one chapter load is current at a time: requesting a chapter
/// invalidates every earlier ticket, and results for invalidated tickets are
/// dropped. A failed load leaves the last displayed page in place.
pub struct ReaderController {
    config: ReaderConfig,
    layout: PageLayout,
    measurer: Box<dyn BlockMeasurer>,
    state: ReaderState,
    book: Option<OpenBook>,
    generation: u64,
    pending: Option<LoadTicket>,
    current: Option<Displayed>,
    last_error: Option<String>,
}

impl std::fmt::Debug for ReaderController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderController")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("pending", &self.pending)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl ReaderController {
    /// A controller measuring with font metrics taken from `config`.
    pub fn new(config: ReaderConfig) -> Self {
        let measurer = FontMetricsMeasurer::new(config.typography());
        Self::with_measurer(config, Box::new(measurer))
    }

    pub fn with_measurer(config: ReaderConfig, measurer: Box<dyn BlockMeasurer>) -> Self {
        Self {
            layout: config.layout(),
            config,
            measurer,
            state: ReaderState::Idle,
            book: None,
            generation: 0,
            pending: None,
            current: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn book(&self) -> Option<&OpenBook> {
        self.book.as_ref()
    }

    /// Message of the most recent failure, cleared by the next successful
    /// display.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn open_book(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.close();
        self.state = ReaderState::ArchiveLoading;
        match OpenBook::open(bytes) {
            Ok(book) => {
                self.book = Some(book);
                self.state = ReaderState::NavigationReady;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn open_from(&mut self, source: &dyn BookSource, id: &str) -> Result<()> {
        match source.fetch_book_bytes(id) {
            Ok(bytes) => self.open_book(bytes),
            Err(e) => {
                self.close();
                Err(self.fail(e))
            }
        }
    }

    /// Drop the open book and return to `Idle`. Outstanding tickets become
    /// stale.
    pub fn close(&mut self) {
        self.book = None;
        self.current = None;
        self.pending = None;
        self.last_error = None;
        self.generation += 1;
        self.state = ReaderState::Idle;
    }

    /// Display the first loadable chapter of the book.
    pub fn start(&mut self) -> Result<Position> {
        let book = self.book.as_ref().ok_or_else(no_book)?;
        let index = book
            .reading_order
            .iter()
            .position(|item| !item.href.is_empty())
            .ok_or_else(|| FolioError::NavigationMissing("navigation lists no chapters".into()))?;
        self.show(index, StartAt::First)
    }

    /// Invalidate any load in flight and issue a ticket for `href`.
    pub fn request_chapter(&mut self, href: &str) -> Result<LoadTicket> {
        let start = self.heading_start(href);
        let index = match self.book.as_ref() {
            None => return Err(self.fail(no_book())),
            Some(book) => book.index_of(href),
        };
        match index {
            Some(index) => Ok(self.issue(index, start)),
            None => Err(self.fail(FolioError::ChapterNotFound {
                href: href.to_string(),
            })),
        }
    }

    /// Load and paginate the chapter behind `ticket`.
    pub fn run(&mut self, ticket: &LoadTicket) -> Result<Pagination> {
        let current = self.is_current(ticket);
        let book = self.book.as_mut().ok_or_else(no_book)?;
        let chapter = book.load_chapter(&ticket.href, Some(self.config.heading_threshold))?;
        if current {
            self.state = ReaderState::Paginating;
        }
        paginate(&chapter.markup, &self.layout, self.measurer.as_ref())
    }

    /// Apply the result of a load. Returns `Ok(None)` when the ticket has been
    /// superseded and the result was discarded.
    pub fn complete(&mut self, ticket: LoadTicket, result: Result<Pagination>) -> Result<Option<Position>> {
        if !self.is_current(&ticket) {
            log::debug!(
                "discarding stale result for {} (generation {}, current {})",
                ticket.href,
                ticket.generation,
                self.generation
            );
            return Ok(None);
        }
        self.pending = None;

        let pagination = match result {
            Ok(p) => p,
            Err(e) => return Err(self.fail(e)),
        };
        let last = pagination.page_count().saturating_sub(1);
        let page = match &ticket.start {
            StartAt::First => 0,
            StartAt::Last => last,
            StartAt::Heading(title) => pagination.page_of_heading(title).unwrap_or(0),
        };
        self.current = Some(Displayed {
            index: ticket.index,
            href: ticket.href,
            pagination,
            page,
        });
        self.state = ReaderState::PageDisplayed;
        self.last_error = None;
        self.position().ok_or_else(no_book).map(Some)
    }

    /// Request, load and display `href` in one step.
    pub fn open_chapter(&mut self, href: &str) -> Result<Position> {
        let ticket = self.request_chapter(href)?;
        let result = self.run(&ticket);
        self.complete(ticket, result)?.ok_or_else(no_book)
    }

    /// Jump to a chapter from the table of contents. When `href` names a
    /// fragment, display starts at the page holding that chapter's heading.
    pub fn jump_to(&mut self, href: &str) -> Result<Position> {
        self.open_chapter(href)
    }

    /// Advance one page, moving into the next chapter after the last page.
    /// At the end of the book this is a no-op.
    pub fn next_page(&mut self) -> Result<Position> {
        let current = self.current.as_mut().ok_or_else(no_book)?;
        if !current.is_last_page() {
            current.page += 1;
            self.state = ReaderState::PageDisplayed;
            return self.position().ok_or_else(no_book);
        }
        let from = current.index;
        match self.neighbour(from, true) {
            Some(index) => self.show(index, StartAt::First),
            None => self.position().ok_or_else(no_book),
        }
    }

    /// Go back one page, moving to the last page of the previous chapter
    /// from a first page. At the start of the book this is a no-op.
    pub fn prev_page(&mut self) -> Result<Position> {
        let current = self.current.as_mut().ok_or_else(no_book)?;
        if current.page > 0 {
            current.page -= 1;
            self.state = ReaderState::PageDisplayed;
            return self.position().ok_or_else(no_book);
        }
        let from = current.index;
        match self.neighbour(from, false) {
            Some(index) => self.show(index, StartAt::Last),
            None => self.position().ok_or_else(no_book),
        }
    }

    pub fn current_page(&self) -> Option<&Page> {
        let current = self.current.as_ref()?;
        current.pagination.pages.get(current.page)
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.current.as_ref().map(|c| &c.pagination)
    }

    pub fn position(&self) -> Option<Position> {
        let book = self.book.as_ref()?;
        let current = self.current.as_ref()?;
        let label = book
            .reading_order
            .get(current.index)
            .map(|item| item.label.clone())
            .unwrap_or_default();
        Some(Position {
            href: current.href.clone(),
            label,
            page: current.page,
            page_count: current.pagination.page_count(),
            heading: current.pagination.heading_at(current.page).map(str::to_string),
            breadcrumbs: book
                .breadcrumbs(&current.href)
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    fn show(&mut self, index: usize, start: StartAt) -> Result<Position> {
        let ticket = self.issue(index, start);
        let result = self.run(&ticket);
        self.complete(ticket, result)?.ok_or_else(no_book)
    }

    fn issue(&mut self, index: usize, start: StartAt) -> LoadTicket {
        self.generation += 1;
        let href = self
            .book
            .as_ref()
            .and_then(|b| b.reading_order.get(index))
            .map(|item| item.href.clone())
            .unwrap_or_default();
        let ticket = LoadTicket {
            generation: self.generation,
            index,
            href,
            start,
        };
        log::debug!("requesting {} (generation {})", ticket.href, ticket.generation);
        self.pending = Some(ticket.clone());
        self.state = ReaderState::ChapterLoading;
        ticket
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
    }

    fn heading_start(&self, href: &str) -> StartAt {
        let Some(book) = self.book.as_ref() else {
            return StartAt::First;
        };
        match (fragment(href), book.index_of(href)) {
            (Some(_), Some(i)) => StartAt::Heading(book.reading_order[i].label.clone()),
            _ => StartAt::First,
        }
    }

    /// Next (or previous) chapter in reading order, passing over entries
    /// without a target and entries whose content duplicates the chapter
    /// currently displayed.
    fn neighbour(&self, from: usize, forward: bool) -> Option<usize> {
        let book = self.book.as_ref()?;
        let shown = self.current.as_ref().map(|c| c.href.as_str()).unwrap_or_default();
        let mut index = from;
        loop {
            index = if forward { index + 1 } else { index.checked_sub(1)? };
            let item = book.reading_order.get(index)?;
            if item.href.is_empty() {
                continue;
            }
            if book.duplicates.are_duplicates(shown, &item.href) {
                log::info!("skipping {} (same content as {shown})", item.href);
                continue;
            }
            return Some(index);
        }
    }

    /// Record `e`. Book-level failures discard the book; chapter failures
    /// keep the last displayed page.
    fn fail(&mut self, e: FolioError) -> FolioError {
        log::warn!("{e}");
        self.pending = None;
        if e.is_fatal() {
            self.book = None;
            self.current = None;
        }
        self.last_error = Some(e.to_string());
        self.state = ReaderState::Error;
        e
    }
}

fn no_book() -> FolioError {
    FolioError::BookNotFound("no book is open".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    const NCX: &str = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/"><navMap>
  <navPoint id="n1"><navLabel><text>One</text></navLabel><content src="text/ch1.xhtml"/>
    <navPoint id="n2"><navLabel><text>Two</text></navLabel><content src="text/ch1.xhtml#two"/></navPoint>
  </navPoint>
  <navPoint id="n3"><navLabel><text>Copy A</text></navLabel><content src="text/ch2.xhtml"/></navPoint>
  <navPoint id="n4"><navLabel><text>Copy B</text></navLabel><content src="text/ch3.xhtml"/></navPoint>
  <navPoint id="n5"><navLabel><text>Three</text></navLabel><content src="text/ch4.xhtml"/></navPoint>
  <navPoint id="n6"><navLabel><text>Broken</text></navLabel><content src="text/missing.xhtml"/></navPoint>
</navMap></ncx>"#;

    fn xhtml(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>t</title></head><body>{body}</body></html>"
        )
    }

    fn book_bytes() -> Vec<u8> {
        let ch1 = xhtml(
            "<p>Paragraph 1</p><p>Paragraph 2</p><p>Paragraph 3</p><p>Paragraph 4</p>\
             <h2 id=\"two\">Two</h2><p>Paragraph 5</p>",
        );
        let shared = xhtml("<p>Shared text body</p>");
        let ch4 = xhtml("<h1>Three</h1><p>End</p>");
        let files = [
            ("mimetype", "application/epub+zip".to_string()),
            ("OPS/toc.ncx", NCX.to_string()),
            ("OPS/style.css", "p { margin: 0 }".to_string()),
            ("OPS/text/ch1.xhtml", ch1),
            ("OPS/text/ch2.xhtml", shared.clone()),
            ("OPS/text/ch3.xhtml", shared),
            ("OPS/text/ch4.xhtml", ch4),
        ];
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Every block is 100 tall and a column holds 250: two blocks per column.
    fn controller() -> ReaderController {
        let config = ReaderConfig {
            max_column_height: 250.0,
            ..ReaderConfig::default()
        };
        let mut reader = ReaderController::with_measurer(config, Box::new(|_: &str, _: f32| -> f32 { 100.0 }));
        reader.open_book(book_bytes()).unwrap();
        reader
    }

    fn at(p: &Position) -> (&str, usize, usize) {
        (p.href.as_str(), p.page, p.page_count)
    }

    #[test]
    fn open_book_builds_the_session() {
        let reader = controller();
        assert_eq!(reader.state(), ReaderState::NavigationReady);
        let book = reader.book().unwrap();
        assert_eq!(book.navigation_path(), "OPS/toc.ncx");
        assert_eq!(book.reading_order().len(), 6);
        assert_eq!(book.stylesheet(), "p { margin: 0 }");
        assert_eq!(book.duplicates().len(), 2);
        assert!(book.duplicates().are_duplicates("text/ch2.xhtml", "text/ch3.xhtml"));
        assert_eq!(book.breadcrumbs("text/ch1.xhtml#two"), vec!["One", "Two"]);
    }

    #[test]
    fn corrupt_bytes_are_fatal() {
        let mut reader = ReaderController::new(ReaderConfig::default());
        let err = reader.open_book(b"not a zip".to_vec()).unwrap_err();
        assert!(matches!(err, FolioError::CorruptArchive(_)));
        assert_eq!(reader.state(), ReaderState::Error);
        assert!(reader.book().is_none());
        assert!(reader.last_error().is_some());
    }

    #[test]
    fn pages_turn_across_chapters_skipping_duplicates() {
        let mut reader = controller();
        let p = reader.start().unwrap();
        assert_eq!(at(&p), ("text/ch1.xhtml", 0, 2));
        assert_eq!(p.heading, None);
        assert_eq!(reader.state(), ReaderState::PageDisplayed);

        let p = reader.next_page().unwrap();
        assert_eq!(at(&p), ("text/ch1.xhtml", 1, 2));
        assert_eq!(p.heading.as_deref(), Some("Two"));

        // ch1.xhtml#two has the same content as ch1.xhtml
        let p = reader.next_page().unwrap();
        assert_eq!(at(&p), ("text/ch2.xhtml", 0, 1));

        // ch3.xhtml has the same content as ch2.xhtml
        let p = reader.next_page().unwrap();
        assert_eq!(at(&p), ("text/ch4.xhtml", 0, 1));
        assert_eq!(p.heading.as_deref(), Some("Three"));
        assert_eq!(p.label, "Three");
    }

    #[test]
    fn previous_chapter_opens_on_its_last_page() {
        let mut reader = controller();
        reader.jump_to("text/ch2.xhtml").unwrap();
        let p = reader.prev_page().unwrap();
        assert_eq!(at(&p), ("text/ch1.xhtml#two", 1, 2));
        assert_eq!(p.breadcrumbs, vec!["One", "Two"]);

        let p = reader.prev_page().unwrap();
        assert_eq!(at(&p), ("text/ch1.xhtml#two", 0, 2));
        // start of the book
        let p = reader.prev_page().unwrap();
        assert_eq!(at(&p), ("text/ch1.xhtml#two", 0, 2));
    }

    #[test]
    fn failed_chapter_keeps_last_good_page() {
        let mut reader = controller();
        reader.jump_to("text/ch4.xhtml").unwrap();
        let err = reader.next_page().unwrap_err();
        assert!(matches!(err, FolioError::ChapterNotFound { .. }));
        assert!(!err.is_fatal());
        assert_eq!(reader.state(), ReaderState::Error);
        assert!(reader.last_error().unwrap().contains("missing.xhtml"));

        let p = reader.position().unwrap();
        assert_eq!(at(&p), ("text/ch4.xhtml", 0, 1));
        assert!(reader.current_page().unwrap().left.contains("End"));

        // still usable
        let p = reader.prev_page().unwrap();
        assert_eq!(at(&p), ("text/ch3.xhtml", 0, 1));
        assert!(reader.last_error().is_none());
    }

    #[test]
    fn fragment_jump_starts_at_heading_page() {
        let mut reader = controller();
        let p = reader.jump_to("text/ch1.xhtml#two").unwrap();
        assert_eq!(at(&p), ("text/ch1.xhtml#two", 1, 2));
        assert_eq!(p.label, "Two");
    }

    #[test]
    fn unknown_href_is_a_local_error() {
        let mut reader = controller();
        reader.start().unwrap();
        let err = reader.jump_to("text/nowhere.xhtml").unwrap_err();
        assert!(matches!(err, FolioError::ChapterNotFound { .. }));
        assert!(reader.book().is_some());
        assert_eq!(reader.position().unwrap().href, "text/ch1.xhtml");
    }

    #[test]
    fn superseded_loads_are_discarded() {
        let mut reader = controller();
        let first = reader.request_chapter("text/ch1.xhtml").unwrap();
        let second = reader.request_chapter("text/ch4.xhtml").unwrap();
        let first_result = reader.run(&first);
        let second_result = reader.run(&second);

        assert_eq!(reader.complete(first, first_result).unwrap(), None);
        assert!(reader.position().is_none());

        let p = reader.complete(second, second_result).unwrap().unwrap();
        assert_eq!(p.href, "text/ch4.xhtml");

        // a ticket completed after a newer one was displayed is also stale
        let old = reader.request_chapter("text/ch2.xhtml").unwrap();
        let newer = reader.request_chapter("text/ch1.xhtml").unwrap();
        let p = reader.complete(newer, Ok(Pagination::default())).unwrap().unwrap();
        assert_eq!(at(&p), ("text/ch1.xhtml", 0, 0));
        assert_eq!(reader.complete(old, Ok(Pagination::default())).unwrap(), None);
        assert_eq!(reader.position().unwrap().href, "text/ch1.xhtml");
    }

    #[test]
    fn closing_resets_to_idle() {
        let mut reader = controller();
        reader.start().unwrap();
        reader.close();
        assert_eq!(reader.state(), ReaderState::Idle);
        assert!(reader.position().is_none());
        assert!(reader.next_page().is_err());
    }
}
