//! Resolve, load and prepare a single chapter document for display.

pub mod duplicates;
pub mod similarity;

use crate::epub::archive::ArchiveHandle;
use crate::epub::resources::ResourceMap;
use crate::epub::{base_href, resolve_path};
use crate::error::{FolioError, Result};
use crate::markup::sanitize::sanitize;
use crate::markup::{Document, Element, MarkupNode};
use regex::Regex;
use serde::Serialize;
use similarity::{normalize_text, similarity};
use std::sync::LazyLock;

/// Attribute carrying the chapter title an element was matched to.
pub const HEADING_ATTR: &str = "data-chapter-title";

/// Minimum similarity for an element to count as a chapter heading.
pub const DEFAULT_HEADING_THRESHOLD: f64 = 0.7;

/// Directories content commonly lives under, tried in order.
const ROOT_PREFIXES: &[&str] = &["", "OPS/", "OEBPS/", "EPUB/"];

const IMAGE_STYLE: &str =
    "display: block; margin-left: auto; margin-right: auto; max-width: 100%; height: auto;";

static XML_PROLOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*<\?xml.*?\?>\s*").expect("valid regex"));

/// An element matched to a known chapter title.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadingMatch {
    pub tag: String,
    pub text: String,
    pub title: String,
    pub similarity: f64,
}

/// A chapter ready for pagination.
#[derive(Debug, Clone)]
pub struct LoadedChapter {
    pub href: String,
    /// Archive entry the href resolved to.
    pub entry: String,
    /// Sanitized `<body>` markup.
    pub markup: String,
    /// Elements tagged with [`HEADING_ATTR`], in document order.
    pub headings: Vec<HeadingMatch>,
}

/// Find the archive entry for a chapter href.
///
/// The fragment is ignored and percent escapes are decoded. The href is
/// first resolved against the navigation document's directory, collapsing
/// `..` segments. Then each plausible content root is tried, followed by a
/// case-insensitive match and finally a case-insensitive suffix match on a
/// path-segment boundary.
pub fn resolve_chapter_entry(archive: &ArchiveHandle, href: &str, nav_dir: &str) -> Result<String> {
    let base = base_href(href);
    let not_found = || FolioError::ChapterNotFound {
        href: href.to_string(),
    };
    if base.is_empty() {
        return Err(not_found());
    }

    let mut candidates = vec![resolve_path(nav_dir, base)];
    candidates.extend(ROOT_PREFIXES.iter().map(|p| resolve_path(p, base)));
    candidates.dedup();

    if let Some(hit) = candidates.iter().find(|c| archive.contains(c)) {
        return Ok(hit.clone());
    }
    if let Some(hit) = candidates.iter().find_map(|c| archive.find_ignore_case(c)) {
        log::warn!("chapter {href} matched {hit} ignoring case");
        return Ok(hit.to_string());
    }
    let suffix = format!("/{}", resolve_path("", base).to_ascii_lowercase());
    archive
        .entries()
        .iter()
        .find(|e| e.to_ascii_lowercase().ends_with(&suffix))
        .cloned()
        .ok_or_else(not_found)
}

/// Remove a leading `<?xml ... ?>` declaration.
pub fn strip_xml_prolog(text: &str) -> &str {
    match XML_PROLOG.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

fn parse_body(href: &str, text: &str) -> Result<Element> {
    let parse_error = |reason: String| FolioError::ChapterParse {
        href: href.to_string(),
        reason,
    };
    let mut doc = Document::parse(strip_xml_prolog(text)).map_err(|e| parse_error(e.to_string()))?;
    doc.body_mut()
        .map(|body| std::mem::replace(body, Element::new("body")))
        .ok_or_else(|| parse_error("no <body> element".into()))
}

/// Sanitized body markup with no resource rewriting or heading tagging.
/// This is the text chapter hashes are computed over.
pub fn load_plain_body(archive: &mut ArchiveHandle, href: &str, nav_dir: &str) -> Result<String> {
    let entry = resolve_chapter_entry(archive, href, nav_dir)?;
    let text = archive.read_text(&entry)?;
    let mut body = parse_body(href, &text)?;
    sanitize(&mut body);
    Ok(body.to_markup())
}

/// Loads chapters against the resources of one open book.
#[derive(Debug, Clone)]
pub struct ChapterLoader<'a> {
    pub images: &'a ResourceMap,
    /// Titles from the navigation tree, used for heading detection.
    pub known_titles: &'a [String],
    /// Directory of the navigation document; hrefs are relative to it.
    pub nav_dir: &'a str,
    pub heading_threshold: f64,
}

impl<'a> ChapterLoader<'a> {
    pub fn new(images: &'a ResourceMap, nav_dir: &'a str) -> Self {
        Self {
            images,
            known_titles: &[],
            nav_dir,
            heading_threshold: DEFAULT_HEADING_THRESHOLD,
        }
    }

    pub fn with_titles(mut self, titles: &'a [String]) -> Self {
        self.known_titles = titles;
        self
    }

    pub fn load(&self, archive: &mut ArchiveHandle, href: &str) -> Result<LoadedChapter> {
        let entry = resolve_chapter_entry(archive, href, self.nav_dir)?;
        let text = archive.read_text(&entry)?;
        let mut body = parse_body(href, &text)?;

        rewrite_images(&mut body, &entry, self.images);
        let headings = if self.known_titles.is_empty() {
            Vec::new()
        } else {
            tag_headings(&mut body, self.known_titles, self.heading_threshold)
        };
        sanitize(&mut body);

        log::debug!(
            "loaded {href} from {entry} ({} heading matches)",
            headings.len()
        );
        Ok(LoadedChapter {
            href: href.to_string(),
            entry,
            markup: body.to_markup(),
            headings,
        })
    }
}

/// Point `<img src>` and SVG `<image href>` at embedded data URIs.
/// Unknown references are left untouched.
pub fn rewrite_images(body: &mut Element, chapter_entry: &str, images: &ResourceMap) {
    body.visit_mut(&mut |el| {
        let attr_name = match el.tag_name() {
            "img" => "src",
            "image" if el.attr("xlink:href").is_some() => "xlink:href",
            "image" => "href",
            _ => return,
        };
        let Some(src) = el.attr(attr_name).map(str::to_string) else {
            return;
        };
        if src.starts_with("data:") {
            return;
        }
        let path = resolve_path(chapter_entry, &src);
        let Some(uri) = images.get(&path).or_else(|| images.get(&src)) else {
            log::warn!("image not found: {src} (from {chapter_entry})");
            return;
        };
        el.set_attr(attr_name, uri);
        let style = match el.attr("style") {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}; {IMAGE_STYLE}", existing.trim().trim_end_matches(';'))
            }
            _ => IMAGE_STYLE.to_string(),
        };
        el.set_attr("style", style);
    });
}

/// Tag the elements whose text best matches a known title.
///
/// Every descendant of `body` with text is compared against each title; its
/// best-scoring title, if above `threshold`, is that element's candidate. Only
/// candidates tied for the single highest score across the whole body are
/// tagged, so one heading wins even when several elements loosely resemble
/// various titles.
pub fn tag_headings(body: &mut Element, titles: &[String], threshold: f64) -> Vec<HeadingMatch> {
    let normalized: Vec<String> = titles.iter().map(|t| normalize_text(t)).collect();

    // (pre-order index, match) for every element over the threshold.
    let mut candidates: Vec<(usize, HeadingMatch)> = Vec::new();
    let mut index = 0usize;
    body.visit_mut(&mut |el| {
        let position = index;
        index += 1;
        if position == 0 {
            return;
        }
        let text = el.text_content();
        let norm = normalize_text(&text);
        if norm.is_empty() {
            return;
        }
        let len = norm.chars().count();
        let mut best: Option<(usize, f64)> = None;
        for (i, title) in normalized.iter().enumerate() {
            let title_len = title.chars().count();
            // similarity can never exceed the length ratio
            let ratio = len.min(title_len) as f64 / len.max(title_len).max(1) as f64;
            if ratio <= threshold || best.is_some_and(|(_, s)| ratio <= s) {
                continue;
            }
            let score = similarity(&norm, title);
            if score > threshold && best.is_none_or(|(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        if let Some((i, score)) = best {
            candidates.push((
                position,
                HeadingMatch {
                    tag: el.tag_name().to_string(),
                    text: text.trim().to_string(),
                    title: titles[i].clone(),
                    similarity: score,
                },
            ));
        }
    });

    let Some(best) = candidates
        .iter()
        .map(|(_, m)| m.similarity)
        .max_by(|a, b| a.total_cmp(b))
    else {
        return Vec::new();
    };
    candidates.retain(|(_, m)| m.similarity == best);

    let mut index = 0usize;
    body.visit_mut(&mut |el| {
        if let Some((_, m)) = candidates.iter().find(|(i, _)| *i == index) {
            el.set_attr(HEADING_ATTR, m.title.clone());
        }
        index += 1;
    });

    candidates.into_iter().map(|(_, m)| m).collect()
}
