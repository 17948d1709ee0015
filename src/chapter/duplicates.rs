//! Detect chapters whose content is identical, as produced by books that
//! carry both EPUB 2 and EPUB 3 manifests for the same documents.

use crate::chapter::load_plain_body;
use crate::epub::archive::ArchiveHandle;
use crate::epub::Chapter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Content hash → hrefs sharing it. Only hashes with two or more distinct
/// hrefs are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateGroups {
    groups: BTreeMap<String, Vec<String>>,
}

impl DuplicateGroups {
    /// Build groups from `(href, hash)` pairs in reading order.
    pub fn from_hashes<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        let mut by_hash: HashMap<String, Vec<String>> = HashMap::new();
        for (href, hash) in pairs {
            let hrefs = by_hash.entry(hash).or_default();
            if !hrefs.iter().any(|h| h == href) {
                hrefs.push(href.to_string());
            }
        }
        let groups = by_hash
            .into_iter()
            .filter(|(_, hrefs)| hrefs.len() > 1)
            .collect();
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// The group `href` belongs to, if any.
    pub fn group_of(&self, href: &str) -> Option<&[String]> {
        self.groups
            .values()
            .find(|hrefs| hrefs.iter().any(|h| h == href))
            .map(Vec::as_slice)
    }

    /// Whether `a` and `b` are different hrefs with the same content.
    pub fn are_duplicates(&self, a: &str, b: &str) -> bool {
        a != b && self.group_of(a).is_some_and(|g| g.iter().any(|h| h == b))
    }
}

/// Hex-encoded SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Hash every chapter's body and group identical ones.
///
/// Chapters that fail to load are logged and left out, so they are treated
/// as unique.
pub fn detect_duplicates(
    archive: &mut ArchiveHandle,
    chapters: &[&Chapter],
    nav_dir: &str,
) -> DuplicateGroups {
    let mut hashes: Vec<(&str, String)> = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        match load_plain_body(archive, &chapter.href, nav_dir) {
            Ok(body) => hashes.push((chapter.href.as_str(), content_hash(&body))),
            Err(e) => log::warn!("duplicate scan skipped {:?}: {e}", chapter.href),
        }
    }
    let groups = DuplicateGroups::from_hashes(hashes);
    log::debug!(
        "duplicate scan over {} chapters found {} groups",
        chapters.len(),
        groups.len()
    );
    groups
}
