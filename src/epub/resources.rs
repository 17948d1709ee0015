use crate::epub::archive::ArchiveHandle;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;

/// Image extensions embedded as data URIs.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg"];

/// Archive path → embeddable data URI.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    entries: HashMap<String, String>,
}

impl ResourceMap {
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn insert(&mut self, path: impl Into<String>, uri: impl Into<String>) {
        self.entries.insert(path.into(), uri.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order, for stable listings.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Stylesheets and images extracted once per opened book.
#[derive(Debug, Clone, Default)]
pub struct BookResources {
    /// Every `.css` entry, concatenated in archive-listing order.
    pub stylesheet: String,
    pub images: ResourceMap,
}

pub fn load_resources(archive: &mut ArchiveHandle) -> BookResources {
    BookResources {
        stylesheet: load_stylesheets(archive),
        images: load_images(archive),
    }
}

/// Concatenate all stylesheets. Listing order may differ from the manifest,
/// which can change the cascade between conflicting files.
pub fn load_stylesheets(archive: &mut ArchiveHandle) -> String {
    let names: Vec<String> = archive
        .entries()
        .iter()
        .filter(|e| extension_of(e).as_deref() == Some("css"))
        .cloned()
        .collect();
    let mut sheets = Vec::with_capacity(names.len());
    for name in &names {
        match archive.read_text(name) {
            Ok(css) => sheets.push(css),
            Err(e) => log::warn!("skipping stylesheet {name}: {e}"),
        }
    }
    sheets.join("\n")
}

/// Embed every image entry as a data URI keyed by its full archive path.
/// A single unreadable image is logged and skipped.
pub fn load_images(archive: &mut ArchiveHandle) -> ResourceMap {
    let names: Vec<String> = archive
        .entries()
        .iter()
        .filter(|e| image_mime(e).is_some())
        .cloned()
        .collect();
    let mut map = ResourceMap::default();
    for name in names {
        let Some(mime) = image_mime(&name) else {
            continue;
        };
        match archive.read_binary(&name) {
            Ok(bytes) => {
                let uri = data_uri(mime, &bytes);
                map.insert(name, uri);
            }
            Err(e) => log::warn!("skipping image {name}: {e}"),
        }
    }
    log::debug!("embedded {} images", map.len());
    map
}

fn extension_of(path: &str) -> Option<String> {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

/// MIME type for a supported image path, by extension.
pub fn image_mime(path: &str) -> Option<&'static str> {
    let ext = extension_of(path)?;
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        _ => "image/gif",
    })
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
