pub mod archive;
pub mod navigation;
pub mod resources;

use serde::{Deserialize, Serialize};

/// A navigation node in the table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub label: String,
    /// Archive-relative target, possibly with a `#fragment`. May be empty.
    pub href: String,
    /// Nesting level, starting at 1 for roots.
    pub level: usize,
    pub children: Vec<Chapter>,
}

impl Chapter {
    pub fn base_href(&self) -> &str {
        base_href(&self.href)
    }
}

/// Depth-first, pre-order reading sequence of a chapter tree.
pub fn flatten_chapters(tree: &[Chapter]) -> Vec<&Chapter> {
    fn walk<'a>(list: &'a [Chapter], out: &mut Vec<&'a Chapter>) {
        for chapter in list {
            out.push(chapter);
            walk(&chapter.children, out);
        }
    }
    let mut flat = Vec::new();
    walk(tree, &mut flat);
    flat
}

/// Chain of chapters from a root down to the first chapter whose href is
/// `href`, inclusive. Empty when nothing matches.
pub fn ancestors_of<'a>(tree: &'a [Chapter], href: &str) -> Vec<&'a Chapter> {
    fn find<'a>(list: &'a [Chapter], href: &str, path: &mut Vec<&'a Chapter>) -> bool {
        for chapter in list {
            path.push(chapter);
            if chapter.href == href || find(&chapter.children, href, path) {
                return true;
            }
            path.pop();
        }
        false
    }
    let mut path = Vec::new();
    find(tree, href, &mut path);
    path
}

/// `href` without its `#fragment`.
pub fn base_href(href: &str) -> &str {
    href.split('#').next().unwrap_or(href)
}

/// The `#fragment` part of `href`, if any.
pub fn fragment(href: &str) -> Option<&str> {
    href.split_once('#').map(|(_, f)| f).filter(|f| !f.is_empty())
}

/// Directory part of an archive path, with trailing `/`, or empty at root.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// Resolve a reference found inside `from_path` to an archive path.
///
/// References starting with `/` are taken from the archive root; everything
/// else is relative to the referencing document's directory. `.` and `..`
/// segments are collapsed and percent escapes are decoded.
pub fn resolve_path(from_path: &str, reference: &str) -> String {
    let reference = base_href(reference);
    let joined = match reference.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("{}{reference}", parent_dir(from_path)),
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    decode_href(&parts.join("/"))
}

/// Decode percent escapes in an href. Invalid UTF-8 is replaced rather than
/// rejected.
pub fn decode_href(href: &str) -> String {
    percent_encoding::percent_decode_str(href)
        .decode_utf8_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(label: &str, href: &str, level: usize, children: Vec<Chapter>) -> Chapter {
        Chapter {
            label: label.to_string(),
            href: href.to_string(),
            level,
            children,
        }
    }

    fn sample_tree() -> Vec<Chapter> {
        vec![
            node(
                "A",
                "a.xhtml",
                1,
                vec![
                    node("A1", "a1.xhtml", 2, vec![]),
                    node("A2", "a2.xhtml", 2, vec![]),
                ],
            ),
            node("B", "b.xhtml", 1, vec![]),
        ]
    }

    #[test]
    fn flatten_is_preorder() {
        let tree = sample_tree();
        let labels: Vec<&str> = flatten_chapters(&tree)
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(labels, vec!["A", "A1", "A2", "B"]);
    }

    #[test]
    fn ancestors_chain() {
        let tree = sample_tree();
        let chain: Vec<&str> = ancestors_of(&tree, "a2.xhtml")
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(chain, vec!["A", "A2"]);
        assert!(ancestors_of(&tree, "missing.xhtml").is_empty());
    }

    #[test]
    fn href_helpers() {
        assert_eq!(base_href("text/ch01.xhtml#frag3"), "text/ch01.xhtml");
        assert_eq!(base_href("plain.xhtml"), "plain.xhtml");
        assert_eq!(fragment("text/ch01.xhtml#frag3"), Some("frag3"));
        assert_eq!(fragment("text/ch01.xhtml#"), None);
        assert_eq!(parent_dir("OPS/text/ch01.xhtml"), "OPS/text/");
        assert_eq!(parent_dir("ch01.xhtml"), "");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert_eq!(
            resolve_path("OPS/text/ch01.xhtml", "../images/fig1.png"),
            "OPS/images/fig1.png"
        );
        assert_eq!(
            resolve_path("OPS/text/ch01.xhtml", "/OPS/images/fig1.png"),
            "OPS/images/fig1.png"
        );
        assert_eq!(
            resolve_path("OPS/text/ch01.xhtml", "./pic%20one.jpg"),
            "OPS/text/pic one.jpg"
        );
        assert_eq!(resolve_path("ch.xhtml", "img.png"), "img.png");
    }

    #[test]
    fn percent_escapes_are_decoded() {
        assert_eq!(decode_href("caf%C3%A9.xhtml"), "café.xhtml");
        assert_eq!(decode_href("notes%20%281%29.xhtml"), "notes (1).xhtml");
        assert_eq!(
            resolve_path("OEBPS/Text/nav.xhtml", "../Images/f%C3%B6o.png"),
            "OEBPS/Images/föo.png"
        );
    }
}
