use crate::epub::archive::{ArchiveHandle, EntryPattern};
use crate::epub::Chapter;
use crate::error::{FolioError, Result};
use crate::markup::{attr_value, decode_text};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Label used for navigation points that carry no visible text.
pub const PLACEHOLDER_LABEL: &str = "Chapter";

/// Candidate locations of an XHTML navigation document, tried after NCX.
const NAV_XHTML_SUFFIXES: &[&str] = &["nav.xhtml", "toc.xhtml", "nav.html", "toc.html"];

/// The navigation document found in an archive.
#[derive(Debug, Clone)]
pub struct NavigationDocument {
    pub path: String,
    pub chapters: Vec<Chapter>,
}

/// Locate and parse the navigation document. Prefers `toc.ncx`, falls back
/// to an XHTML `<nav epub:type="toc">` document.
pub fn load_navigation(archive: &mut ArchiveHandle) -> Result<NavigationDocument> {
    let path = archive
        .find_entry(&EntryPattern::suffix("toc.ncx"))
        .or_else(|| archive.find_entry(&EntryPattern::suffix(".ncx")))
        .or_else(|| {
            NAV_XHTML_SUFFIXES
                .iter()
                .find_map(|s| archive.find_entry(&EntryPattern::suffix(*s)))
        })
        .map(str::to_string)
        .ok_or_else(|| FolioError::NavigationMissing("no toc.ncx or nav document".into()))?;

    let text = archive
        .read_text(&path)
        .map_err(|e| FolioError::NavigationMissing(format!("{path}: {e}")))?;
    let chapters = parse_navigation(&text)?;
    log::debug!("parsed {} root chapters from {path}", chapters.len());
    Ok(NavigationDocument { path, chapters })
}

/// Parse the raw text of a navigation document into a chapter tree.
pub fn parse_navigation(text: &str) -> Result<Vec<Chapter>> {
    if text.contains("<navMap") {
        parse_ncx(text)
    } else if text.contains("<nav") {
        parse_nav_xhtml(text)
    } else {
        Err(FolioError::NavigationMissing(
            "document has neither navMap nor nav".into(),
        ))
    }
}

fn malformed(e: quick_xml::Error) -> FolioError {
    FolioError::NavigationMissing(format!("malformed navigation document: {e}"))
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn finish_label(label: &str) -> String {
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
    if label.is_empty() {
        PLACEHOLDER_LABEL.to_string()
    } else {
        label
    }
}

fn parse_ncx(xml: &str) -> Result<Vec<Chapter>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut roots = Vec::new();
    // Open navPoints, with the raw label text gathered so far.
    let mut stack: Vec<(Chapter, String)> = Vec::new();
    let mut in_label = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Start(ref e) => match local_name(e).as_str() {
                "navPoint" => {
                    let level = stack.len() + 1;
                    stack.push((
                        Chapter {
                            label: String::new(),
                            href: String::new(),
                            level,
                            children: Vec::new(),
                        },
                        String::new(),
                    ));
                }
                "navLabel" => in_label = true,
                "text" if in_label => in_text = true,
                "content" => set_content_src(&mut stack, e),
                _ => {}
            },
            Event::Empty(ref e) => {
                if local_name(e) == "content" {
                    set_content_src(&mut stack, e);
                }
            }
            Event::Text(ref e) => {
                if in_text && let Some((_, label)) = stack.last_mut() {
                    label.push_str(&decode_text(e));
                }
            }
            Event::CData(ref e) => {
                if in_text && let Some((_, label)) = stack.last_mut() {
                    label.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"text" => in_text = false,
                b"navLabel" => in_label = false,
                b"navPoint" => {
                    if let Some((mut point, label)) = stack.pop() {
                        point.label = finish_label(&label);
                        match stack.last_mut() {
                            Some((parent, _)) => parent.children.push(point),
                            None => roots.push(point),
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(roots)
}

fn set_content_src(stack: &mut [(Chapter, String)], e: &BytesStart) {
    // Only the first <content> of a navPoint counts; nested points have their own.
    if let Some((current, _)) = stack.last_mut()
        && current.href.is_empty()
        && let Some(src) = attr_value(e, b"src")
    {
        current.href = src;
    }
}

fn parse_nav_xhtml(html: &str) -> Result<Vec<Chapter>> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();

    let mut in_nav_toc = false;
    let mut found_toc = false;
    // One list per open <ol>; the bottom entry collects the roots.
    let mut lists: Vec<Vec<Chapter>> = vec![Vec::new()];
    // (opening tag, href, label) of the entry being read.
    let mut link: Option<(String, String, String)> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Start(ref e) => {
                let local = local_name(e);
                if local == "nav" && !found_toc {
                    in_nav_toc = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"type"
                            && String::from_utf8_lossy(&a.value)
                                .split_whitespace()
                                .any(|t| t == "toc")
                    });
                } else if in_nav_toc {
                    match local.as_str() {
                        "ol" | "ul" => lists.push(Vec::new()),
                        "a" | "span" if link.is_none() => {
                            let href = attr_value(e, b"href").unwrap_or_default();
                            link = Some((local.clone(), href, String::new()));
                        }
                        _ => {}
                    }
                }
            }
            Event::Text(ref e) => {
                if in_nav_toc && let Some((_, _, label)) = link.as_mut() {
                    label.push_str(&decode_text(e));
                }
            }
            Event::End(ref e) => {
                if !in_nav_toc {
                    buf.clear();
                    continue;
                }
                match e.local_name().as_ref() {
                    b"nav" => {
                        in_nav_toc = false;
                        found_toc = true;
                    }
                    name @ (b"a" | b"span")
                        if link.as_ref().is_some_and(|(tag, _, _)| tag.as_bytes() == name) =>
                    {
                        if let Some((_, href, label)) = link.take() {
                            let level = lists.len().saturating_sub(1).max(1);
                            if let Some(current) = lists.last_mut() {
                                current.push(Chapter {
                                    label: finish_label(&label),
                                    href,
                                    level,
                                    children: Vec::new(),
                                });
                            }
                        }
                    }
                    b"ol" | b"ul" if lists.len() > 1 => {
                        let children = lists.pop().unwrap_or_default();
                        let nested = lists.len() > 1;
                        if let Some(parent_list) = lists.last_mut() {
                            if nested && let Some(parent) = parent_list.last_mut() {
                                parent.children.extend(children);
                            } else {
                                parent_list.extend(children);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !found_toc && !in_nav_toc {
        return Err(FolioError::NavigationMissing(
            "no <nav epub:type=\"toc\"> element".into(),
        ));
    }
    Ok(lists.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::flatten_chapters;

    const NESTED_NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
<docTitle><text>The Book</text></docTitle>
<navMap>
<navPoint id="a" playOrder="1">
  <navLabel><text>A</text></navLabel>
  <content src="text/a.xhtml"/>
  <navPoint id="a1" playOrder="2">
    <navLabel><text>A1</text></navLabel>
    <content src="text/a.xhtml#s1"/>
  </navPoint>
  <navPoint id="a2" playOrder="3">
    <navLabel><text>A2</text></navLabel>
    <content src="text/a.xhtml#s2"/>
  </navPoint>
</navPoint>
<navPoint id="b" playOrder="4">
  <navLabel><text>B &amp; C</text></navLabel>
  <content src="text/b.xhtml"/>
</navPoint>
</navMap>
</ncx>"#;

    #[test]
    fn ncx_tree_and_levels() {
        let toc = parse_navigation(NESTED_NCX).unwrap();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].label, "A");
        assert_eq!(toc[0].level, 1);
        assert_eq!(toc[0].children.len(), 2);
        assert_eq!(toc[0].children[1].href, "text/a.xhtml#s2");
        assert_eq!(toc[0].children[1].level, 2);
        assert_eq!(toc[1].label, "B & C");

        let flat: Vec<&str> = flatten_chapters(&toc)
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(flat, vec!["A", "A1", "A2", "B & C"]);
    }

    #[test]
    fn ncx_node_count_matches_navpoints() {
        let toc = parse_navigation(NESTED_NCX).unwrap();
        let nav_points = NESTED_NCX.matches("<navPoint ").count();
        assert_eq!(flatten_chapters(&toc).len(), nav_points);
    }

    #[test]
    fn ncx_missing_label_and_href() {
        let ncx = r#"<ncx><navMap>
<navPoint id="x"><navLabel><text>  </text></navLabel></navPoint>
</navMap></ncx>"#;
        let toc = parse_navigation(ncx).unwrap();
        assert_eq!(toc[0].label, PLACEHOLDER_LABEL);
        assert_eq!(toc[0].href, "");
    }

    #[test]
    fn nav_xhtml_nested() {
        let nav_html = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
<nav epub:type="toc">
<ol>
<li><a href="part1.xhtml">Part 1</a>
<ol>
<li><a href="ch1.xhtml">Chapter 1</a></li>
<li><a href="ch2.xhtml">Chapter 2</a></li>
</ol>
</li>
<li><span>Appendix</span></li>
</ol>
</nav>
<nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
</body>
</html>"#;
        let toc = parse_navigation(nav_html).unwrap();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].label, "Part 1");
        assert_eq!(toc[0].level, 1);
        assert_eq!(toc[0].children.len(), 2);
        assert_eq!(toc[0].children[0].label, "Chapter 1");
        assert_eq!(toc[0].children[0].level, 2);
        assert_eq!(toc[1].label, "Appendix");
        assert_eq!(toc[1].href, "");
    }

    #[test]
    fn unrecognized_document_is_missing_navigation() {
        let err = parse_navigation("<html><body><p>hi</p></body></html>").unwrap_err();
        assert!(matches!(err, FolioError::NavigationMissing(_)));
    }

    #[test]
    fn malformed_ncx_is_missing_navigation() {
        let err = parse_navigation("<ncx><navMap><navPoint></navMap></ncx>").unwrap_err();
        assert!(matches!(err, FolioError::NavigationMissing(_)));
    }
}
