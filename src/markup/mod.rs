//! A small owned markup tree built on quick-xml events.
//!
//! Chapter documents are XHTML, but real books contain HTML-isms (named
//! entities, unclosed void elements, stray end tags). The builder is
//! tolerant of those: unknown entities are kept verbatim and mismatched end
//! tags close up to the nearest matching open element.

pub mod sanitize;

use quick_xml::escape::{escape, partial_escape, resolve_html5_entity, unescape_with};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;

/// Elements that never have content.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

/// Read access to a parsed node, independent of the parser behind it.
pub trait MarkupNode {
    /// Lowercase local name (`svg:image` → `image`).
    fn tag_name(&self) -> &str;
    fn children(&self) -> &[Node];
    /// Concatenated text of all descendants.
    fn text_content(&self) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out);
        out
    }

    fn write_markup(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write_markup(out),
            Node::Text(t) => out.push_str(&partial_escape(t.as_str())),
        }
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Element(e) => {
                for child in &e.children {
                    child.collect_text(out);
                }
            }
            Node::Text(t) => out.push_str(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Qualified name as written in the source.
    pub name: String,
    local: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl MarkupNode for Element {
    fn tag_name(&self) -> &str {
        &self.local
    }

    fn children(&self) -> &[Node] {
        &self.children
    }

    fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.collect_text(&mut out);
        }
        out
    }
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            local: local_of(name),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(idx).1)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Depth-first, pre-order search including `self`.
    pub fn find(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.child_elements().find_map(|c| c.find(pred))
    }

    pub fn find_mut(&mut self, pred: &dyn Fn(&Element) -> bool) -> Option<&mut Element> {
        if pred(self) {
            return Some(self);
        }
        self.child_elements_mut().find_map(|c| c.find_mut(pred))
    }

    /// Visit `self` and every descendant element, pre-order.
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        f(self);
        for child in self.child_elements_mut() {
            child.visit_mut(f);
        }
    }

    /// Serialized markup of this element, including its own tags.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out);
        out
    }

    /// Serialized markup of the children only.
    pub fn inner_markup(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.write_markup(&mut out);
        }
        out
    }

    fn write_markup(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v.as_str()));
            out.push('"');
        }
        if self.children.is_empty() && VOID_ELEMENTS.contains(&self.local.as_str()) {
            out.push_str(" />");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_markup(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// A parsed markup document: the top-level nodes in source order.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, quick_xml::Error> {
        Ok(Self {
            nodes: parse_nodes(text)?,
        })
    }

    pub fn body(&self) -> Option<&Element> {
        let is_body: &dyn Fn(&Element) -> bool = &|e| e.tag_name() == "body";
        self.nodes
            .iter()
            .filter_map(Node::as_element)
            .find_map(|e| e.find(is_body))
    }

    pub fn body_mut(&mut self) -> Option<&mut Element> {
        let is_body: &dyn Fn(&Element) -> bool = &|e| e.tag_name() == "body";
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Element(e) => e.find_mut(is_body),
            Node::Text(_) => None,
        })
    }
}

/// Parse a markup fragment into nodes. Also used for page-column strings.
pub fn parse_nodes(text: &str) -> Result<Vec<Node>, quick_xml::Error> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();

    let mut roots: Vec<Node> = Vec::new();
    let mut open: Vec<Element> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let element = element_from(e);
                if VOID_ELEMENTS.contains(&element.local.as_str()) {
                    attach(&mut open, &mut roots, Node::Element(element));
                } else {
                    open.push(element);
                }
            }
            Event::Empty(ref e) => {
                attach(&mut open, &mut roots, Node::Element(element_from(e)));
            }
            Event::Text(ref e) => {
                let text = decode_text(e);
                if !text.is_empty() {
                    attach(&mut open, &mut roots, Node::Text(text));
                }
            }
            Event::CData(ref e) => {
                let text = String::from_utf8_lossy(e).into_owned();
                attach(&mut open, &mut roots, Node::Text(text));
            }
            Event::End(ref e) => {
                let local = local_of(&String::from_utf8_lossy(e.name().as_ref()));
                if let Some(pos) = open.iter().rposition(|el| el.local == local) {
                    while open.len() > pos {
                        close_top(&mut open, &mut roots);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    while !open.is_empty() {
        close_top(&mut open, &mut roots);
    }
    Ok(roots)
}

fn attach(open: &mut [Element], roots: &mut Vec<Node>, node: Node) {
    match open.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn close_top(open: &mut Vec<Element>, roots: &mut Vec<Node>) {
    if let Some(done) = open.pop() {
        attach(open, roots, Node::Element(done));
    }
}

fn element_from(e: &BytesStart) -> Element {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut element = Element::new(&name);
    for attr in e.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value);
        element.attrs.push((key, unescape_lenient(&raw)));
    }
    element
}

fn local_of(name: &str) -> String {
    name.rsplit(':').next().unwrap_or(name).to_ascii_lowercase()
}

/// Resolve character and HTML5 named references one at a time. A reference
/// that cannot be resolved is kept as written, so one unknown name does not
/// leave its neighbours encoded.
fn unescape_lenient(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let semi = tail[1..]
            .find(|c: char| c == ';' || c == '&' || c == '<' || c.is_whitespace())
            .map(|i| i + 1)
            .filter(|&i| tail.as_bytes()[i] == b';');
        let Some(semi) = semi else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let reference = &tail[..=semi];
        match unescape_with(reference, resolve_html5_entity) {
            Ok(decoded) => out.push_str(&decoded),
            Err(_) => out.push_str(reference),
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}

/// Decode a text event, keeping unknown entities as written.
pub(crate) fn decode_text(e: &BytesText) -> String {
    unescape_lenient(&String::from_utf8_lossy(e))
}

/// Unescaped value of an attribute matched by full or local name.
pub(crate) fn attr_value(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.as_ref() == key || a.key.local_name().as_ref() == key)
        .map(|a| unescape_lenient(&String::from_utf8_lossy(&a.value)))
}
