//! Strip active content from chapter markup before it is displayed.

use crate::markup::{Element, MarkupNode, Node};

/// Elements removed together with their content.
const FORBIDDEN_ELEMENTS: &[&str] = &[
    "script", "iframe", "frame", "frameset", "object", "embed", "applet", "base", "meta", "link",
    "form", "noscript",
];

/// Attributes whose value is a URL and must not use a script scheme.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "xlink:href", "action", "formaction", "poster"];

/// Remove forbidden elements, event-handler attributes and `javascript:` URLs
/// from `root` and all of its descendants.
pub fn sanitize(root: &mut Element) {
    root.children.retain(|child| match child {
        Node::Element(e) => !FORBIDDEN_ELEMENTS.contains(&e.tag_name()),
        Node::Text(_) => true,
    });
    root.attrs.retain(|(name, value)| is_safe_attr(name, value));
    for child in root.child_elements_mut() {
        sanitize(child);
    }
}

fn is_safe_attr(name: &str, value: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("on") {
        return false;
    }
    if URL_ATTRIBUTES.contains(&lower.as_str()) {
        let scheme: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .take(11)
            .collect::<String>()
            .to_ascii_lowercase();
        return !(scheme.starts_with("javascript:") || scheme.starts_with("vbscript:"));
    }
    true
}
