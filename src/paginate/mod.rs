//! Greedy two-column pagination of a chapter body.

pub mod measure;

use crate::chapter::HEADING_ATTR;
use crate::error::Result;
use crate::markup::{Element, MarkupNode, Node, parse_nodes};
use measure::BlockMeasurer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Elements placed on a page as one unbreakable unit.
pub const BLOCK_TAGS: &[&str] = &["p", "h1", "h2", "h3", "img", "div", "figure", "section", "article"];

/// Containers that may be opened up when they are too tall for a column.
const CONTAINER_TAGS: &[&str] = &["div", "figure", "section", "article"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Page {
    pub left: String,
    pub right: String,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub column_width: f32,
    pub max_column_height: f32,
    /// Upper bound on waiting for images before measuring.
    pub image_wait: Duration,
    /// Place the children of a too-tall container instead of skipping it.
    pub split_oversize_containers: bool,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            column_width: 480.0,
            max_column_height: 720.0,
            image_wait: Duration::from_millis(500),
            split_oversize_containers: false,
        }
    }
}

/// Pages of one chapter and the heading first seen on each page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pagination {
    pub pages: Vec<Page>,
    /// Page index → matched chapter title.
    pub headings: BTreeMap<usize, String>,
    /// Blocks dropped because they can never fit in a column.
    pub skipped: usize,
}

impl Pagination {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The heading in effect on `page`: the one recorded there, or else the
    /// closest one on an earlier page.
    pub fn heading_at(&self, page: usize) -> Option<&str> {
        self.headings
            .range(..=page)
            .next_back()
            .map(|(_, title)| title.as_str())
    }

    /// First page a heading titled `title` was recorded on.
    pub fn page_of_heading(&self, title: &str) -> Option<usize> {
        self.headings
            .iter()
            .find(|(_, t)| t.as_str() == title)
            .map(|(page, _)| *page)
    }
}

/// Top-level blocks of `root` in document order. The walk stops descending
/// at the first element with a block tag.
///
/// An element outside the block set whose subtree holds no block at all
/// (a list, a table, a lone `h4`) is kept as a unit of its own so its text
/// is not lost. Likewise a non-blank text run sitting beside blocks becomes
/// an anonymous unit. Anything inside a block is never placed separately.
pub fn collect_blocks(root: &Element) -> Vec<&Node> {
    let mut blocks = Vec::new();
    for child in &root.children {
        collect_into(child, &mut blocks);
    }
    blocks
}

fn collect_into<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    let el = match node {
        Node::Text(text) => {
            if !text.trim().is_empty() {
                out.push(node);
            }
            return;
        }
        Node::Element(el) => el,
    };
    if is_block(el) {
        out.push(node);
        return;
    }
    if contains_block(el) {
        for child in &el.children {
            collect_into(child, out);
        }
    } else if has_content(el) {
        out.push(node);
    }
}

fn is_block(el: &Element) -> bool {
    BLOCK_TAGS.contains(&el.tag_name())
}

fn contains_block(el: &Element) -> bool {
    el.child_elements().any(|c| is_block(c) || contains_block(c))
}

fn has_content(el: &Element) -> bool {
    !el.text_content().trim().is_empty()
        || el
            .find(&|e| matches!(e.tag_name(), "img" | "image" | "svg"))
            .is_some()
}

fn heading_of(el: &Element) -> Option<&str> {
    el.find(&|e| e.attr(HEADING_ATTR).is_some())
        .and_then(|e| e.attr(HEADING_ATTR))
}

fn image_sources(el: &Element, out: &mut Vec<String>) {
    for key in ["src", "xlink:href", "href"] {
        if matches!(el.tag_name(), "img" | "image")
            && let Some(src) = el.attr(key)
        {
            out.push(src.to_string());
            break;
        }
    }
    for child in el.child_elements() {
        image_sources(child, out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Left,
    Right,
}

/// Column accumulators for the page being filled.
#[derive(Default)]
struct PageBuilder {
    page: Page,
    left_height: f32,
    right_height: f32,
    column: Option<Column>,
}

impl PageBuilder {
    fn current(&self) -> Column {
        self.column.unwrap_or(Column::Left)
    }

    fn height(&self) -> f32 {
        match self.current() {
            Column::Left => self.left_height,
            Column::Right => self.right_height,
        }
    }

    fn push(&mut self, markup: &str, height: f32) {
        match self.current() {
            Column::Left => {
                self.page.left.push_str(markup);
                self.left_height += height;
            }
            Column::Right => {
                self.page.right.push_str(markup);
                self.right_height += height;
            }
        }
    }
}

struct Paginator<'m> {
    layout: &'m PageLayout,
    measurer: &'m dyn BlockMeasurer,
    pages: Vec<Page>,
    headings: BTreeMap<usize, String>,
    skipped: usize,
    builder: PageBuilder,
}

impl Paginator<'_> {
    fn place(&mut self, block: &Node, inherited_heading: Option<&str>) {
        let markup = block.to_markup();
        let height = self.measurer.measure_block(&markup, self.layout.column_width);
        let max = self.layout.max_column_height;
        let element = block.as_element();

        if height > max {
            let children: Vec<&Node> = match element {
                Some(el)
                    if self.layout.split_oversize_containers
                        && CONTAINER_TAGS.contains(&el.tag_name()) =>
                {
                    collect_blocks(el)
                }
                _ => Vec::new(),
            };
            let tag = element.map_or("#text", |el| el.tag_name());
            if children.is_empty() {
                log::warn!(
                    "skipping <{tag}> block of height {height:.0} taller than column height {max:.0}"
                );
                self.skipped += 1;
                return;
            }
            log::debug!(
                "splitting <{tag}> of height {height:.0} into {} blocks",
                children.len()
            );
            let heading = element
                .and_then(|el| el.attr(HEADING_ATTR))
                .or(inherited_heading);
            for (i, child) in children.into_iter().enumerate() {
                self.place(child, if i == 0 { heading } else { None });
            }
            return;
        }

        if self.builder.height() + height > max {
            if self.builder.current() == Column::Left && self.builder.page.right.is_empty() {
                self.builder.column = Some(Column::Right);
            } else {
                self.flush();
            }
        }
        self.builder.push(&markup, height);

        let page_index = self.pages.len();
        if let Some(title) = inherited_heading.or_else(|| element.and_then(heading_of)) {
            self.headings
                .entry(page_index)
                .or_insert_with(|| title.to_string());
        }
    }

    fn flush(&mut self) {
        let done = std::mem::take(&mut self.builder);
        if !done.page.is_empty() {
            self.pages.push(done.page);
        }
    }
}

/// Split chapter markup into two-column pages no taller than
/// `layout.max_column_height`.
///
/// Blocks are placed greedily: down the left column, then the right, then
/// onto a new page. A block taller than a whole column is skipped (or, for
/// containers, replaced by its own blocks when splitting is enabled).
pub fn paginate(
    markup: &str,
    layout: &PageLayout,
    measurer: &dyn BlockMeasurer,
) -> Result<Pagination> {
    let nodes = parse_nodes(markup)?;

    let mut sources = Vec::new();
    for root in nodes.iter().filter_map(Node::as_element) {
        image_sources(root, &mut sources);
    }
    if !sources.is_empty() {
        let refs: Vec<&str> = sources.iter().map(String::as_str).collect();
        if !measurer.await_images(&refs, layout.image_wait) {
            log::warn!(
                "measuring before {} images finished loading",
                refs.len()
            );
        }
    }

    let mut paginator = Paginator {
        layout,
        measurer,
        pages: Vec::new(),
        headings: BTreeMap::new(),
        skipped: 0,
        builder: PageBuilder::default(),
    };
    let mut blocks = Vec::new();
    for root in &nodes {
        match root {
            Node::Element(el) if !is_block(el) => blocks.extend(collect_blocks(el)),
            other => collect_into(other, &mut blocks),
        }
    }
    for block in blocks {
        paginator.place(block, None);
    }
    paginator.flush();

    log::debug!(
        "paginated into {} pages ({} headings, {} skipped)",
        paginator.pages.len(),
        paginator.headings.len(),
        paginator.skipped
    );
    Ok(Pagination {
        pages: paginator.pages,
        headings: paginator.headings,
        skipped: paginator.skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paginate::measure::{FontMetricsMeasurer, Typography};

    fn layout(max: f32) -> PageLayout {
        PageLayout {
            column_width: 300.0,
            max_column_height: max,
            ..PageLayout::default()
        }
    }

    /// Height is the number in the block's `data-h` attribute.
    fn by_attr(markup: &str, _: f32) -> f32 {
        let re = regex::Regex::new(r#"data-h="(\d+)""#).unwrap();
        re.captures(markup)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0.0)
    }

    fn blocks(heights: &[u32]) -> String {
        let body: String = heights
            .iter()
            .enumerate()
            .map(|(i, h)| format!(r#"<p data-h="{h}">P{}</p>"#, i + 1))
            .collect();
        format!("<body>{body}</body>")
    }

    fn labels(column: &str) -> String {
        regex::Regex::new(r">(P\d+)<")
            .unwrap()
            .captures_iter(column)
            .map(|c| c[1].to_string())
            .collect::<Vec<_>>()
            .join("+")
    }

    fn shape(p: &Pagination) -> Vec<(String, String)> {
        p.pages
            .iter()
            .map(|page| (labels(&page.left), labels(&page.right)))
            .collect()
    }

    #[test]
    fn equal_blocks_fill_left_then_right() {
        let p = paginate(&blocks(&[200, 200, 200, 200, 200]), &layout(450.0), &by_attr).unwrap();
        assert_eq!(
            shape(&p),
            vec![
                ("P1+P2".to_string(), "P3+P4".to_string()),
                ("P5".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn overflowing_right_column_starts_a_new_page() {
        let p = paginate(&blocks(&[200, 200, 200, 260, 180]), &layout(450.0), &by_attr).unwrap();
        assert_eq!(
            shape(&p),
            vec![
                ("P1+P2".to_string(), "P3".to_string()),
                ("P4+P5".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn block_taller_than_column_is_skipped() {
        let p = paginate(&blocks(&[100, 500, 100]), &layout(450.0), &by_attr).unwrap();
        assert_eq!(p.skipped, 1);
        assert_eq!(shape(&p), vec![("P1+P3".to_string(), String::new())]);
    }

    #[test]
    fn every_placed_block_appears_in_order() {
        let heights = [120, 330, 90, 450, 10, 200, 200, 460, 5, 300, 300];
        let p = paginate(&blocks(&heights), &layout(450.0), &by_attr).unwrap();
        let all: String = p
            .pages
            .iter()
            .map(|page| format!("{}{}", page.left, page.right))
            .collect();
        let expected: Vec<String> = heights
            .iter()
            .enumerate()
            .filter(|(_, h)| **h <= 450)
            .map(|(i, _)| format!("P{}", i + 1))
            .collect();
        assert_eq!(labels(&all), expected.join("+"));
        assert_eq!(p.skipped, 1);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let markup = blocks(&[120, 330, 90, 450, 10, 200]);
        let a = paginate(&markup, &layout(450.0), &by_attr).unwrap();
        let b = paginate(&markup, &layout(450.0), &by_attr).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn headings_recorded_once_per_page() {
        let markup = format!(
            "<body><h1 data-h=\"100\" {HEADING_ATTR}=\"One\">P1</h1>\
             <h2 data-h=\"100\" {HEADING_ATTR}=\"Two\">P2</h2>\
             <p data-h=\"400\">P3</p>\
             <p data-h=\"400\">P4</p>\
             <div data-h=\"100\"><h3 {HEADING_ATTR}=\"Four\">P5</h3></div></body>"
        );
        let p = paginate(&markup, &layout(450.0), &by_attr).unwrap();
        assert_eq!(
            shape(&p),
            vec![
                ("P1+P2".to_string(), "P3".to_string()),
                ("P4".to_string(), "P5".to_string()),
            ]
        );
        assert_eq!(p.headings.get(&0).map(String::as_str), Some("One"));
        assert_eq!(p.headings.get(&1).map(String::as_str), Some("Four"));
        assert_eq!(p.heading_at(1), Some("Four"));
        assert_eq!(p.page_of_heading("Four"), Some(1));
        assert_eq!(p.page_of_heading("Two"), None);
    }

    #[test]
    fn blocks_stop_descent_and_inline_wrappers_are_descended() {
        let nodes = parse_nodes(
            "<body><span><p>a</p></span><div><p>b</p><p>c</p></div><ul><li>d</li></ul><span> </span></body>",
        )
        .unwrap();
        let body = nodes[0].as_element().unwrap();
        let tags: Vec<&str> = collect_blocks(body)
            .iter()
            .filter_map(|n| n.as_element())
            .map(|e| e.tag_name())
            .collect();
        assert_eq!(tags, vec!["p", "div", "ul"]);
    }

    #[test]
    fn stray_text_beside_blocks_is_placed() {
        let markup = "<body>Opening line<p>P1</p><blockquote>Quoted intro<p>P2</p> </blockquote></body>";
        let nodes = parse_nodes(markup).unwrap();
        let body = nodes[0].as_element().unwrap();
        let units: Vec<String> = collect_blocks(body).iter().map(|n| n.to_markup()).collect();
        assert_eq!(units, vec!["Opening line", "<p>P1</p>", "Quoted intro", "<p>P2</p>"]);

        let p = paginate(markup, &layout(450.0), &|_: &str, _: f32| 100.0).unwrap();
        let all: String = p.pages.iter().map(|page| format!("{}{}", page.left, page.right)).collect();
        assert_eq!(all, "Opening line<p>P1</p>Quoted intro<p>P2</p>");
    }

    #[test]
    fn oversize_container_is_split_into_its_blocks() {
        let markup = format!(
            "<body><section data-h=\"900\" {HEADING_ATTR}=\"Intro\"><p data-h=\"300\">P1</p><p data-h=\"300\">P2</p></section></body>"
        );
        let splitting = PageLayout {
            split_oversize_containers: true,
            ..layout(450.0)
        };
        let p = paginate(&markup, &splitting, &by_attr).unwrap();
        assert_eq!(p.skipped, 0);
        assert_eq!(shape(&p), vec![("P1".to_string(), "P2".to_string())]);
        assert_eq!(p.headings.get(&0).map(String::as_str), Some("Intro"));
    }

    #[test]
    fn oversize_container_is_skipped_by_default() {
        let markup = "<body><div data-h=\"900\"><p data-h=\"300\">P1</p><p data-h=\"300\">P2</p></div></body>";
        let p = paginate(markup, &layout(450.0), &by_attr).unwrap();
        assert!(!PageLayout::default().split_oversize_containers);
        assert_eq!(p.skipped, 1);
        assert!(p.pages.is_empty());
    }

    #[test]
    fn empty_body_has_no_pages() {
        let p = paginate("<body></body>", &layout(450.0), &by_attr).unwrap();
        assert!(p.pages.is_empty());
        assert!(p.headings.is_empty());
    }

    #[test]
    fn font_metrics_snapshot() {
        let measurer = FontMetricsMeasurer::new(Typography {
            font_size: 20.0,
            line_height: 1.0,
            average_char_width: 0.5,
            block_spacing: 0.0,
            image_placeholder_height: 100.0,
        });
        let markup = "<body><h1>Title</h1><p>first paragraph</p><img src=\"x\"/><p>second</p></body>";
        let p = paginate(markup, &layout(100.0), &measurer).unwrap();
        insta::assert_snapshot!(
            format!("{:#?}", p.pages),
            @r#"
        [
            Page {
                left: "<h1>Title</h1><p>first paragraph</p>",
                right: "<img src=\"x\" />",
            },
            Page {
                left: "<p>second</p>",
                right: "",
            },
        ]
        "#
        );
    }
}
