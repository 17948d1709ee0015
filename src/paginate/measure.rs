//! Height estimation for pagination.
//!
//! There is no layout engine here: the default measurer approximates line
//! wrapping from average glyph width and line height. Anything better (a
//! headless renderer, real font metrics) plugs in through [`BlockMeasurer`].

use crate::markup::{Element, MarkupNode, Node, parse_nodes};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Elements that start a new line box when measured.
const BLOCK_LEVEL: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "nav", "ol", "p", "pre",
    "section", "table", "tr", "ul",
];

/// Elements measured as pictures.
const IMAGE_LIKE: &[&str] = &["img", "image", "svg"];

/// Supplies rendered heights for blocks of markup.
pub trait BlockMeasurer {
    /// Estimated height of `markup` laid out in a column `column_width` wide.
    fn measure_block(&self, markup: &str, column_width: f32) -> f32;

    /// Wait, at most `limit`, until the referenced images can be measured.
    /// Returns false if the wait ran out.
    ///
    /// Images are embedded as data URIs before pagination, so by default
    /// there is nothing to wait for.
    fn await_images(&self, _sources: &[&str], _limit: Duration) -> bool {
        true
    }
}

impl<F> BlockMeasurer for F
where
    F: Fn(&str, f32) -> f32,
{
    fn measure_block(&self, markup: &str, column_width: f32) -> f32 {
        self(markup, column_width)
    }
}

/// Typography the estimate is based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Typography {
    pub font_size: f32,
    /// Line height as a multiple of the font size.
    pub line_height: f32,
    /// Average glyph advance as a fraction of the font size.
    pub average_char_width: f32,
    /// Vertical margin added after each block-level element.
    pub block_spacing: f32,
    /// Height used for images without usable dimensions.
    pub image_placeholder_height: f32,
}

impl Default for Typography {
    fn default() -> Self {
        Self {
            font_size: 20.0,
            line_height: 1.25,
            average_char_width: 0.5,
            block_spacing: 8.0,
            image_placeholder_height: 240.0,
        }
    }
}

/// Estimates heights from [`Typography`] alone.
#[derive(Debug, Clone, Default)]
pub struct FontMetricsMeasurer {
    pub typography: Typography,
}

impl FontMetricsMeasurer {
    pub fn new(typography: Typography) -> Self {
        Self { typography }
    }

    fn element_height(&self, el: &Element, width: f32) -> f32 {
        let tag = el.tag_name();
        if IMAGE_LIKE.contains(&tag) {
            return self.image_height(el, width);
        }
        if tag == "hr" {
            return self.typography.font_size + self.typography.block_spacing;
        }

        let scale = heading_scale(tag);
        let inner_width = match tag {
            "ul" | "ol" | "blockquote" | "dd" => (width - 2.0 * self.typography.font_size).max(1.0),
            _ => width,
        };

        let mut height = 0.0;
        let mut run = Run::default();
        for child in el.children() {
            match child {
                Node::Text(t) => run.push_text(t),
                Node::Element(c) if c.tag_name() == "br" => run.breaks += 1,
                Node::Element(c)
                    if BLOCK_LEVEL.contains(&c.tag_name()) || IMAGE_LIKE.contains(&c.tag_name()) =>
                {
                    height += self.run_height(&run, inner_width, scale);
                    run = Run::default();
                    height += self.element_height(c, inner_width);
                }
                Node::Element(c) => {
                    run.push_text(&c.text_content());
                    height += self.inline_images_height(c, inner_width);
                }
            }
        }
        height += self.run_height(&run, inner_width, scale);

        if BLOCK_LEVEL.contains(&tag) {
            height += self.typography.block_spacing * scale;
        }
        height
    }

    fn inline_images_height(&self, el: &Element, width: f32) -> f32 {
        el.child_elements()
            .map(|c| {
                if IMAGE_LIKE.contains(&c.tag_name()) {
                    self.image_height(c, width)
                } else {
                    self.inline_images_height(c, width)
                }
            })
            .sum()
    }

    fn run_height(&self, run: &Run, width: f32, scale: f32) -> f32 {
        if run.chars == 0 && run.breaks == 0 {
            return 0.0;
        }
        let font = self.typography.font_size * scale;
        let glyph = (font * self.typography.average_char_width).max(0.1);
        let per_line = ((width / glyph).floor() as usize).max(1);
        let lines = run.chars.div_ceil(per_line).max(1) + run.breaks;
        lines as f32 * font * self.typography.line_height
    }

    fn image_height(&self, el: &Element, width: f32) -> f32 {
        let h = el.attr("height").and_then(parse_px);
        let w = el.attr("width").and_then(parse_px);
        match (w, h) {
            (Some(w), Some(h)) if w > width => h * width / w,
            (_, Some(h)) => h,
            _ => self.typography.image_placeholder_height,
        }
    }
}

impl BlockMeasurer for FontMetricsMeasurer {
    fn measure_block(&self, markup: &str, column_width: f32) -> f32 {
        match parse_nodes(markup) {
            Ok(nodes) => nodes
                .iter()
                .filter_map(Node::as_element)
                .map(|e| self.element_height(e, column_width))
                .sum(),
            Err(e) => {
                log::warn!("measuring unparsable block as one placeholder: {e}");
                self.typography.image_placeholder_height
            }
        }
    }
}

/// Inline content waiting to be wrapped into lines.
#[derive(Default)]
struct Run {
    chars: usize,
    breaks: usize,
}

impl Run {
    fn push_text(&mut self, text: &str) {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return;
        }
        if self.chars > 0 {
            self.chars += 1;
        }
        self.chars += words.iter().map(|w| w.chars().count()).sum::<usize>() + words.len() - 1;
    }
}

fn heading_scale(tag: &str) -> f32 {
    match tag {
        "h1" => 2.0,
        "h2" => 1.5,
        "h3" => 1.17,
        "h5" => 0.83,
        "h6" => 0.67,
        _ => 1.0,
    }
}

fn parse_px(value: &str) -> Option<f32> {
    value
        .trim()
        .trim_end_matches("px")
        .parse::<f32>()
        .ok()
        .filter(|v| *v > 0.0)
}
