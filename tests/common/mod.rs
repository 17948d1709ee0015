#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

/// Assembles an EPUB archive in memory.
#[derive(Default)]
pub struct EpubBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    pub fn new() -> Self {
        Self::default().file("mimetype", "application/epub+zip")
    }

    pub fn file(mut self, name: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.push((name.to_string(), content.as_ref().to_vec()));
        self
    }

    /// Add an XHTML chapter whose `<body>` holds `body`.
    pub fn chapter(self, name: &str, body: &str) -> Self {
        self.file(name, xhtml(body))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in &self.files {
            zip.start_file(name.as_str(), SimpleFileOptions::default())
                .expect("start zip entry");
            zip.write_all(content).expect("write zip entry");
        }
        zip.finish().expect("finish zip").into_inner()
    }

    /// Write the archive into `dir` and return its path.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("write epub");
        path
    }
}

pub fn xhtml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Chapter</title><link rel="stylesheet" href="../Styles/a.css"/></head>
<body>{body}</body>
</html>"#
    )
}

/// A `<navPoint>` with optional nested points.
pub fn nav_point(label: &str, src: &str, children: &str) -> String {
    format!(
        r#"<navPoint id="np-{id}"><navLabel><text>{label}</text></navLabel><content src="{src}"/>{children}</navPoint>"#,
        id = label.replace(' ', "-")
    )
}

pub fn ncx(points: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
<head><meta name="dtb:uid" content="test"/></head>
<docTitle><text>Test Book</text></docTitle>
<navMap>{}</navMap>
</ncx>"#,
        points.concat()
    )
}

/// Bytes standing in for a PNG; only the extension matters to the reader.
pub const FIG1_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfigure-one";

/// A small book laid out like a typical EPUB 2 export, with one chapter
/// listed twice under different file names.
pub fn sample_book() -> EpubBuilder {
    let toc = ncx(&[
        nav_point(
            "Chapter One",
            "Text/ch01.xhtml",
            &nav_point("Section 1.1", "Text/ch01.xhtml#s11", ""),
        ),
        nav_point("Chapter Two", "Text/ch02.xhtml", ""),
        nav_point("Chapter Two Again", "Text/ch02-copy.xhtml", ""),
        nav_point("Epilogue", "Text/ch03.xhtml", ""),
    ]);
    let ch02 = "<h1>Chapter Two</h1><p>The second chapter, shipped twice.</p>";
    EpubBuilder::new()
        .file("OEBPS/toc.ncx", toc)
        .file("OEBPS/Styles/a.css", "p { text-indent: 1em; }")
        .file("OEBPS/Styles/b.css", "h1 { text-align: center; }")
        .file("OEBPS/Images/fig1.png", FIG1_PNG)
        .chapter(
            "OEBPS/Text/ch01.xhtml",
            r#"<h1>Chapter One</h1>
<p>It was a bright cold day in April.</p>
<script>alert("x")</script>
<p><img src="../Images/fig1.png" alt="Figure 1"/></p>
<h2 id="s11">Section 1.1</h2>
<p onclick="steal()">A short section.</p>"#,
        )
        .chapter("OEBPS/Text/ch02.xhtml", ch02)
        .chapter("OEBPS/Text/ch02-copy.xhtml", ch02)
        .chapter("OEBPS/Text/ch03.xhtml", "<h1>Epilogue</h1><p>The end.</p>")
}

/// A chapter of `count` paragraphs, each long enough to wrap.
pub fn long_chapter_body(count: usize) -> String {
    (1..=count)
        .map(|i| {
            format!(
                "<p>Paragraph {i}. {}</p>",
                "Words fill the line until it wraps around again. ".repeat(i % 4 + 1)
            )
        })
        .collect()
}
