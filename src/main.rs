mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::output::OutputConfig;
use cli::{Cli, Command, Step};
use folio::config::ReaderConfig;
use folio::epub::Chapter;
use folio::epub::resources::image_mime;
use folio::reader::source::{BookSource, DirectorySource};
use folio::reader::{OpenBook, Position, ReaderController};
use std::path::Path;

/// Format a byte count as a human-readable size string.
fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = OutputConfig::from_global(cli.json, cli.verbose, cli.quiet, cli.no_color);
    output.init_logging();

    let config = ReaderConfig::load(cli.config.as_deref()).context("failed to load reader settings")?;

    match cli.command {
        Command::Toc { file, depth } => handle_toc(&file, depth, &output)?,
        Command::Resources { file } => handle_resources(&file, &output)?,
        Command::Duplicates { file } => handle_duplicates(&file, &output)?,
        Command::Chapter {
            file,
            href,
            tag_headings,
        } => handle_chapter(&file, &href, tag_headings, &config, &output)?,
        Command::Paginate {
            file,
            href,
            height,
            width,
        } => {
            let config = config.with_overrides(width, height)?;
            handle_paginate(&file, href.as_deref(), config, &output)?
        }
        Command::Read {
            file,
            steps,
            height,
            width,
        } => {
            let steps = cli::parse_steps(&steps).map_err(anyhow::Error::msg)?;
            let config = config.with_overrides(width, height)?;
            handle_read(&file, &steps, config, &output)?
        }
        Command::Library { dir } => handle_library(&dir, &output)?,
    }

    Ok(())
}

fn read_bytes(file: &Path) -> Result<Vec<u8>> {
    std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))
}

fn open_book(file: &Path) -> Result<OpenBook> {
    OpenBook::open(read_bytes(file)?).with_context(|| format!("cannot open book {}", file.display()))
}

fn handle_toc(file: &Path, depth: Option<usize>, output: &OutputConfig) -> Result<()> {
    fn truncate(chapters: &[Chapter], depth: Option<usize>) -> Vec<Chapter> {
        chapters
            .iter()
            .filter(|c| depth.is_none_or(|max| c.level <= max))
            .map(|c| Chapter {
                children: truncate(&c.children, depth),
                ..c.clone()
            })
            .collect()
    }

    fn print_toc(chapters: &[Chapter]) {
        for chapter in chapters {
            let prefix = "  ".repeat(chapter.level.saturating_sub(1));
            if chapter.href.is_empty() {
                println!("{prefix}- {}", chapter.label);
            } else {
                println!("{prefix}- {} ({})", chapter.label, chapter.href);
            }
            print_toc(&chapter.children);
        }
    }

    let book = open_book(file)?;
    let chapters = truncate(book.chapters(), depth);
    if output.json {
        output.print_json(&chapters)?;
    } else {
        output.detail(&format!("navigation: {}", book.navigation_path()));
        print_toc(&chapters);
    }
    Ok(())
}

fn handle_resources(file: &Path, output: &OutputConfig) -> Result<()> {
    let book = open_book(file)?;
    let images = book.images();
    let rows: Vec<Vec<String>> = images
        .keys()
        .into_iter()
        .map(|path| {
            let uri_len = images.get(path).map_or(0, str::len);
            vec![
                path.to_string(),
                image_mime(path).unwrap_or("").to_string(),
                format_size(uri_len),
            ]
        })
        .collect();

    if output.json {
        let images: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| serde_json::json!({ "path": r[0], "mime": r[1] }))
            .collect();
        output.print_json(&serde_json::json!({
            "stylesheet_bytes": book.stylesheet().len(),
            "images": images,
        }))?;
    } else {
        println!("Stylesheets: {}", format_size(book.stylesheet().len()));
        println!("Images: {}", rows.len());
        output.print_table(&["PATH", "TYPE", "EMBEDDED"], &rows);
    }
    Ok(())
}

fn handle_duplicates(file: &Path, output: &OutputConfig) -> Result<()> {
    let book = open_book(file)?;
    let groups = book.duplicates();
    if output.json {
        output.print_json(groups)?;
    } else if groups.is_empty() {
        output.status("No duplicate chapters");
    } else {
        for (hash, hrefs) in groups.iter() {
            println!("{}: {}", &hash[..hash.len().min(12)], hrefs.join(", "));
        }
    }
    Ok(())
}

fn handle_chapter(
    file: &Path,
    href: &str,
    tag_headings: bool,
    config: &ReaderConfig,
    output: &OutputConfig,
) -> Result<()> {
    let mut book = open_book(file)?;
    let chapter = book
        .load_chapter(href, tag_headings.then_some(config.heading_threshold))
        .with_context(|| format!("loading chapter {href}"))?;

    if output.json {
        output.print_json(&serde_json::json!({
            "href": chapter.href,
            "entry": chapter.entry,
            "headings": chapter.headings,
            "markup": chapter.markup,
        }))?;
    } else {
        for heading in &chapter.headings {
            output.detail(&format!(
                "heading <{}> {:?} -> {:?} ({:.2})",
                heading.tag, heading.text, heading.title, heading.similarity
            ));
        }
        println!("{}", chapter.markup);
    }
    Ok(())
}

fn open_reader(file: &Path, config: ReaderConfig) -> Result<ReaderController> {
    let mut reader = ReaderController::new(config);
    reader
        .open_book(read_bytes(file)?)
        .with_context(|| format!("cannot open book {}", file.display()))?;
    Ok(reader)
}

fn handle_paginate(
    file: &Path,
    href: Option<&str>,
    config: ReaderConfig,
    output: &OutputConfig,
) -> Result<()> {
    let mut reader = open_reader(file, config)?;
    let position = match href {
        Some(href) => reader.open_chapter(href),
        None => reader.start(),
    }
    .context("failed to paginate chapter")?;
    let Some(pagination) = reader.pagination() else {
        anyhow::bail!("no chapter is displayed");
    };

    if output.json {
        output.print_json(&serde_json::json!({
            "href": position.href,
            "pages": pagination.pages,
            "headings": pagination.headings,
            "skipped": pagination.skipped,
        }))?;
        return Ok(());
    }

    output.status(&format!(
        "{}: {} pages",
        position.href,
        pagination.page_count()
    ));
    if pagination.skipped > 0 {
        output.status(&format!("{} blocks too tall to place", pagination.skipped));
    }
    for (i, page) in pagination.pages.iter().enumerate() {
        match pagination.headings.get(&i) {
            Some(title) => println!("== page {} ({title}) ==", i + 1),
            None => println!("== page {} ==", i + 1),
        }
        println!("[left]\n{}", page.left);
        println!("[right]\n{}", page.right);
    }
    Ok(())
}

fn describe(position: &Position) -> String {
    let mut line = format!(
        "{}  {}/{}  {}",
        position.href,
        position.page + 1,
        position.page_count.max(1),
        position.breadcrumbs.join(" > ")
    );
    if let Some(heading) = &position.heading {
        line.push_str(&format!("  [{heading}]"));
    }
    line
}

fn handle_read(file: &Path, steps: &[Step], config: ReaderConfig, output: &OutputConfig) -> Result<()> {
    let mut reader = open_reader(file, config)?;
    let mut visited: Vec<serde_json::Value> = Vec::new();

    let mut record = |result: folio::Result<Position>| -> Result<()> {
        match result {
            Ok(position) => {
                if output.json {
                    visited.push(serde_json::to_value(&position)?);
                } else {
                    println!("{}", describe(&position));
                }
            }
            Err(e) if !e.is_fatal() => {
                if output.json {
                    visited.push(serde_json::json!({ "error": e.to_string() }));
                } else {
                    println!("error: {e}");
                }
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    };

    record(reader.start())?;
    for step in steps {
        let result = match step {
            Step::Next => reader.next_page(),
            Step::Prev => reader.prev_page(),
        };
        record(result)?;
    }

    if output.json {
        output.print_json(&visited)?;
    }
    Ok(())
}

fn handle_library(dir: &Path, output: &OutputConfig) -> Result<()> {
    let source = DirectorySource::new(dir);
    let names = source
        .list()
        .with_context(|| format!("failed to list {}", dir.display()))?;

    let mut rows = Vec::with_capacity(names.len());
    for name in &names {
        let bytes = source.fetch_book_bytes(name)?;
        let size = format_size(bytes.len());
        let chapters = match OpenBook::open(bytes) {
            Ok(book) => book.reading_order().len().to_string(),
            Err(e) => {
                log::warn!("{name}: {e}");
                "-".to_string()
            }
        };
        rows.push(vec![name.clone(), size, chapters]);
    }

    if output.json {
        let books: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| serde_json::json!({ "name": r[0], "size": r[1], "chapters": r[2] }))
            .collect();
        output.print_json(&books)?;
    } else if rows.is_empty() {
        output.status("No books found");
    } else {
        output.print_table(&["NAME", "SIZE", "CHAPTERS"], &rows);
    }
    Ok(())
}
