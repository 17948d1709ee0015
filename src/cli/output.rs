use std::io::{self, IsTerminal, Write};

pub struct OutputConfig {
    pub json: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub no_color: bool,
}

impl OutputConfig {
    pub fn from_global(json: bool, verbose: bool, quiet: bool, no_color: bool) -> Self {
        let no_color = no_color || std::env::var("NO_COLOR").is_ok() || !io::stderr().is_terminal();
        Self {
            json,
            verbose,
            quiet,
            no_color,
        }
    }

    pub fn is_tty(&self) -> bool {
        io::stdout().is_terminal()
    }

    /// Route library logging to stderr. `RUST_LOG` overrides the level picked
    /// from `--verbose`/`--quiet`.
    pub fn init_logging(&self) {
        let level = if self.quiet {
            log::LevelFilter::Error
        } else if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        };
        let style = if self.no_color {
            env_logger::WriteStyle::Never
        } else {
            env_logger::WriteStyle::Auto
        };
        env_logger::builder()
            .filter_level(level)
            .write_style(style)
            .parse_default_env()
            .init();
    }

    /// Print a status/confirmation message (suppressed in quiet mode).
    pub fn status(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    /// Print extra detail (only shown in verbose mode, suppressed in quiet mode).
    pub fn detail(&self, msg: &str) {
        if self.verbose && !self.quiet {
            println!("{msg}");
        }
    }

    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        writeln!(io::stdout(), "{json}")?;
        Ok(())
    }

    pub fn print_table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if rows.is_empty() {
            return;
        }

        let aligned = self.is_tty() && !self.no_color;
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.chars().count());
                }
            }
        }
        println!("{}", render_row(headers.iter().copied(), &widths, aligned));
        if aligned {
            let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            println!("{}", sep.join("  "));
        }
        for row in rows {
            println!("{}", render_row(row.iter().map(String::as_str), &widths, aligned));
        }
    }
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize], aligned: bool) -> String {
    if aligned {
        cells
            .zip(widths)
            .map(|(c, w)| format!("{c:<width$}", width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    } else {
        cells.collect::<Vec<_>>().join("\t")
    }
}
