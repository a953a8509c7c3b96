//! Self-contained HTML reports built from maud markup and plotly figures.

use anyhow::{Context, Result};
use chrono::Local;
use maud::{html, Markup, PreEscaped, DOCTYPE};
use plotly::Plot;
use std::path::Path;

use crate::util::write_bytes_to_file;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.27.0.min.js";

const STYLE: &str = "
body { font-family: -apple-system, 'Segoe UI', Helvetica, Arial, sans-serif; margin: 0 auto; max-width: 1100px; padding: 20px; color: #222; }
header { border-bottom: 2px solid #ddd; margin-bottom: 20px; }
header .meta { color: #777; font-size: 0.9em; }
section { margin-bottom: 40px; }
table { border-collapse: collapse; margin: 10px 0; }
th, td { border: 1px solid #ddd; padding: 6px 12px; text-align: right; }
th:first-child, td:first-child { text-align: left; }
.failed { color: #b00020; }
.code-container { background-color: #f5f5f5; padding: 10px; border-radius: 5px; overflow-x: auto; font-family: monospace; white-space: pre-wrap; }
";

pub struct ReportSection {
    title: String,
    content: Vec<Markup>,
    plots: usize,
}

impl ReportSection {
    pub fn new(title: &str) -> Self {
        ReportSection {
            title: title.to_string(),
            content: Vec::new(),
            plots: 0,
        }
    }

    pub fn add_content(&mut self, content: Markup) {
        self.content.push(content);
    }

    /// Embed a figure. Div ids only need to be unique within the page, so they
    /// are derived from the section title and the figure's position.
    pub fn add_plot(&mut self, plot: Plot) {
        self.plots += 1;
        let slug: String = self
            .title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let id = format!("plot-{}-{}", slug, self.plots);
        self.content
            .push(PreEscaped(plot.to_inline_html(Some(id.as_str()))));
    }

    fn render(&self) -> Markup {
        html! {
            section {
                h2 { (self.title) }
                @for item in &self.content {
                    div class="item" { (item) }
                }
            }
        }
    }
}

pub struct Report {
    title: String,
    version: String,
    sections: Vec<ReportSection>,
}

impl Report {
    pub fn new(title: &str, version: &str) -> Self {
        Report {
            title: title.to_string(),
            version: version.to_string(),
            sections: Vec::new(),
        }
    }

    pub fn add_section(&mut self, section: ReportSection) {
        self.sections.push(section);
    }

    pub fn render(&self) -> Markup {
        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    title { (self.title) }
                    script src=(PLOTLY_CDN) {}
                    style { (PreEscaped(STYLE)) }
                }
                body {
                    header {
                        h1 { (self.title) }
                        p class="meta" {
                            "polarity " (self.version) " | generated "
                            (Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
                        }
                    }
                    @for section in &self.sections {
                        (section.render())
                    }
                }
            }
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        write_bytes_to_file(path, self.render().into_string().as_bytes())
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        log::info!("Report written to {}", path.display());
        Ok(())
    }
}

/// A pretty-printed JSON block.
pub fn code_block(json: &str) -> Markup {
    html! {
        div class="code-container" {
            pre {
                code { (json) }
            }
        }
    }
}
