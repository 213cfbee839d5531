//! Output formatting module for Fanout
//!
//! Structured documents (JSON, YAML) go to stdout untouched; human output is
//! colored unless disabled. Diagnostics always go to stderr.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::OutputFormat;

/// Output formatter for different output modes
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    format: OutputFormat,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, format: OutputFormat) -> Self {
        Self { use_color, format }
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    pub fn is_human(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Render a value in the selected structured format
    pub fn render<T: Serialize>(&self, value: &T) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(value)?,
            OutputFormat::Json | OutputFormat::Human => serde_json::to_string_pretty(value)?,
        })
    }

    /// Print a value as a structured document
    pub fn document<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = self.render(value)?;
        println!("{}", text.trim_end());
        Ok(())
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.use_color {
            println!("{}", title.cyan().bold());
        } else {
            println!("{}", title);
        }
    }

    /// Print an indented list item
    pub fn item(&self, text: &str) {
        println!("    {}", text);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "[WARNING]:".magenta().bold(), message);
        } else {
            eprintln!("[WARNING]: {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "ERROR!".red().bold(), message.red());
        } else {
            eprintln!("ERROR! {}", message);
        }
    }
}
