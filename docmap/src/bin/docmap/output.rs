use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;

use crate::theme::{ICONS, THEME};

/// Output format options for CLI commands
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub no_color: bool,
}

/// Data that knows how to render itself as a table.
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
}

pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        if options.no_color {
            colored::control::set_override(false);
        }
        Self { options }
    }

    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }
        match self.options.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
            OutputFormat::Table => println!("{}", data.to_table(&self.options)),
        }
        Ok(())
    }

    pub fn success(&self, message: &str) {
        if !self.options.quiet {
            println!("{} {}", ICONS.success.color(THEME.success), message.color(THEME.success));
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.options.quiet {
            println!("{} {}", ICONS.warning.color(THEME.warning), message.color(THEME.warning));
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", ICONS.error.color(THEME.error), message.color(THEME.error));
    }
}

/// Table with a bold header row, colored unless disabled.
pub fn table_with_header(headers: &[&str], options: &GlobalOptions) -> Table {
    let mut table = Table::new();
    let cells = headers.iter().map(|header| {
        let cell = Cell::new(header).add_attribute(Attribute::Bold);
        if options.no_color { cell } else { cell.fg(TableColor::Cyan) }
    });
    table.set_header(cells);
    table
}
