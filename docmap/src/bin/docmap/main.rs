mod output;
mod theme;

use std::{
    io::{self, Read},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::Table;
use serde::Serialize;
use serde_json::Value;

use docmap::{Mapper, MapperConfig, ProxyVariant, Query, nested::normalize_collection};
use output::{GlobalOptions, OutputFormat, OutputManager, TableDisplay, table_with_header};
use theme::THEME;

#[derive(Parser)]
#[command(name = "docmap")]
#[command(version = "0.1.0")]
#[command(about = "Inspect docmap configurations, stored documents and nested-attribute payloads")]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Path to the mapper configuration (TOML)
    #[arg(short, long, env = "DOCMAP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration
    Config,
    /// List declared classes and their associations
    Classes,
    /// Fetch one stored document
    Get { collection: String, id: String },
    /// Count the documents of a collection
    Count { collection: String },
    /// Print a nested-attributes payload in assignment order (`-` reads stdin)
    Normalize { payload: PathBuf },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output.clone(),
        quiet: cli.quiet,
        no_color: cli.no_color,
    });

    if let Err(err) = execute(cli, &output) {
        output.error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<MapperConfig> {
    match path {
        Some(path) => MapperConfig::from_path(path).with_context(|| format!("failed to load {}", path.display())),
        None => Ok(MapperConfig::default()),
    }
}

fn execute(cli: Cli, output: &OutputManager) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Config => {
            if output.options.output_format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else if !output.options.quiet {
                println!("{}", config.to_toml_string()?);
            }
            Ok(())
        }
        Commands::Classes => {
            let mapper = Mapper::from_config(config)?;
            output.display(&ClassesReport::from_mapper(&mapper))
        }
        Commands::Get { collection, id } => {
            let mapper = Mapper::from_config(config)?;
            match mapper.store().find_one(&collection, &id)? {
                Some(document) => output.display(&DocumentReport(Value::Object(document))),
                None => {
                    output.warning(&format!("{collection}/{id} not found"));
                    Ok(())
                }
            }
        }
        Commands::Count { collection } => {
            let mapper = Mapper::from_config(config)?;
            let count = mapper.store().count(&collection, &Query::new())?;
            output.success(&format!("{collection}: {count} document(s)"));
            Ok(())
        }
        Commands::Normalize { payload } => {
            let content = if payload.as_os_str() == "-" {
                let mut buffer = String::new();
                io::stdin().read_to_string(&mut buffer)?;
                buffer
            } else {
                std::fs::read_to_string(&payload).with_context(|| format!("failed to read {}", payload.display()))?
            };
            let elements = normalize_collection(serde_json::from_str(&content)?)?;
            output.display(&NormalizedReport(elements.into_iter().map(Value::Object).collect()))
        }
    }
}

#[derive(Serialize)]
struct AssociationRow {
    class: String,
    name: String,
    kind: String,
    variant: String,
    target: String,
    foreign_key: Option<String>,
    dependent: Option<String>,
}

#[derive(Serialize)]
struct ClassesReport {
    classes: Vec<AssociationRow>,
}

impl ClassesReport {
    fn from_mapper(mapper: &Mapper) -> Self {
        let classes = mapper
            .classes()
            .iter()
            .flat_map(|class| {
                class.associations().into_iter().map(move |descriptor| AssociationRow {
                    class: class.name().to_string(),
                    name: descriptor.name.clone(),
                    kind: descriptor.kind.to_string(),
                    variant: format!("{:?}", ProxyVariant::for_descriptor(&descriptor)),
                    target: descriptor.target.base().unwrap_or("(per record)").to_string(),
                    foreign_key: descriptor.foreign_key.clone(),
                    dependent: descriptor.dependent().map(|dependent| format!("{dependent:?}")),
                })
            })
            .collect();
        Self { classes }
    }
}

impl TableDisplay for ClassesReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = table_with_header(
            &["Class", "Association", "Kind", "Variant", "Target", "Foreign key", "Dependent"],
            options,
        );
        for row in &self.classes {
            table.add_row(vec![
                row.class.clone(),
                row.name.clone(),
                row.kind.clone(),
                row.variant.clone(),
                row.target.clone(),
                row.foreign_key.clone().unwrap_or_else(|| "-".to_string()),
                row.dependent.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }
        table
    }
}

#[derive(Serialize)]
struct DocumentReport(Value);

impl TableDisplay for DocumentReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = table_with_header(&["Field", "Value"], options);
        if let Value::Object(fields) = &self.0 {
            for (field, value) in fields {
                let field = if options.no_color { field.clone() } else { field.color(THEME.key).to_string() };
                table.add_row(vec![field, value.to_string()]);
            }
        }
        table
    }
}

#[derive(Serialize)]
struct NormalizedReport(Vec<Value>);

impl TableDisplay for NormalizedReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = table_with_header(&["#", "Element"], options);
        for (index, element) in self.0.iter().enumerate() {
            let index = if options.no_color {
                index.to_string()
            } else {
                index.to_string().color(THEME.highlight).to_string()
            };
            table.add_row(vec![index, element.to_string()]);
        }
        table
    }
}
