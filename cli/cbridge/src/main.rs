//! cbridge CLI: generate safe Rust bindings from a C header.

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cbridge", version, about = "Safe Rust bindings for C libraries")]
struct Cli {
    /// Show debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a binding module
    Generate {
        #[command(flatten)]
        inputs: GenerateArgs,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the generation report (human, json)
        #[arg(long, value_enum)]
        report: Option<ReportFormat>,
    },
    /// Run the pipeline and print the report without writing anything
    Check {
        #[command(flatten)]
        inputs: GenerateArgs,
        /// Report format (human, json)
        #[arg(long, value_enum, default_value = "human")]
        report: ReportFormat,
    },
    /// List the symbols a header declares
    Catalog {
        #[command(flatten)]
        header: HeaderArgs,
        /// Only list symbols of this kind (type, function, constant, variable)
        #[arg(long)]
        kind: Option<String>,
    },
}

/// Header location and preprocessor inputs.
#[derive(Args, Debug, Default)]
pub struct HeaderArgs {
    /// C header to parse (overrides the configuration's header)
    pub header: Option<PathBuf>,
    /// Add an include search directory
    #[arg(short = 'I', value_name = "DIR")]
    pub include: Vec<PathBuf>,
    /// Predefine a macro, NAME or NAME=VALUE
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    pub define: Vec<String>,
}

/// Everything that shapes a generated module.
#[derive(Args, Debug, Default)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub header: HeaderArgs,
    /// Binding configuration file (*.bind.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Select types matching a pattern
    #[arg(long = "type", value_name = "PATTERN")]
    pub types: Vec<String>,
    /// Select functions matching a pattern
    #[arg(long = "function", value_name = "PATTERN")]
    pub functions: Vec<String>,
    /// Select constants matching a pattern
    #[arg(long = "constant", value_name = "PATTERN")]
    pub constants: Vec<String>,
    /// Select variables matching a pattern
    #[arg(long = "var", value_name = "PATTERN")]
    pub variables: Vec<String>,
    /// Map an enumeration as a closed set, optionally grouping constants
    #[arg(long, value_name = "NAME[=CONSTANTS]")]
    pub constified: Vec<String>,
    /// Map an enumeration as flags, optionally grouping constants
    #[arg(long, value_name = "NAME[=CONSTANTS]")]
    pub bitfield: Vec<String>,
    /// Normalize names to Rust conventions
    #[arg(long)]
    pub normalize_names: bool,
    /// Prefix stripped from normalized names
    #[arg(long, value_name = "PREFIX")]
    pub strip_prefix: Vec<String>,
    /// Native library to link against
    #[arg(long)]
    pub link: Option<String>,
    /// Fail when any selected symbol is unmappable
    #[arg(long)]
    pub deny_unmapped: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Human,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate { inputs, output, report } => {
            commands::generate::generate(&inputs, output.as_deref(), report)
        }
        Commands::Check { inputs, report } => commands::generate::check(&inputs, report),
        Commands::Catalog { header, kind } => commands::catalog::run(&header, kind.as_deref()),
    }
}
