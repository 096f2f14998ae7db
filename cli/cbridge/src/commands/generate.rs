//! `cbridge generate` and `cbridge check`.

use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use cbridge_gen::{Builder, Generation, GenerationReport, SymbolKind};

use crate::{GenerateArgs, ReportFormat};

/// Run the pipeline and write the module to `output`, or to stdout.
pub fn generate(args: &GenerateArgs, output: Option<&Path>, report: Option<ReportFormat>) -> Result<()> {
    let builder = builder(args)?;
    let generation = builder.generate().context("generating bindings")?;

    match output {
        Some(path) => {
            generation
                .write_to(path)
                .with_context(|| format!("writing {}", path.display()))?;
            print_summary(&generation, &path.display().to_string());
            if let Some(format) = report {
                println!();
                println!("{}", render(&generation.report, format));
            }
        }
        None => {
            std::io::stdout()
                .write_all(generation.module.text().as_bytes())
                .context("writing module to stdout")?;
            if let Some(format) = report {
                eprintln!("{}", render(&generation.report, format));
            }
        }
    }
    Ok(())
}

/// Run the pipeline and print the report; nothing is written.
pub fn check(args: &GenerateArgs, report: ReportFormat) -> Result<()> {
    let generation = builder(args)?.generate().context("checking bindings")?;
    println!("{}", render(&generation.report, report));
    Ok(())
}

/// Configuration file first, then command-line additions in order.
pub fn builder(args: &GenerateArgs) -> Result<Builder> {
    let mut builder = match &args.config {
        Some(path) => Builder::from_config_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Builder::new(),
    };
    if let Some(header) = &args.header.header {
        builder = builder.header(header);
    }
    if builder.config().library.header.is_none() {
        bail!("no header given: pass a header path or a --config with [library] header");
    }
    for dir in &args.header.include {
        builder = builder.include_path(dir);
    }
    for spec in &args.header.define {
        builder = builder.define(spec);
    }

    let selections = [
        (SymbolKind::Type, &args.types),
        (SymbolKind::Function, &args.functions),
        (SymbolKind::Constant, &args.constants),
        (SymbolKind::Variable, &args.variables),
    ];
    for (kind, patterns) in selections {
        for pattern in patterns {
            builder = builder.select(kind, pattern);
        }
    }

    for spec in &args.constified {
        let (name, constants) = split_directive(spec);
        builder = builder.constified(name, constants);
    }
    for spec in &args.bitfield {
        let (name, constants) = split_directive(spec);
        builder = builder.bitfield(name, constants);
    }

    if args.normalize_names {
        builder = builder.normalize_names(true);
    }
    for prefix in &args.strip_prefix {
        builder = builder.strip_prefix(prefix);
    }
    if let Some(link) = &args.link {
        builder = builder.link(link);
    }
    if args.deny_unmapped {
        builder = builder.deny_unmapped();
    }
    Ok(builder)
}

/// `NAME` or `NAME=CONSTANTS`.
fn split_directive(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once('=') {
        Some((name, constants)) => (name.trim(), Some(constants.trim())),
        None => (spec.trim(), None),
    }
}

fn render(report: &GenerationReport, format: ReportFormat) -> String {
    match format {
        ReportFormat::Human => report.to_string(),
        ReportFormat::Json => report.to_json(),
    }
}

fn print_summary(generation: &Generation, destination: &str) {
    let report = &generation.report;
    println!(
        "Generated bindings for '{}' ({} safe, {} unmappable) → {}",
        report.library,
        report.safe,
        report.unmappable.len(),
        destination
    );
    for rule in report.empty_rules() {
        println!("warning: {} pattern '{}' matched nothing", rule.kind, rule.pattern);
    }
}
