//! `cbridge catalog`: list what a header declares.

use anyhow::{bail, Context, Result};
use cbridge_catalog::{Catalog, Declaration, HeaderOptions, NativeSymbol, SymbolKind};

use crate::HeaderArgs;

pub fn run(args: &HeaderArgs, kind: Option<&str>) -> Result<()> {
    let Some(header) = &args.header else {
        bail!("no header given");
    };
    let kind = match kind {
        Some(k) => match SymbolKind::parse(k) {
            Some(kind) => Some(kind),
            None => bail!("unknown symbol kind '{k}' (expected type, function, constant or variable)"),
        },
        None => None,
    };

    let options = args.include.iter().fold(HeaderOptions::new(), |o, dir| o.include_path(dir));
    let options = args.define.iter().fold(options, |o, spec| o.define_spec(spec));
    let catalog =
        Catalog::parse_header(header, &options).with_context(|| format!("parsing {}", header.display()))?;

    let mut listed = 0;
    for symbol in catalog.symbols() {
        if kind.is_some_and(|k| k != symbol.kind) {
            continue;
        }
        println!("{:<8}  {:<40}  {}", symbol.kind, symbol.name, describe(symbol));
        listed += 1;
    }
    println!();
    println!("{listed} symbol(s) from {} file(s)", catalog.sources().len());
    Ok(())
}

fn describe(symbol: &NativeSymbol) -> String {
    match &symbol.decl {
        Declaration::Opaque => "opaque".to_string(),
        Declaration::Struct(s) => {
            let what = if s.is_union { "union" } else { "struct" };
            format!("{what}, {} field(s)", s.fields.len())
        }
        Declaration::Enum(e) => format!("enum, {} enumerator(s)", e.enumerators.len()),
        Declaration::Typedef(ty) => format!("typedef {ty}"),
        Declaration::Function(sig) => sig.to_string(),
        Declaration::Constant(c) => format!("= {}", c.value),
        Declaration::Variable(ty) => format!("extern {ty}"),
    }
}
