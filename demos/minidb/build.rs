//! Generates `minidb.rs` from `minidb.bind.toml` into `OUT_DIR`.

use std::path::PathBuf;

fn main() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"));
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let config = manifest_dir.join("minidb.bind.toml");

    println!("cargo:rerun-if-changed={}", config.display());
    println!("cargo:rerun-if-changed={}", manifest_dir.join("include").display());

    let result = cbridge_gen::Builder::from_config_file(&config)
        .and_then(|builder| builder.write_to(&out_dir.join("minidb.rs")));
    if let Err(e) = result {
        panic!("generating minidb bindings: {e}");
    }
}
