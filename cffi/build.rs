use std::{env, path::PathBuf};

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_owned());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_else(|_| ".".to_owned()));
    println!("cargo:rerun-if-changed=src/lib.rs");

    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        include_guard: Some("VESTA_H".to_owned()),
        cpp_compat: true,
        ..Default::default()
    };
    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("vesta.h"));
        }
        Err(e) => println!("cargo:warning=header generation failed: {}", e),
    }
}
