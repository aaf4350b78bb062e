use std::env;
use std::fs;

fn main() {
    // src/pdus.toml is embedded with `include_str!`; reject broken TOML early.
    println!("cargo:rerun-if-changed=src/pdus.toml");
    let dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let path = format!("{dir}/src/pdus.toml");
    if let Ok(s) = fs::read_to_string(&path) {
        if let Err(e) = toml::from_str::<toml::Table>(&s) {
            panic!("src/pdus.toml is not valid TOML: {e}");
        }
    }
}
