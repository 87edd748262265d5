fn main() {
    // The host resolves the update callback through the exported function table.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.starts_with("wasm32") {
        println!("cargo:rustc-link-arg=--export-table");
    }
}
