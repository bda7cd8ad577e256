use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");

    let crate_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let out_dir = match std::env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };

    let result = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("FULTON_FFI_H")
        .with_cpp_compat(true)
        .generate();
    match result {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("fulton.h"));
        }
        Err(err) => println!("cargo:warning=fulton.h not generated: {err}"),
    }
}
