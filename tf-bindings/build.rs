// SPDX-License-Identifier: Apache-2.0

extern crate bindgen;

use std::env;
use std::path::PathBuf;

fn main() {
    // Tell cargo to invalidate the built crate whenever the wrapper changes
    println!("cargo:rerun-if-changed=wrapper.h");

    // The test suite runs against the in-process mock; nothing to link.
    if env::var_os("CARGO_FEATURE_BUILTIN_RUNTIME").is_some() {
        return;
    }

    let mut tf_lib = pkg_config::Config::new()
        .probe("tensorflow")
        .expect("Could not find libtensorflow");

    // The TFLite C library rarely ships a pkg-config file
    if pkg_config::Config::new()
        .probe("tensorflowlite_c")
        .is_err()
    {
        println!("cargo:rustc-link-lib=tensorflowlite_c");
    }

    let mut clang_arg = String::from("-I");
    clang_arg.push_str(
        &tf_lib
            .include_paths
            .pop()
            .expect("libtensorflow exposes no include path")
            .into_os_string()
            .into_string()
            .expect("Include path is not valid UTF-8"),
    );

    let bindings = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_arg(clang_arg)
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .allowlist_function("TF_.*")
        .allowlist_function("TfLite.*")
        // Formats the messages handed to the interpreter error reporter
        .allowlist_function("vsnprintf")
        .allowlist_type("TF_.*")
        .allowlist_type("TfLite.*")
        .allowlist_var("TF_.*")
        .allowlist_var("kTfLite.*")
        // Keep `TF_OK`, `kTfLiteFloat32`, ... under their C names
        .prepend_enum_name(false)
        .derive_default(true)
        .generate()
        .expect("Unable to generate bindings");

    let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is not set"));
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");
}
