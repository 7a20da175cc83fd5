fn main() {
    // Link against the system libsqlite3 so the shim registers into the
    // same SQLite instance the host process uses.
    if let Ok(lib) = pkg_config::probe_library("sqlite3") {
        for path in &lib.link_paths {
            println!("cargo:rustc-link-search=native={}", path.display());
        }
    } else {
        println!("cargo:rustc-link-lib=dylib=sqlite3");
    }
}
