use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Ensure a working `protoc` is available across all CI runners by using a vendored binary.
    // This avoids relying on system packages on macOS/Windows/Linux (including cross builds).
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        std::env::set_var("PROTOC", &path);
        eprintln!("build.rs: Using vendored protoc at {}", path.display());
    }

    println!("cargo:rerun-if-env-changed=MESHTAC_PROTO_DIR");
    println!("cargo:rerun-if-changed=protos");

    let proto_dir = env::var("MESHTAC_PROTO_DIR").unwrap_or_else(|_| "protos".into());
    let proto_path = PathBuf::from(&proto_dir);

    fn collect_protos(dir: &Path, acc: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    collect_protos(&path, acc);
                } else if path.extension().and_then(|e| e.to_str()) == Some("proto") {
                    acc.push(path);
                }
            }
        }
    }

    let mut protos = Vec::new();
    collect_protos(&proto_path, &mut protos);

    if protos.is_empty() {
        panic!(
            "No .proto files found in '{}'. Set MESHTAC_PROTO_DIR to a directory containing the radio serial API protos.",
            proto_path.display()
        );
    }

    // protoc rejects the same file passed twice, so each proto must appear once.
    protos.sort();
    protos.dedup();

    eprintln!("build.rs: Compiling {} proto files", protos.len());
    for p in &protos {
        eprintln!("  proto: {}", p.display());
    }

    let mut config = prost_build::Config::new();
    config.bytes(["."]);
    config
        .compile_protos(&protos, &[proto_path.as_path()])
        .expect("Failed to compile protos");
}
