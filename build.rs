// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: I/O block size
fn block_size_arg() -> Arg {
    Arg::new("block_size")
        .long("block-size")
        .value_name("BYTES")
        .default_value("1048576")
        .help("Bytes per I/O transfer")
}

fn build_cli() -> Command {
    Command::new("eorepack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Repackage satellite datasets into normalized, checksummed tar packages")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging (overrides RUST_LOG)"),
        )
        .subcommand(
            Command::new("repack")
                .about("Repackage datasets (archives or directories) under an output base")
                .arg(
                    Arg::new("output_base")
                        .long("output-base")
                        .value_name("DIR")
                        .required(true)
                        .help("Root directory for packages; the input's layout below USGS/ is mirrored here"),
                )
                .arg(block_size_arg())
                .arg(
                    Arg::new("zlevel")
                        .long("zlevel")
                        .default_value("9")
                        .help("Deflate level for recompressed images (1-9)"),
                )
                .arg(
                    Arg::new("inputs")
                        .required(true)
                        .num_args(1..)
                        .help("Dataset archives or directories"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check packages against their package.sha1 manifests")
                .arg(block_size_arg())
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Package files to check"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = out_dir.join("eorepack.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
