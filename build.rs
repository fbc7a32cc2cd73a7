// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("confik")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Confik Contributors")
        .about("Stage .config files into the project root while a command runs")
        .long_about(
            "Stage .config files into the project root while a command runs.\n\n\
             Staged files are removed again when the command exits or the run is \
             interrupted. Without a command, files stay staged until Ctrl-C.",
        )
        .arg(
            Arg::new("dry_run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Show what would be staged without writing anything"),
        )
        .arg(
            Arg::new("clean")
                .long("clean")
                .action(ArgAction::SetTrue)
                .help("Remove leftovers of a previous run and exit"),
        )
        .arg(
            Arg::new("no_gitignore")
                .long("no-gitignore")
                .action(ArgAction::SetTrue)
                .help("Do not hide staged files via .git/info/exclude"),
        )
        .arg(
            Arg::new("no_registry")
                .long("no-registry")
                .action(ArgAction::SetTrue)
                .help("Stage files even if the built-in registry lists them"),
        )
        .arg(
            Arg::new("command")
                .value_name("COMMAND")
                .num_args(1..)
                .trailing_var_arg(true)
                .help("Command to run while files are staged, with its arguments"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let Some(manifest_dir) = env::var_os("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR not set; skipping man page");
        return;
    };
    let man_dir = PathBuf::from(manifest_dir).join("man");
    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {e}");
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {e}");
        return;
    }

    let man_path = man_dir.join("confik.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {e}");
    }
}
