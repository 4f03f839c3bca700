// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("ghpm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declarative package manager for forge release artifacts")
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .default_value("/")
                .help("Install root"),
        )
        .arg(
            Arg::new("packages_dir")
                .long("packages-dir")
                .global(true)
                .help("Packages directory (overrides config)"),
        )
        .arg(
            Arg::new("state_dir")
                .long("state-dir")
                .global(true)
                .help("State directory (overrides config)"),
        )
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .global(true)
                .help("Cache directory (overrides config)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .default_value("/etc/ghpm/config.yaml")
                .help("Config file path"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("JSON output"),
        )
        .arg(
            Arg::new("silent")
                .long("silent")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Suppress progress output"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Detailed progress output"),
        )
        .subcommand(Command::new("list").about("List known packages"))
        .subcommand(
            Command::new("status")
                .about("Show install status for a package")
                .arg(Arg::new("name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("install")
                .about("Install one or more packages")
                .arg(Arg::new("names").num_args(0..).help("Package names"))
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Install every known package"),
                )
                .arg(Arg::new("version").long("version").help("Version/tag to install"))
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite conflicting files"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove a package")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(
                    Arg::new("purge")
                        .long("purge")
                        .action(ArgAction::SetTrue)
                        .help("Also remove preserved files"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade one or more packages to the latest release")
                .arg(Arg::new("names").num_args(0..).help("Package names"))
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Upgrade every installed package"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Report available upgrades without installing"),
                ),
        )
        .subcommand(
            Command::new("self")
                .about("Record the running ghpm binary as an installed package")
                .arg(Arg::new("version").long("version").help("Version to record")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true).help("Target shell")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("ghpm.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
