// src/main.rs

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use ghpm::config::Config;
use ghpm::manager::{InstallOptions, Manager, RemoveOptions};
use ghpm::state;
use ghpm::{Error, Result};
use serde_json::json;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ghpm")]
#[command(author, version, about = "Declarative package manager for forge release artifacts", long_about = None)]
struct Cli {
    /// Install root
    #[arg(long, global = true, default_value = "/")]
    root: PathBuf,

    /// Packages directory (overrides config)
    #[arg(long, global = true)]
    packages_dir: Option<String>,

    /// State directory (overrides config)
    #[arg(long, global = true)]
    state_dir: Option<String>,

    /// Cache directory (overrides config)
    #[arg(long, global = true)]
    cache_dir: Option<String>,

    /// Config file path
    #[arg(long, global = true, default_value = "/etc/ghpm/config.yaml")]
    config: PathBuf,

    /// JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress output
    #[arg(long, global = true)]
    silent: bool,

    /// Detailed progress output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known packages
    List,
    /// Show install status for a package
    Status {
        /// Package name
        name: String,
    },
    /// Install one or more packages
    Install {
        /// Package names
        names: Vec<String>,
        /// Install every known package
        #[arg(long)]
        all: bool,
        /// Version/tag to install
        #[arg(long)]
        version: Option<String>,
        /// Overwrite conflicting files
        #[arg(long)]
        force: bool,
    },
    /// Remove a package
    Remove {
        /// Package name
        name: String,
        /// Also remove preserved files
        #[arg(long)]
        purge: bool,
    },
    /// Upgrade one or more packages to the latest release
    Upgrade {
        /// Package names
        names: Vec<String>,
        /// Upgrade every installed package
        #[arg(long)]
        all: bool,
        /// Report available upgrades without installing
        #[arg(long)]
        dry_run: bool,
    },
    /// Record the running ghpm binary as an installed package
    #[command(name = "self")]
    SelfRegister {
        /// Version to record (defaults to the build version)
        #[arg(long)]
        version: Option<String>,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.silent {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        let name = command.get_name().to_string();
        generate(*shell, &mut command, name, &mut io::stdout());
        return Ok(());
    }

    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.packages_dir {
        config.packages_dir = dir;
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    let manager = Manager::new(config, cli.root)?;

    match cli.command {
        Commands::List => cmd_list(&manager, cli.json),
        Commands::Status { name } => cmd_status(&manager, &name, cli.json),
        Commands::Install {
            names,
            all,
            version,
            force,
        } => {
            let opts = InstallOptions {
                version: version.unwrap_or_default(),
                force,
                dry_run: false,
            };
            let names = expand_names(&manager, names, all)?;
            for name in names {
                let receipt = manager.install(&name, &opts)?;
                if cli.json {
                    print_json(&receipt)?;
                } else {
                    println!("installed {} {}", receipt.name, receipt.source.tag);
                }
            }
            Ok(())
        }
        Commands::Remove { name, purge } => {
            let previous = manager.status(&name).ok().map(|(receipt, _)| receipt);
            manager.remove(&name, &RemoveOptions { purge })?;
            if !cli.json {
                match previous {
                    Some(receipt) if !receipt.source.tag.is_empty() => {
                        println!("removed {} {}", receipt.name, receipt.source.tag)
                    }
                    _ => println!("removed {}", name),
                }
            }
            Ok(())
        }
        Commands::Upgrade {
            names,
            all,
            dry_run,
        } => {
            let opts = InstallOptions {
                version: String::new(),
                force: false,
                dry_run,
            };
            let names = expand_names(&manager, names, all)?;
            for name in &names {
                let (changed, receipt) = manager.upgrade(name, &opts)?;
                if cli.json {
                    print_json(&json!({"changed": changed, "receipt": receipt}))?;
                } else if dry_run {
                    println!("{}\t{}", name, if changed { "yes" } else { "no" });
                } else if changed {
                    println!("upgraded {} to {}", receipt.name, receipt.source.tag);
                } else {
                    println!("{} already up to date", receipt.name);
                }
            }
            Ok(())
        }
        Commands::SelfRegister { version } => {
            let receipt = manager.self_register(version.as_deref().unwrap_or(""))?;
            if cli.json {
                print_json(&receipt)?;
            } else {
                println!("registered {} {}", receipt.name, receipt.source.tag);
            }
            Ok(())
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

fn cmd_list(manager: &Manager, json_out: bool) -> Result<()> {
    let manifests = manager.list_manifests()?;
    let installed = state::load_installed(&state::installed_path(&manager.state_dir()))?;

    if json_out {
        let entries: Vec<serde_json::Value> = manifests
            .iter()
            .map(|m| {
                let mut entry = json!({"name": m.name});
                if !m.description.is_empty() {
                    entry["description"] = json!(m.description);
                }
                if let Some(inst) = installed.installed.get(&m.name) {
                    entry["installed"] = json!(inst.version);
                }
                entry
            })
            .collect();
        return print_json(&entries);
    }

    for m in &manifests {
        match installed.installed.get(&m.name) {
            Some(inst) => println!("{}\t{}", m.name, inst.version),
            None => println!("{}", m.name),
        }
    }
    Ok(())
}

fn cmd_status(manager: &Manager, name: &str, json_out: bool) -> Result<()> {
    let (receipt, status) = manager.status(name)?;
    let mismatches = status.iter().filter(|(_, ok)| !ok).count();

    if json_out {
        let map: serde_json::Map<String, serde_json::Value> = status
            .iter()
            .map(|(path, ok)| (path.clone(), json!(ok)))
            .collect();
        print_json(&json!({"receipt": receipt, "status": map}))?;
    } else {
        println!("name: {}", receipt.name);
        println!("version: {}", receipt.source.tag);
        for (path, ok) in &status {
            println!("{}\t{}", if *ok { "ok" } else { "mismatch" }, path);
        }
    }

    if mismatches > 0 {
        return Err(Error::VerificationFailed(format!(
            "{} of {} entries differ from the receipt",
            mismatches,
            status.len()
        )));
    }
    Ok(())
}

/// Positional names, or every known package with `--all`
fn expand_names(manager: &Manager, names: Vec<String>, all: bool) -> Result<Vec<String>> {
    if all {
        return Ok(manager
            .list_manifests()?
            .into_iter()
            .map(|m| m.name)
            .collect());
    }
    if names.is_empty() {
        return Err(Error::Config(
            "a package name (or --all) is required".to_string(),
        ));
    }
    Ok(names)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)
        .map_err(|e| Error::State(format!("encode output: {}", e)))?;
    println!("{}", data);
    Ok(())
}
