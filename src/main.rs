// src/main.rs
//! apkg-build CLI entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::info;

use apkg_build::backend::Arch;
use apkg_build::recipe::convert;
use apkg_build::repo::{self, Package};
use apkg_build::BuildEnv;

#[derive(Parser)]
#[command(name = "apkg-build")]
#[command(version)]
#[command(about = "Build packages from source into per-output squashfs images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the recipe repository
    Update,

    /// Build a package
    Build {
        /// `category/name`, or a bare name searched across categories
        package: String,

        /// Version to build (default: the recipe's latest)
        #[arg(long)]
        version: Option<String>,

        /// Target architecture (default: the host's)
        #[arg(long, value_enum)]
        arch: Option<Arch>,
    },

    /// Convert legacy shell recipes to build.yaml
    Convert {
        /// Package directory; with no argument, every package without a
        /// build.yaml is converted
        package_path: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    repo::check_repo()?;

    match cli.command {
        Commands::Update => {
            info!("Updating repository...");
            repo::update_repo()?;
            Ok(())
        }

        Commands::Build {
            package,
            version,
            arch,
        } => cmd_build(&package, version, arch),

        Commands::Convert { package_path } => match package_path {
            Some(path) => {
                convert::convert_package(Path::new(&path))?;
                Ok(())
            }
            None => {
                convert::convert_all(&repo::repo_path(), 0)?;
                Ok(())
            }
        },
    }
}

fn cmd_build(package: &str, version: Option<String>, arch: Option<Arch>) -> Result<()> {
    let pkg = Package::find(package)?;
    let recipe = pkg.load_recipe()?;

    let version = match version {
        Some(version) => version,
        None => recipe
            .versions
            .latest()
            .with_context(|| format!("no versions defined for {}", pkg.name))?
            .to_string(),
    };

    let arch = arch
        .or_else(Arch::host)
        .context("cannot detect host arch; pass --arch")?;

    info!("Build {} version {} for {}", pkg.name, version, arch);

    let mut env = BuildEnv::new(pkg, recipe, version, arch)?;
    env.build()?;
    Ok(())
}
