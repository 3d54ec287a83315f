use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

use crate::{
    cli::handlers::commons::{self, ManifestArgs},
    core::plist_export,
};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Writes every enabled payload as a standalone <domain>.plist file."
)]
struct PlistsArgs {
    profile: PathBuf,

    /// Output directory. Created if missing.
    #[arg(long, short = 'o')]
    output: PathBuf,

    #[command(flatten)]
    manifest: ManifestArgs,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let plists_args = PlistsArgs::try_parse_from(&args)?;
    let config = commons::load_config()?;
    let manifest = commons::load_manifest(&config, &plists_args.manifest)?;
    let mut profile = commons::load_profile(&plists_args.profile)?;

    let mut exporter = profile.exporter(&manifest, false, None);
    let written = plist_export::export_domain_plists(&mut exporter, &plists_args.output)
        .with_context(|| format!("Failed to export plists to '{}'", plists_args.output.display()))?;

    for path in &written {
        println!("  {} {}", "•".cyan(), path.display());
    }
    println!("{} Wrote {} plist files.", "✔".green(), written.len());
    Ok(())
}
