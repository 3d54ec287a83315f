use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};

use crate::{
    cli::handlers::commons::{self, ManifestArgs},
    core::{import::import_mobileconfig, profile::Profile, settings::ProfileSettings},
    system::import_queue::ImportQueue,
};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Imports .mobileconfig files (or directories of them) into settings files."
)]
struct ImportArgs {
    /// Profiles or directories to import, in order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for the resulting settings files. Defaults to the current directory.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Overwrite existing settings files without asking.
    #[arg(long, short = 'y')]
    yes: bool,

    #[command(flatten)]
    manifest: ManifestArgs,
}

fn destination(dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "profile".to_string());
    dir.join(format!("{}.plist", stem))
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let import_args = ImportArgs::try_parse_from(&args)?;
    let config = commons::load_config()?;
    let manifest = commons::load_manifest(&config, &import_args.manifest)?;
    let signer = commons::signer(&config)?;
    let output_dir = match &import_args.output {
        Some(dir) => dir.clone(),
        None => commons::current_dir()?,
    };

    let paths = ImportQueue::collect_paths(&import_args.inputs);
    if paths.is_empty() {
        return Err(anyhow!("No profiles found to import."));
    }

    let summary = ImportQueue::run(
        paths,
        |source| {
            let target = destination(&output_dir, source);
            commons::confirm_overwrite(&target, import_args.yes).unwrap_or_else(|e| {
                log::warn!("Could not ask for confirmation: {}", e);
                false
            })
        },
        |document| -> Result<()> {
            let mut settings = ProfileSettings::default();
            let report = import_mobileconfig(&document.bytes, &manifest, &mut settings, Some(&signer))?;
            let target = destination(&output_dir, &document.path);
            Profile::from_settings(settings)
                .save(&target)
                .with_context(|| format!("Failed to write '{}'", target.display()))?;

            println!(
                "{} {} -> {} ({} payloads)",
                "✔".green(),
                document.path.display(),
                target.display(),
                report.payloads.len()
            );
            for issue in &report.issues {
                println!("    {} {}", "!".yellow(), issue);
            }
            Ok(())
        },
    );

    for (path, reason) in &summary.failed {
        eprintln!("  {} {}: {}", "✘".red(), path.display(), reason);
    }
    println!(
        "\n{} imported, {} skipped, {} failed.",
        summary.imported.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    if summary.is_success() {
        Ok(())
    } else {
        Err(anyhow!("{} profiles could not be imported.", summary.failed.len()))
    }
}
