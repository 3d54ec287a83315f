use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

use crate::{
    cli::handlers::commons::{self, ManifestArgs},
    models::{Distribution, ExportStyle, Scope},
};

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Exports a profile as a .mobileconfig file.")]
struct ExportArgs {
    profile: PathBuf,

    /// Output file. Defaults to the settings file name with a `.mobileconfig` extension.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// CMS-sign the exported profile.
    #[arg(long)]
    sign: bool,

    /// Signing identity. Defaults to `signing.identity` in config.toml.
    #[arg(long, requires = "sign")]
    identity: Option<String>,

    /// Wrap managed-preference payloads as `profile` or `mcx`. Not saved.
    #[arg(long)]
    style: Option<ExportStyle>,

    /// Export for these platforms instead of the saved ones. Not saved.
    #[arg(long, value_delimiter = ',')]
    platforms: Vec<String>,

    #[arg(long)]
    distribution: Option<Distribution>,

    /// `user` or `system`.
    #[arg(long)]
    scope: Option<String>,

    /// Overwrite the output without asking.
    #[arg(long, short = 'y')]
    yes: bool,

    #[command(flatten)]
    manifest: ManifestArgs,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let export_args = ExportArgs::try_parse_from(&args)?;
    let config = commons::load_config()?;
    let manifest = commons::load_manifest(&config, &export_args.manifest)?;
    let mut profile = commons::load_profile(&export_args.profile)?;

    if let Some(platforms) = commons::parse_platforms(&export_args.platforms)? {
        profile.context.set_platforms(platforms);
    }
    if let Some(distribution) = export_args.distribution {
        profile.context.set_distribution(distribution);
    }
    if let Some(scope) = &export_args.scope {
        let scope = Scope::from_name(scope).ok_or_else(|| anyhow!("Unknown scope '{}'.", scope))?;
        profile.context.set_scope(scope);
    }
    if let Some(style) = export_args.style {
        profile.export_style = style;
    }

    let output = export_args
        .output
        .clone()
        .unwrap_or_else(|| export_args.profile.with_extension("mobileconfig"));
    if !commons::confirm_overwrite(&output, export_args.yes)? {
        return Err(anyhow!("Operation cancelled."));
    }

    let identity = export_args
        .identity
        .clone()
        .or_else(|| config.signing.identity.clone());
    let signer = commons::signer(&config)?;
    let exported = profile
        .exporter(&manifest, export_args.sign, identity)
        .with_signer(&signer)
        .export()
        .with_context(|| format!("Failed to export '{}'", export_args.profile.display()))?;
    exported
        .write_to(&output)
        .with_context(|| format!("Failed to write '{}'", output.display()))?;

    let signed = if exported.signed { " (signed)" } else { "" };
    println!("{} Exported {}{}", "✔".green(), output.display(), signed.dimmed());
    Ok(())
}
