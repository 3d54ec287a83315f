use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

use crate::{
    cli::handlers::commons,
    constants::{CONFIGURATION_DOMAIN, PAYLOAD_IDENTIFIER_KEY},
    core::{profile::Profile, value::Value},
    models::{Distribution, ExportStyle, PayloadType},
};

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Creates a new profile settings file.")]
struct NewArgs {
    /// Where to write the settings file.
    path: PathBuf,

    /// The profile's display name.
    #[arg(long)]
    name: String,

    /// Profile identifier. Defaults to `<identifier_prefix>.<name>`.
    #[arg(long)]
    identifier: Option<String>,

    #[arg(long)]
    organization: Option<String>,

    /// Comma separated target platforms (macOS, iOS, tvOS, watchOS).
    #[arg(long, value_delimiter = ',')]
    platforms: Vec<String>,

    #[arg(long)]
    distribution: Option<Distribution>,

    #[arg(long)]
    style: Option<ExportStyle>,

    /// Overwrite an existing file without asking.
    #[arg(long, short = 'y')]
    yes: bool,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let new_args = NewArgs::try_parse_from(&args)?;
    let config = commons::load_config()?;

    if !commons::confirm_overwrite(&new_args.path, new_args.yes)? {
        return Err(anyhow!("Operation cancelled."));
    }

    let mut defaults = config.profile.clone();
    if let Some(organization) = new_args.organization {
        defaults.organization = Some(organization);
    }
    if let Some(platforms) = commons::parse_platforms(&new_args.platforms)? {
        defaults.platforms = platforms;
    }
    if let Some(distribution) = new_args.distribution {
        defaults.distribution = distribution;
    }
    if let Some(style) = new_args.style {
        defaults.export_style = style;
    }

    let mut profile = Profile::with_defaults(&new_args.name, &defaults);
    if let Some(identifier) = &new_args.identifier {
        profile.settings.set_value(
            PAYLOAD_IDENTIFIER_KEY,
            CONFIGURATION_DOMAIN,
            PayloadType::ManifestsApple,
            0,
            Value::Str(identifier.clone()),
        );
    }

    profile
        .save(&new_args.path)
        .with_context(|| format!("Failed to write '{}'", new_args.path.display()))?;
    println!(
        "{} Created profile '{}' at {}",
        "✔".green(),
        new_args.name.yellow(),
        new_args.path.display()
    );
    Ok(())
}
