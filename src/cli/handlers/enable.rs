use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

use crate::{
    cli::handlers::commons::{self, ManifestArgs},
    core::enablement::EnableQuery,
};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Enables or disables a payload instance, or a single key of it."
)]
struct EnableArgs {
    profile: PathBuf,
    domain: String,
    /// Key to flag. Without it the payload instance itself is toggled.
    key_path: Option<String>,

    /// Disable instead of enable.
    #[arg(long)]
    off: bool,

    /// Remove the explicit flag so the key falls back to its resolved state.
    #[arg(long, conflicts_with = "off")]
    clear: bool,

    #[arg(long, default_value_t = 0)]
    index: usize,

    #[arg(long)]
    payload_type: Option<String>,

    #[command(flatten)]
    manifest: ManifestArgs,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let enable_args = EnableArgs::try_parse_from(&args)?;
    let config = commons::load_config()?;
    let manifest = commons::load_manifest(&config, &enable_args.manifest)?;
    let mut profile = commons::load_profile(&enable_args.profile)?;

    let domain = enable_args.domain.as_str();
    let index = enable_args.index;
    let payload_type =
        commons::payload_type_for(&manifest, domain, enable_args.payload_type.as_deref())?;

    let Some(key_path) = enable_args.key_path.as_deref() else {
        if enable_args.clear {
            return Err(anyhow!("--clear needs a key path."));
        }
        while profile.settings.payload_count(domain, payload_type) <= index {
            profile.settings.add_payload(domain, payload_type);
        }
        profile
            .settings
            .set_payload_enabled(domain, payload_type, index, !enable_args.off);
        commons::save_profile(&mut profile, &enable_args.profile)?;
        let state = if enable_args.off { "disabled".red() } else { "enabled".green() };
        println!("{} #{} {}", domain.yellow(), index, state);
        return Ok(());
    };

    if profile.settings.payload(domain, payload_type, index).is_none() {
        return Err(anyhow!(
            "{} has no payload #{}. Run `profilekit enable <file> {}` first.",
            domain,
            index,
            domain
        ));
    }
    if enable_args.clear {
        profile
            .settings
            .clear_view_enabled(key_path, domain, payload_type, index);
    } else {
        profile
            .settings
            .set_view_enabled(key_path, domain, payload_type, index, !enable_args.off);
    }

    if let Some(subkey) = commons::find_subkey(&manifest, payload_type, domain, key_path) {
        let enabled = profile
            .resolver(&manifest)
            .is_enabled(subkey.id, index, EnableQuery::default());
        let state = if enabled { "enabled".green() } else { "disabled".red() };
        println!("{} {} resolves to {}", domain.dimmed(), key_path.cyan(), state);
    } else {
        log::warn!("'{}' is not described by the manifest of {}.", key_path, domain);
    }
    commons::save_profile(&mut profile, &enable_args.profile)?;
    Ok(())
}
