// src/cli/handlers/commons.rs

// Shared helpers for the command handlers.

use anyhow::{Context, Result, anyhow};
use clap::Args;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::path::{Path, PathBuf};

use crate::{
    core::{
        config::{self, AppConfig},
        manifest::{Manifest, ManifestSource, Subkey},
        manifest_loader,
        profile::Profile,
    },
    models::{PayloadType, Platforms},
    system::signer::OpenSslSigner,
};

/// Options shared by every command that needs manifests.
#[derive(Args, Debug, Default)]
pub struct ManifestArgs {
    /// Directory of manifest definition files. Overrides `manifest_dir` in config.toml.
    #[arg(long, value_name = "DIR")]
    pub manifests: Option<PathBuf>,
}

pub fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("Could not determine the current directory")
}

pub fn load_config() -> Result<AppConfig> {
    config::load_app_config().context("Failed to load the profilekit configuration")
}

/// Loads the manifests from `--manifests`, else from the configured directory. Without
/// either, an empty manifest is used and every payload is treated as custom.
pub fn load_manifest(config: &AppConfig, args: &ManifestArgs) -> Result<Manifest> {
    let dir = match &args.manifests {
        Some(dir) => Some(dir.clone()),
        None => config.manifest_dir(&current_dir()?)?,
    };
    let Some(dir) = dir else {
        log::warn!("No manifest directory configured; payloads will be treated as custom.");
        return Ok(Manifest::default());
    };
    manifest_loader::load_directory(&dir)
        .with_context(|| format!("Failed to load manifests from '{}'", dir.display()))
}

pub fn load_profile(path: &Path) -> Result<Profile> {
    Profile::load(path).with_context(|| format!("Failed to open profile '{}'", path.display()))
}

pub fn save_profile(profile: &mut Profile, path: &Path) -> Result<()> {
    if !profile.needs_saving() {
        log::debug!("'{}' is unchanged.", path.display());
        return Ok(());
    }
    profile
        .save(path)
        .with_context(|| format!("Failed to save profile '{}'", path.display()))
}

/// The payload type of `domain`: the explicit `--payload-type`, else the manifest's,
/// else `custom`.
pub fn payload_type_for(
    manifest: &dyn ManifestSource,
    domain: &str,
    explicit: Option<&str>,
) -> Result<PayloadType> {
    if let Some(name) = explicit {
        return PayloadType::from_name(name).ok_or_else(|| {
            let known: Vec<_> = PayloadType::ALL.iter().map(|t| t.as_str()).collect();
            anyhow!("Unknown payload type '{}'. Expected one of: {}", name, known.join(", "))
        });
    }
    Ok(manifest
        .find_domain(domain)
        .map(|d| d.payload_type)
        .unwrap_or(PayloadType::Custom))
}

pub fn find_subkey<'m>(
    manifest: &'m dyn ManifestSource,
    payload_type: PayloadType,
    domain: &str,
    key_path: &str,
) -> Option<&'m Subkey> {
    manifest
        .lookup(payload_type, domain, key_path)
        .and_then(|id| manifest.subkey(id))
}

pub fn parse_platforms(names: &[String]) -> Result<Option<Platforms>> {
    if names.is_empty() {
        return Ok(None);
    }
    Platforms::try_from(names.to_vec()).map(Some).map_err(|e| anyhow!(e))
}

pub fn signer(config: &AppConfig) -> Result<OpenSslSigner> {
    let certificates = config.certificates_dir(&current_dir()?)?;
    Ok(OpenSslSigner::new(config.signing.openssl.clone(), certificates))
}

/// Asks before replacing `path`. `assume_yes` skips the prompt.
pub fn confirm_overwrite(path: &Path, assume_yes: bool) -> Result<bool> {
    if assume_yes || !path.exists() {
        return Ok(true);
    }
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("'{}' already exists. Overwrite?", path.display()))
        .default(false)
        .interact()?)
}
