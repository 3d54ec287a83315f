use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

use crate::{
    cli::handlers::commons::{self, ManifestArgs},
    core::value::{Value, ValueType},
};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Stores a value for a key of a payload. The value is parsed as the key's input type."
)]
struct SetArgs {
    profile: PathBuf,
    domain: String,
    /// Key path, e.g. `Proxy.Port` or `Servers[].Host`.
    key_path: String,
    value: String,

    /// Payload instance to edit. Missing instances are created.
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// Element to edit when the key path crosses an array (`[]`).
    #[arg(long)]
    array_index: Option<usize>,

    /// Parse the value as this type instead of the manifest's (string, integer, real,
    /// boolean, date, data, array, dictionary). Needed for keys without a manifest.
    #[arg(long = "type")]
    value_type: Option<ValueType>,

    #[arg(long)]
    payload_type: Option<String>,

    /// Store the value without enabling the key.
    #[arg(long)]
    no_enable: bool,

    #[command(flatten)]
    manifest: ManifestArgs,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let set_args = SetArgs::try_parse_from(&args)?;
    let config = commons::load_config()?;
    let manifest = commons::load_manifest(&config, &set_args.manifest)?;
    let mut profile = commons::load_profile(&set_args.profile)?;

    let domain = set_args.domain.as_str();
    let payload_type =
        commons::payload_type_for(&manifest, domain, set_args.payload_type.as_deref())?;
    let subkey = commons::find_subkey(&manifest, payload_type, domain, &set_args.key_path);
    if subkey.is_none() {
        log::warn!("'{}' is not described by the manifest of {}.", set_args.key_path, domain);
    }

    let kind = set_args
        .value_type
        .or(subkey.map(|s| s.value_input_type))
        .unwrap_or(ValueType::String);
    let value = Value::parse_as(kind, &set_args.value).map_err(|e| anyhow!(e))?;

    while profile.settings.payload_count(domain, payload_type) <= set_args.index {
        profile.settings.add_payload(domain, payload_type);
    }

    let stored = match subkey {
        Some(subkey) => profile.settings.set_display_value(
            subkey,
            set_args.index,
            set_args.array_index,
            value.clone(),
        ),
        None => profile.settings.set_value_at(
            &set_args.key_path,
            domain,
            payload_type,
            set_args.index,
            set_args.array_index,
            value.clone(),
        ),
    };
    if !stored {
        return Err(anyhow!(
            "Could not store '{}': the key path does not fit the values already stored.",
            set_args.key_path
        ));
    }
    if !set_args.no_enable {
        profile.settings.set_view_enabled(
            &set_args.key_path,
            domain,
            payload_type,
            set_args.index,
            true,
        );
    }

    if let Some(subkey) = subkey {
        let mut resolver = profile.resolver(&manifest);
        if resolver.is_excluded(subkey.id, set_args.index, set_args.array_index) {
            println!(
                "{} '{}' is currently excluded by its conditions and will not be exported.",
                "!".yellow(),
                set_args.key_path
            );
        }
    }

    commons::save_profile(&mut profile, &set_args.profile)?;
    println!(
        "{} {} {} = {}",
        "✔".green(),
        domain.dimmed(),
        set_args.key_path.cyan(),
        value
    );
    Ok(())
}
