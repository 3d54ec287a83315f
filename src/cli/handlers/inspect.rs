// src/cli/handlers/inspect.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use serde_json::json;
use std::path::PathBuf;

use crate::{
    cli::handlers::commons::{self, ManifestArgs},
    constants::CONFIGURATION_DOMAIN,
    core::{
        enablement::{EnableQuery, Resolver},
        manifest::{ManifestSource, SubkeyId},
        profile::Profile,
        value::Value,
    },
    models::PayloadType,
};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Shows how every key of a profile resolves for its current platforms, scope and distribution."
)]
struct InspectArgs {
    profile: PathBuf,

    /// Only show this payload domain.
    #[arg(long)]
    domain: Option<String>,

    /// Also list keys that resolve to disabled.
    #[arg(long)]
    all: bool,

    /// Print machine-readable JSON instead of a listing.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    manifest: ManifestArgs,
}

/// One resolved key of one payload instance.
struct KeyRow {
    key_path: String,
    depth: usize,
    enabled: bool,
    required: bool,
    excluded: bool,
    available: bool,
    value: Option<Value>,
}

struct PayloadReport {
    payload_type: PayloadType,
    domain: String,
    index: usize,
    enabled: bool,
    rows: Vec<KeyRow>,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let inspect_args = InspectArgs::try_parse_from(&args)?;
    let config = commons::load_config()?;
    let manifest = commons::load_manifest(&config, &inspect_args.manifest)?;
    let mut profile = commons::load_profile(&inspect_args.profile)?;

    let reports = collect(&mut profile, &manifest, inspect_args.domain.as_deref());
    if inspect_args.json {
        print_json(&profile, &reports)?;
    } else {
        print_listing(&profile, &reports, inspect_args.all);
    }

    let stats = profile.context.cache_stats();
    log::debug!(
        "Resolution cache: {} hits, {} misses, {} resets.",
        stats.hits,
        stats.misses,
        stats.resets
    );
    Ok(())
}

fn collect(profile: &mut Profile, manifest: &dyn ManifestSource, only: Option<&str>) -> Vec<PayloadReport> {
    let instances: Vec<(PayloadType, String, usize)> = profile
        .settings
        .domains()
        .into_iter()
        .filter(|(_, domain, _)| *domain != CONFIGURATION_DOMAIN)
        .filter(|(_, domain, _)| only.is_none_or(|o| o == *domain))
        .flat_map(|(t, domain, count)| (0..count).map(move |i| (t, domain.to_string(), i)))
        .collect();

    let mut reports = Vec::with_capacity(instances.len());
    for (payload_type, domain, index) in instances {
        let enabled = profile.settings.is_payload_enabled(&domain, payload_type, index);
        let mut rows = Vec::new();
        if let Some(definition) = manifest.domain(payload_type, &domain) {
            let roots = definition.subkeys.clone();
            let mut resolver = profile.resolver(manifest);
            walk(&mut resolver, manifest, &roots, index, 0, &mut rows);
        }
        reports.push(PayloadReport {
            payload_type,
            domain,
            index,
            enabled,
            rows,
        });
    }
    reports
}

fn walk(
    resolver: &mut Resolver<'_>,
    manifest: &dyn ManifestSource,
    ids: &[SubkeyId],
    index: usize,
    depth: usize,
    rows: &mut Vec<KeyRow>,
) {
    for id in ids {
        let Some(subkey) = manifest.subkey(*id) else {
            continue;
        };
        if subkey.segmented_control {
            walk(resolver, manifest, &subkey.children, index, depth, rows);
            continue;
        }
        if subkey.is_dynamic_placeholder() {
            continue;
        }
        rows.push(KeyRow {
            key_path: subkey.key_path.clone(),
            depth,
            enabled: resolver.is_enabled(subkey.id, index, EnableQuery::default()),
            required: resolver.is_required(subkey.id, index, None),
            excluded: resolver.is_excluded(subkey.id, index, None),
            available: resolver.is_available(subkey.id),
            value: resolver.effective_value(subkey.id, index, None),
        });
        // Array elements are shown through the array's value.
        if subkey.is_dictionary() {
            walk(resolver, manifest, &subkey.children, index, depth + 1, rows);
        }
    }
}

fn print_listing(profile: &Profile, reports: &[PayloadReport], all: bool) {
    let context = &profile.context;
    println!(
        "\n--- {} '{}' ---",
        "Profile".bold(),
        profile.settings.title().unwrap_or("Untitled").yellow()
    );
    println!("  {:<14} {}", "Identifier".blue(), profile.settings.root_identifier().unwrap_or("-"));
    println!("  {:<14} {}", "Platforms".blue(), context.platforms().names().join(", "));
    println!("  {:<14} {}", "Scope".blue(), context.scope().names().join(", "));
    println!("  {:<14} {}", "Distribution".blue(), context.distribution());
    println!("  {:<14} {:?}", "Export style".blue(), profile.export_style);

    if reports.is_empty() {
        println!("\n  {}", "No payloads.".dimmed());
        return;
    }

    for report in reports {
        let state = if report.enabled { "enabled".green() } else { "disabled".red() };
        println!(
            "\n  {} #{} ({}) {}",
            report.domain.yellow(),
            report.index,
            report.payload_type.to_string().dimmed(),
            state
        );
        for row in report.rows.iter().filter(|r| all || (r.enabled && r.available && !r.excluded)) {
            let mut flags = Vec::new();
            if row.required {
                flags.push("required".magenta().to_string());
            }
            if row.excluded {
                flags.push("excluded".red().to_string());
            }
            if !row.available {
                flags.push("unavailable".dimmed().to_string());
            }
            if !row.enabled {
                flags.push("off".dimmed().to_string());
            }
            let value = row.value.as_ref().map(|v| v.to_string()).unwrap_or_default();
            print!("    {}{}", "  ".repeat(row.depth), row.key_path.cyan());
            if !value.is_empty() {
                print!(" = {}", value);
            }
            if !flags.is_empty() {
                print!(" [{}]", flags.join(", "));
            }
            println!();
        }
    }
}

fn print_json(profile: &Profile, reports: &[PayloadReport]) -> Result<()> {
    let context = &profile.context;
    let payloads: Vec<_> = reports
        .iter()
        .map(|report| {
            let keys: Vec<_> = report
                .rows
                .iter()
                .map(|row| {
                    json!({
                        "keyPath": row.key_path,
                        "enabled": row.enabled,
                        "required": row.required,
                        "excluded": row.excluded,
                        "available": row.available,
                        "value": row.value.as_ref().map(|v| v.to_json()),
                    })
                })
                .collect();
            json!({
                "domain": report.domain,
                "payloadType": report.payload_type.as_str(),
                "index": report.index,
                "enabled": report.enabled,
                "keys": keys,
            })
        })
        .collect();
    let document = json!({
        "title": profile.settings.title(),
        "identifier": profile.settings.root_identifier(),
        "platforms": context.platforms().names(),
        "scope": context.scope().names(),
        "distribution": context.distribution().to_string(),
        "payloads": payloads,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
