// src/bin/profilekit.rs

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use colored::*;
use profilekit::cli::{Cli, handlers};

// --- Command Definition and Registry ---

/// A command, its aliases and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>) -> Result<()>,
}

/// Every command the binary knows. To add a command, add an entry here.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "new",
        aliases: &["init"],
        handler: handlers::new::handle,
    },
    CommandDefinition {
        name: "set",
        aliases: &[],
        handler: handlers::set::handle,
    },
    CommandDefinition {
        name: "enable",
        aliases: &[],
        handler: handlers::enable::handle,
    },
    CommandDefinition {
        name: "inspect",
        aliases: &["info"],
        handler: handlers::inspect::handle,
    },
    CommandDefinition {
        name: "export",
        aliases: &[],
        handler: handlers::export::handle,
    },
    CommandDefinition {
        name: "plists",
        aliases: &[],
        handler: handlers::plists::handle,
    },
    CommandDefinition {
        name: "import",
        aliases: &[],
        handler: handlers::import::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(name) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let command = find_command(&name).ok_or_else(|| {
        let known: Vec<_> = COMMAND_REGISTRY.iter().map(|c| c.name).collect();
        anyhow!("Unknown command '{}'. Available: {}", name, known.join(", "))
    })?;
    (command.handler)(cli.args)
}
