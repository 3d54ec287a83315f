use clap::Parser;

pub mod handlers;

const HELP_TEMPLATE: &str = "\
<title>profilekit</title> {version}
Resolves and exports Apple configuration profiles from manifest-described settings.

<title>USAGE</title>
  profilekit <cmd><command></cmd> [args...]

<title>PROFILE</title>
  <cmd>new</cmd> <<hl>file</hl>> --name <<hl>title</hl>>          Create a settings file
  <cmd>set</cmd> <<hl>file</hl>> <<hl>domain</hl>> <<hl>key</hl>> <<hl>value</hl>>    Store a value
  <cmd>enable</cmd> <<hl>file</hl>> <<hl>domain</hl>> [<<hl>key</hl>>] [--off]   Enable a payload or key
  <cmd>inspect</cmd> <<hl>file</hl>> [--json]               Show how every key resolves

<title>OUTPUT</title>
  <cmd>export</cmd> <<hl>file</hl>> [-o <<hl>out</hl>>] [--sign]      Write a .mobileconfig
  <cmd>plists</cmd> <<hl>file</hl>> -o <<hl>dir</hl>>                 Write one plist per payload
  <cmd>import</cmd> <<hl>profiles...</hl>> [-o <<hl>dir</hl>>]          Read .mobileconfig files

<dim>Run `profilekit <command> --help` for the options of a command.
Set RUST_LOG=debug to trace resolution decisions.</dim>
";

/// Builds the color-aware help string at runtime.
fn build_help_string() -> &'static str {
    let use_colors = colored::control::SHOULD_COLORIZE.should_colorize();

    let title = if use_colors { "\x1b[1;33m" } else { "" }; // Bold Yellow
    let hl = if use_colors { "\x1b[1;36m" } else { "" }; // Bold Cyan
    let cmd = if use_colors { "\x1b[36m" } else { "" }; // Cyan
    let dim = if use_colors { "\x1b[2m" } else { "" };
    let reset = if use_colors { "\x1b[0m" } else { "" };

    let formatted_string = HELP_TEMPLATE
        .replace("<title>", title)
        .replace("</title>", reset)
        .replace("<hl>", hl)
        .replace("</hl>", reset)
        .replace("<cmd>", cmd)
        .replace("</cmd>", reset)
        .replace("<dim>", dim)
        .replace("</dim>", reset);

    Box::leak(formatted_string.into_boxed_str())
}

/// profilekit: settings resolution and export for configuration profiles.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    help_template = { build_help_string() },
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
#[command(trailing_var_arg = true)]
pub struct Cli {
    /// The command to run.
    #[arg()]
    pub command: Option<String>,

    /// Everything after the command, handed to its handler unparsed.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}
