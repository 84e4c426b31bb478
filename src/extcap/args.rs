// src/extcap/args.rs
//
// Command line accepted from Wireshark. The four command flags may appear
// together; the one that comes first on the command line wins. The raw
// tokens are scanned for that, and only recognized options are handed to
// clap.

use clap::{CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtcapCommand {
    ListInterfaces,
    ListDlts,
    Config,
    Capture,
}

impl ExtcapCommand {
    pub fn flag(self) -> &'static str {
        match self {
            ExtcapCommand::ListInterfaces => "--extcap-interfaces",
            ExtcapCommand::ListDlts => "--extcap-dlts",
            ExtcapCommand::Config => "--extcap-config",
            ExtcapCommand::Capture => "--capture",
        }
    }
}

const COMMAND_FLAGS: [ExtcapCommand; 4] = [
    ExtcapCommand::ListInterfaces,
    ExtcapCommand::ListDlts,
    ExtcapCommand::Config,
    ExtcapCommand::Capture,
];

/// Options that take a value, either `--opt value` or `--opt=value`
const VALUE_OPTIONS: [&str; 6] = [
    "--extcap-interface",
    "--fifo",
    "--extcap-capture-filter",
    "--extcap-version",
    "--extcap-control-in",
    "--extcap-control-out",
];

#[derive(Parser, Debug, Clone)]
#[command(name = "pti-extcap")]
#[command(about = "Wireshark extcap bridge for the Silicon Labs WSTK debug channel")]
#[command(args_override_self = true)]
pub struct ExtcapArgs {
    /// List available adapters
    #[arg(long)]
    pub extcap_interfaces: bool,

    /// List link-layer types of an interface
    #[arg(long)]
    pub extcap_dlts: bool,

    /// Print the configuration schema of an interface
    #[arg(long)]
    pub extcap_config: bool,

    /// Capture from an interface into the FIFO
    #[arg(long)]
    pub capture: bool,

    #[arg(long, value_name = "ID")]
    pub extcap_interface: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub fifo: Option<PathBuf>,

    /// Message type codes to keep, e.g. "1,0x20"
    #[arg(long, value_name = "EXPR")]
    pub extcap_capture_filter: Option<String>,

    // Passed by Wireshark, not used
    #[arg(long, value_name = "VERSION")]
    pub extcap_version: Option<String>,
    #[arg(long, value_name = "PATH")]
    pub extcap_control_in: Option<String>,
    #[arg(long, value_name = "PATH")]
    pub extcap_control_out: Option<String>,
}

/// Result of reading the command line
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub args: ExtcapArgs,
    /// First command flag on the command line, if any
    pub command: Option<ExtcapCommand>,
    /// Tokens that were not understood and were skipped
    pub ignored: Vec<String>,
}

fn option_name(token: &str) -> &str {
    token.split_once('=').map(|(name, _)| name).unwrap_or(token)
}

fn is_known_option(token: &str) -> bool {
    let name = option_name(token);
    VALUE_OPTIONS.contains(&name) || COMMAND_FLAGS.iter().any(|c| c.flag() == name)
}

/// Parse a full argument list (program name first).
///
/// Unknown tokens are skipped so newer Wireshark options do not break the
/// run. A value option without its value is dropped, which leaves the
/// handler to report the missing argument.
pub fn parse_command_line<I, T>(args: I) -> Result<CommandLine, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut tokens = args.into_iter().map(Into::into);
    let mut known: Vec<OsString> = tokens.next().into_iter().collect();
    let mut command = None;
    let mut ignored = Vec::new();

    let mut rest = tokens.peekable();
    while let Some(token) = rest.next() {
        let text = token.to_string_lossy().to_string();
        let name = option_name(&text);

        if let Some(flag) = COMMAND_FLAGS.iter().find(|c| c.flag() == text) {
            command.get_or_insert(*flag);
            known.push(token);
        } else if VALUE_OPTIONS.contains(&name) {
            if name.len() < text.len() {
                known.push(token);
                continue;
            }
            let has_value = rest
                .peek()
                .map(|next| !is_known_option(&next.to_string_lossy()))
                .unwrap_or(false);
            match rest.next_if(|_| has_value) {
                Some(value) => {
                    known.push(token);
                    known.push(value);
                }
                None => ignored.push(text),
            }
        } else {
            ignored.push(text);
        }
    }

    let matches = ExtcapArgs::command()
        .try_get_matches_from(known)
        .map_err(|e| e.to_string().trim_end().to_string())?;
    let parsed = ExtcapArgs::from_arg_matches(&matches).map_err(|e| e.to_string())?;
    Ok(CommandLine {
        args: parsed,
        command,
        ignored,
    })
}
