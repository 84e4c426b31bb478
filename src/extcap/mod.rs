// src/extcap/mod.rs
//
// Wireshark extcap protocol: interface listing, link-layer types, config
// schema and capture. Protocol lines go to the output stream only; every
// line is mirrored to the diagnostic log.

mod args;
mod capture;
pub mod pcap;

pub use args::{parse_command_line, CommandLine, ExtcapArgs, ExtcapCommand};
pub use capture::{CaptureFilter, PcapSink};

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::discovery::{DiscoveryConfig, DiscoveryRecord, DiscoveryService};
use crate::io::IoError;
use crate::logging::Logger;
use crate::settings::BridgeSettings;

pub const PREAMBLE: &str = "extcap {version=1.0}{help=http://silabs.com}";
pub const DLT_LINE: &str = "dlt {number=147}{name=USER1}{display=WSTK Silicon Labs DLT}";

#[derive(Debug, Error)]
pub enum ExtcapError {
    #[error("no extcap command given")]
    NoCommand,

    #[error("{command} requires {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("invalid capture filter: {0}")]
    InvalidFilter(String),

    #[error("invalid arguments: {0}")]
    Arguments(String),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Writes protocol lines and mirrors them to the log.
pub struct ExtcapOutput<'a> {
    out: &'a mut dyn Write,
    log: Logger,
}

impl<'a> ExtcapOutput<'a> {
    pub fn new(out: &'a mut dyn Write, log: Logger) -> Self {
        ExtcapOutput { out, log }
    }

    pub fn println(&mut self, line: &str) -> Result<(), ExtcapError> {
        tlog!(self.log, "extcap <  {}", line);
        writeln!(self.out, "{}", line)
            .and_then(|_| self.out.flush())
            .map_err(|e| IoError::write("stdout", e.to_string()))?;
        Ok(())
    }
}

/// Everything resolved at startup for one invocation.
pub struct ExtcapSession {
    pub command: ExtcapCommand,
    pub interface: Option<String>,
    pub fifo: Option<PathBuf>,
    pub filter: Option<String>,
    pub settings: BridgeSettings,
    pub log: Logger,
}

impl ExtcapSession {
    pub fn new(
        command: ExtcapCommand,
        args: ExtcapArgs,
        settings: BridgeSettings,
        log: Logger,
    ) -> Self {
        ExtcapSession {
            command,
            interface: args.extcap_interface,
            fifo: args.fifo,
            filter: args.extcap_capture_filter,
            settings,
            log,
        }
    }

    fn require_interface(&self) -> Result<&str, ExtcapError> {
        self.interface
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ExtcapError::MissingArgument {
                command: self.command.flag(),
                argument: "--extcap-interface",
            })
    }

    fn require_fifo(&self) -> Result<&Path, ExtcapError> {
        self.fifo.as_deref().ok_or(ExtcapError::MissingArgument {
            command: self.command.flag(),
            argument: "--fifo",
        })
    }

    pub async fn execute(&self, out: &mut dyn Write) -> Result<(), ExtcapError> {
        let mut out = ExtcapOutput::new(out, self.log.clone());
        match self.command {
            ExtcapCommand::ListInterfaces => self.list_interfaces(&mut out).await,
            ExtcapCommand::ListDlts => self.list_dlts(&mut out),
            ExtcapCommand::Config => self.config(),
            ExtcapCommand::Capture => capture::run_capture(self).await,
        }
    }

    async fn list_interfaces(&self, out: &mut ExtcapOutput<'_>) -> Result<(), ExtcapError> {
        out.println(PREAMBLE)?;

        let service = DiscoveryService::new(
            DiscoveryConfig::from_settings(&self.settings),
            self.log.clone(),
        );
        let mut found: Vec<DiscoveryRecord> = Vec::new();
        service.run_discovery(|r| found.push(r.clone())).await?;

        for record in &found {
            out.println(&format!(
                "interface {{value={}}}{{display={}}}",
                record.interface_value(),
                record.display_name()
            ))?;
        }
        Ok(())
    }

    fn list_dlts(&self, out: &mut ExtcapOutput<'_>) -> Result<(), ExtcapError> {
        self.require_interface()?;
        out.println(DLT_LINE)
    }

    /// No configurable options are offered.
    fn config(&self) -> Result<(), ExtcapError> {
        self.require_interface()?;
        Ok(())
    }
}

/// Parse `args`, run the selected command and return the exit code.
pub async fn run_extcap<I, T>(
    args: I,
    settings: BridgeSettings,
    log: Logger,
    out: &mut dyn Write,
) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let raw: String = args
        .iter()
        .skip(1)
        .map(|a| format!(" {}", a.to_string_lossy()))
        .collect();
    tlog!(log, "extcap > {}", raw);

    let result = match parse_command_line(args) {
        Ok(line) => {
            if !line.ignored.is_empty() {
                twarn!(log, "[extcap] Ignoring arguments: {}", line.ignored.join(" "));
            }
            match line.command {
                Some(command) => {
                    tlog!(log, "[extcap] Command {}", command.flag());
                    ExtcapSession::new(command, line.args, settings, log.clone())
                        .execute(out)
                        .await
                }
                None => Err(ExtcapError::NoCommand),
            }
        }
        Err(e) => Err(ExtcapError::Arguments(e)),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            terror!(log, "[extcap] {}", e);
            1
        }
    }
}
