//! Operator command source.
//!
//! Reads `ADD <host>`, `REMOVE <host>`, `LIST` and `COUNT` lines for the
//! life of the process and applies them to the reject list.

use crate::metrics::counters;
use crate::store::RejectList;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// A parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Add a host to the reject list.
    Add(String),
    /// Remove a host from the reject list.
    Remove(String),
    /// Log the current reject list.
    List,
    /// Log the number of rejected hosts.
    Count,
}

/// Errors parsing an administrative command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminParseError {
    /// The line was blank.
    #[error("empty command")]
    Empty,
    /// The first word is not a known command.
    #[error("unknown command: {0}")]
    Unknown(String),
    /// `ADD` or `REMOVE` without a host.
    #[error("{0} requires a host")]
    MissingHost(&'static str),
    /// Extra words after the command's arguments.
    #[error("{0} takes {1} argument(s)")]
    TooManyArgs(&'static str, usize),
}

impl AdminCommand {
    /// Metrics label for this command.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::List => "list",
            Self::Count => "count",
        }
    }
}

impl FromStr for AdminCommand {
    type Err = AdminParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err(AdminParseError::Empty);
        };
        let (name, arity) = match word.to_ascii_uppercase().as_str() {
            "ADD" => ("ADD", 1),
            "REMOVE" => ("REMOVE", 1),
            "LIST" => ("LIST", 0),
            "COUNT" => ("COUNT", 0),
            _ => return Err(AdminParseError::Unknown(word.to_string())),
        };
        let args: Vec<&str> = words.collect();
        if args.len() > arity {
            return Err(AdminParseError::TooManyArgs(name, arity));
        }
        match name {
            "ADD" | "REMOVE" => {
                let host = args.first().ok_or(AdminParseError::MissingHost(name))?;
                Ok(if name == "ADD" {
                    Self::Add((*host).to_string())
                } else {
                    Self::Remove((*host).to_string())
                })
            }
            "LIST" => Ok(Self::List),
            _ => Ok(Self::Count),
        }
    }
}

/// Apply `command` to `store` and describe the outcome.
pub fn execute(command: &AdminCommand, store: &RejectList) -> String {
    counters::admin_commands_total(command.label());
    match command {
        AdminCommand::Add(host) => {
            if store.add(host) {
                format!("added {host}")
            } else if store.contains(host) {
                format!("{host} already present")
            } else {
                format!("refused invalid host {host:?}")
            }
        }
        AdminCommand::Remove(host) => {
            if store.remove(host) {
                format!("removed {host}")
            } else {
                format!("{host} not present")
            }
        }
        AdminCommand::List => {
            let hosts = store.snapshot();
            format!("{} host(s): {}", hosts.len(), hosts.join(", "))
        }
        AdminCommand::Count => format!("{} host(s)", store.len()),
    }
}

/// Read and apply commands from `reader` until it reaches EOF.
///
/// Malformed lines, including lines that are not UTF-8, are logged and
/// skipped. Returns the number of commands applied.
///
/// # Errors
///
/// Returns the I/O error that ended the stream early.
pub async fn run_admin<R>(mut reader: R, store: &RejectList) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut applied = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(line = %String::from_utf8_lossy(&buf).trim_end(), "ignoring command: {}", e);
                continue;
            }
        };
        match line.parse::<AdminCommand>() {
            Ok(command) => {
                let outcome = execute(&command, store);
                info!(command = command.label(), "{}", outcome);
                applied += 1;
            }
            Err(AdminParseError::Empty) => {}
            Err(e) => warn!(line = %line.trim_end().escape_debug(), "ignoring command: {}", e),
        }
    }
    info!("admin command source closed");
    Ok(applied)
}
