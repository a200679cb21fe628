//! Operator console on stdin/stdout
//!
//! Each input line is one command:
//!
//! ```text
//! get <field>                  read a field through the operator slot
//! set <field> <value> [force]  write a field; `force` skips validation
//! sniff on|off                 mirror all bus traffic or only ours
//! rget <field>                 read through the remote request path
//! rset <field> <value>         write through the remote request path
//! help
//! quit
//! ```

use std::sync::Arc;

use bsb_hub::{
    CommandSender, Emitter, LocalCommand, MonitorEvent, RemoteAction, RemoteClient, RequestError, Source,
    StopSignal,
};
use bsb_protocol::{FieldTable, Telegram, ValidateError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const HELP: &str = "commands: get <field> | set <field> <value> [force] | sniff on|off | \
rget <field> | rset <field> <value> | help | quit";

/// A parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    /// Handled by the dispatcher directly
    Local(LocalCommand),
    /// Sent through the remote request path, outcome printed when it arrives
    Remote(RemoteAction),
    Help,
    Empty,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a field number")]
    FieldNumber(String),

    #[error(transparent)]
    Value(#[from] ValidateError),
}

fn field_number(word: Option<&str>, usage: &'static str) -> Result<u32, CommandError> {
    let word = word.ok_or(CommandError::Usage(usage))?;
    word.parse()
        .map_err(|_| CommandError::FieldNumber(word.to_string()))
}

/// Parse one console line against the field table
pub fn parse_line(line: &str, table: &FieldTable) -> Result<ConsoleInput, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ConsoleInput::Empty);
    };

    let input = match verb.to_ascii_lowercase().as_str() {
        "get" | "rget" => {
            let field_id = field_number(words.next(), "get <field>")?;
            if verb.eq_ignore_ascii_case("rget") {
                ConsoleInput::Remote(RemoteAction::Get { field_id })
            } else {
                ConsoleInput::Local(LocalCommand::Get { field_id })
            }
        }
        "set" | "rset" => {
            let field_id = field_number(words.next(), "set <field> <value> [force]")?;
            let text = words
                .next()
                .ok_or(CommandError::Usage("set <field> <value> [force]"))?;
            let value = table.field(field_id)?.parse_value(text)?;
            if verb.eq_ignore_ascii_case("rset") {
                ConsoleInput::Remote(RemoteAction::Set { field_id, value })
            } else {
                let validate = match words.next() {
                    None => true,
                    Some(w) if w.eq_ignore_ascii_case("force") => false,
                    Some(_) => return Err(CommandError::Usage("set <field> <value> [force]")),
                };
                ConsoleInput::Local(LocalCommand::Set {
                    field_id,
                    value,
                    validate,
                })
            }
        }
        "sniff" => match words.next().map(str::to_ascii_lowercase).as_deref() {
            Some("on") => ConsoleInput::Local(LocalCommand::Sniff(true)),
            Some("off") => ConsoleInput::Local(LocalCommand::Sniff(false)),
            _ => return Err(CommandError::Usage("sniff on|off")),
        },
        "quit" | "exit" => ConsoleInput::Local(LocalCommand::Quit),
        "help" | "?" => ConsoleInput::Help,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(input)
}

/// One-line rendering of a telegram with field name and labels
pub fn describe(telegram: &Telegram, table: &FieldTable) -> String {
    let field = table.get(telegram.field_id);
    let name = field.map(|f| f.name.as_str()).unwrap_or("?");
    let mut line = format!(
        "{:02X} -> {:02X} {} {} {}",
        telegram.src, telegram.dst, telegram.packet_type, telegram.field_id, name
    );
    match (&telegram.value, field) {
        (Some(value), Some(field)) => line.push_str(&format!(" = {}", field.display_value(value))),
        (Some(value), None) => line.push_str(&format!(" = {value}")),
        (None, _) if !telegram.payload.is_empty() => {
            line.push_str(&format!(" [{} bytes]", telegram.payload.len()))
        }
        (None, _) => {}
    }
    line
}

/// Print monitor events until the gateway drops its sender
pub async fn print_monitor(mut events: mpsc::Receiver<MonitorEvent>, table: Arc<FieldTable>) {
    while let Some(event) = events.recv().await {
        match event {
            MonitorEvent::Telegram { slot, telegram } => match slot {
                Some(slot) => println!("[{slot}] {}", describe(&telegram, &table)),
                None => println!("{}", describe(&telegram, &table)),
            },
            MonitorEvent::CommandFailed { command, error } => println!("'{command}' failed: {error}"),
            MonitorEvent::SniffMode(on) => println!("sniff mode {}", if on { "on" } else { "off" }),
        }
    }
}

fn print_outcome(action: &RemoteAction, outcome: Result<Telegram, RequestError>, table: &FieldTable) {
    match outcome {
        Ok(telegram) => println!("{}", describe(&telegram, table)),
        Err(e) => println!("{action:?}: {e}"),
    }
}

/// Stdin reader feeding operator commands into the hub
///
/// Not stoppable: a pending stdin read cannot be interrupted, so the hub
/// aborts this source at shutdown.
pub struct Console {
    table: Arc<FieldTable>,
    remote: Option<RemoteClient>,
}

impl Console {
    pub fn new(table: Arc<FieldTable>, remote: Option<RemoteClient>) -> Self {
        Self { table, remote }
    }

    async fn handle_line(&self, line: &str, commands: &CommandSender) -> bool {
        match parse_line(line, &self.table) {
            Ok(ConsoleInput::Local(command)) => return commands.send(command).await,
            Ok(ConsoleInput::Remote(action)) => match &self.remote {
                Some(remote) => {
                    let remote = remote.clone();
                    let table = self.table.clone();
                    // Outcome may take seconds; keep reading meanwhile
                    tokio::spawn(async move {
                        let outcome = match action.clone() {
                            RemoteAction::Get { field_id } => remote.get(field_id).await,
                            RemoteAction::Set { field_id, value } => remote.set(field_id, value).await,
                        };
                        print_outcome(&action, outcome, &table);
                    });
                }
                None => println!("remote interface is disabled"),
            },
            Ok(ConsoleInput::Help) => println!("{HELP}"),
            Ok(ConsoleInput::Empty) => {}
            Err(e) => println!("{e}"),
        }
        true
    }
}

impl Source for Console {
    fn name(&self) -> &str {
        "cmd"
    }

    fn stoppable(&self) -> bool {
        false
    }

    async fn run(self, emitter: Emitter, _stop: StopSignal) {
        let commands = CommandSender::new(emitter);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}");

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !self.handle_line(&line, &commands).await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("Cannot read stdin: {}", e);
                    break;
                }
            }
        }
    }
}
