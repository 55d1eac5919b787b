//! In-band policy commands and the response gate.

use parley_core::dialog::{Mode, Scope};
use std::fmt;

/// A recognized `/mode` or `/scope` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetMode(Mode),
    SetScope(Scope),
}

impl Command {
    /// Parse `text` as a policy command.
    ///
    /// Accepts `/mode <off|mention|always>` and `/scope <initiator|thread|hybrid>`,
    /// optionally written `/mode@handle`. A command addressed to another bot,
    /// an unknown value, or a missing value is not a command. `/scope` is
    /// only meaningful in multi-party chats.
    pub fn parse(text: &str, bot_handle: Option<&str>, is_private: bool) -> Option<Self> {
        let mut words = text.split_whitespace();
        let head = words.next()?;
        let (name, addressee) = match head.split_once('@') {
            Some((name, to)) => (name, Some(to)),
            None => (head, None),
        };

        if let Some(to) = addressee {
            let handle = bot_handle?;
            if !to.eq_ignore_ascii_case(handle.trim_start_matches('@')) {
                return None;
            }
        }

        let value = words.next()?;
        match name.to_ascii_lowercase().as_str() {
            "/mode" => value.parse().ok().map(Command::SetMode),
            "/scope" if !is_private => value.parse().ok().map(Command::SetScope),
            _ => None,
        }
    }

    /// Reply text confirming the change.
    pub fn confirmation(&self) -> String {
        match self {
            Command::SetMode(mode) => format!("Mode updated: {mode}"),
            Command::SetScope(scope) => format!("Scope updated: {scope}"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetMode(mode) => write!(f, "/mode {mode}"),
            Command::SetScope(scope) => write!(f, "/scope {scope}"),
        }
    }
}

/// Whether the assistant answers an event under `mode`.
///
/// One-to-one chats are always answered.
pub fn should_respond(mode: Mode, is_private: bool, mentioned: bool) -> bool {
    if is_private {
        return true;
    }
    match mode {
        Mode::Off => false,
        Mode::Always => true,
        Mode::Mention => mentioned,
    }
}
