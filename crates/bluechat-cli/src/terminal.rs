//! Terminal input parsing and event rendering
//!
//! Pure functions so the interactive loop in [`crate::app`] stays a thin
//! `select!` over stdin, chat events and the connect deadline.

use bluechat_core::{ChatError, ChatEvent, EndReason, PeerHandle, SessionOrigin};

// ----------------------------------------------------------------------------
// Input
// ----------------------------------------------------------------------------

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text to send to the connected peer
    Send(String),
    /// `/peers`
    Peers,
    /// `/connect <address|index>`
    Connect(String),
    /// `/status`
    Status,
    /// `/quit` or `/exit`
    Quit,
    /// `/help`
    Help,
    /// Blank line
    Empty,
    /// Unrecognized or malformed command, with a message for the user
    Invalid(String),
}

/// Parse one line of user input
pub fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Empty;
    }

    let Some(command) = line.trim_start().strip_prefix('/') else {
        return Input::Send(line.to_string());
    };

    let mut parts = command.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match name {
        "peers" => Input::Peers,
        "status" => Input::Status,
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        "connect" if arg.is_empty() => {
            Input::Invalid("usage: /connect <address|index>".to_string())
        }
        "connect" => Input::Connect(arg.to_string()),
        other => Input::Invalid(format!("unknown command '/{}', try /help", other)),
    }
}

pub const HELP: &str = "\
Commands:
  /peers                    list paired peers
  /connect <address|index>  connect to a peer
  /status                   show connection status
  /quit                     leave the chat
Anything else is sent to the connected peer.";

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

/// Echo of a line we sent
pub fn render_sent(text: &str) -> String {
    format!("Me: {}", text)
}

/// Human-readable line for a chat event
pub fn render_event(event: &ChatEvent) -> String {
    match event {
        ChatEvent::Connected {
            peer,
            origin: SessionOrigin::Inbound,
            ..
        } => format!("*** {} connected", peer),
        ChatEvent::Connected {
            peer,
            origin: SessionOrigin::Outbound,
            ..
        } => format!("*** Connected to {}", peer),
        ChatEvent::MessageReceived { peer, message, .. } => {
            format!("{}: {}", peer.name, message.text())
        }
        ChatEvent::SessionEnded { peer, reason, .. } => match reason {
            EndReason::PeerClosed => format!("*** {} disconnected", peer),
            EndReason::Cancelled => format!("*** Closed session with {}", peer),
            EndReason::Failed(error) => format!("*** Connection to {} lost: {}", peer, error),
        },
        ChatEvent::ConnectFailed {
            peer,
            error: ChatError::Cancelled,
        } => format!("*** Connection attempt to {} cancelled", peer),
        ChatEvent::ConnectFailed { peer, error } => {
            format!("*** Unable to connect to {}: {}", peer, error)
        }
        ChatEvent::ListenFailed { error } => format!("*** Listening stopped: {}", error),
    }
}

/// Numbered peer list, 1-based to match `/connect <index>`
pub fn render_peers(peers: &[PeerHandle]) -> String {
    if peers.is_empty() {
        return "No paired peers".to_string();
    }
    peers
        .iter()
        .enumerate()
        .map(|(i, peer)| format!("  {}. {}", i + 1, peer))
        .collect::<Vec<_>>()
        .join("\n")
}
