//! Classification of established-connection traffic into chat, admin
//! commands, and raw game input

use shared::{ADMIN_ESCAPE, CHAT_ESCAPE};

/// One line of traffic from an established connection, classified.
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// `//command` — administrative command for the server itself.
    Admin(AdminCommand<'a>),
    /// `/text` — chat text to broadcast as `<name> text`.
    Chat(&'a str),
    /// Anything else — raw input for the supervised game process.
    Game(&'a str),
}

/// The administrative command surface.
#[derive(Debug, PartialEq, Eq)]
pub enum AdminCommand<'a> {
    Help,
    Debug,
    NoDebug,
    Allow(&'a str),
    Deny(&'a str),
    Acl,
    Users,
    Start(Option<&'a str>),
    Stop,
    Pause,
    Resume,
    Quit,
    Unknown(&'a str),
}

/// Reply sent for `//help`, one line per command.
pub const HELP_TEXT: &[&str] = &[
    "available commands:",
    "  //help           this list",
    "  //debug          subscribe to diagnostic broadcasts",
    "  //nodebug        unsubscribe from diagnostic broadcasts",
    "  //allow <user>   add a user to the access list",
    "  //deny <user>    remove a user from the access list",
    "  //acl            show the access list",
    "  //users          list connected users",
    "  //start [map]    start the game",
    "  //stop           stop the game",
    "  //pause          pause the game",
    "  //resume         resume the game",
    "  //quit           shut down the server",
];

/// Classifies one line from an established connection.
pub fn classify(line: &str) -> Line<'_> {
    if let Some(rest) = line.strip_prefix(ADMIN_ESCAPE) {
        return Line::Admin(parse_admin(rest));
    }
    if let Some(rest) = line.strip_prefix(CHAT_ESCAPE) {
        return Line::Chat(rest);
    }
    Line::Game(line)
}

fn parse_admin(rest: &str) -> AdminCommand<'_> {
    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or("");
    let arg = words.next();
    let extra = words.next();

    match (command, arg, extra) {
        ("help", None, None) => AdminCommand::Help,
        ("debug", None, None) => AdminCommand::Debug,
        ("nodebug", None, None) => AdminCommand::NoDebug,
        ("allow", Some(user), None) => AdminCommand::Allow(user),
        ("deny", Some(user), None) => AdminCommand::Deny(user),
        ("acl", None, None) => AdminCommand::Acl,
        ("users", None, None) => AdminCommand::Users,
        ("start", map, None) => AdminCommand::Start(map),
        ("stop", None, None) => AdminCommand::Stop,
        ("pause", None, None) => AdminCommand::Pause,
        ("resume", None, None) => AdminCommand::Resume,
        ("quit", None, None) => AdminCommand::Quit,
        _ => AdminCommand::Unknown(command),
    }
}
