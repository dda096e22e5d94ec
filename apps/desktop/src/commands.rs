//! Line input from the terminal mapped to session actions.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Find,
    Stop,
    Next,
    Leave,
    Status,
    Help,
    Quit,
    Say(String),
    Unknown(String),
    Empty,
}

pub const HELP_TEXT: &str = "\
/find    start searching for a partner
/stop    cancel the current search
/next    leave this chat and find someone new
/leave   disconnect from the current chat
/status  show the session status
/quit    exit
anything else is sent as a message";

pub fn parse_input(line: &str) -> InputCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return InputCommand::Empty;
    }
    // A leading double slash escapes a literal message starting with '/'.
    if let Some(text) = trimmed.strip_prefix("//") {
        return InputCommand::Say(format!("/{text}"));
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return InputCommand::Say(trimmed.to_string());
    };
    match command.to_ascii_lowercase().as_str() {
        "find" | "start" => InputCommand::Find,
        "stop" => InputCommand::Stop,
        "next" => InputCommand::Next,
        "leave" | "disconnect" => InputCommand::Leave,
        "status" => InputCommand::Status,
        "help" | "?" => InputCommand::Help,
        "quit" | "exit" => InputCommand::Quit,
        _ => InputCommand::Unknown(trimmed.to_string()),
    }
}
