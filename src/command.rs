//! Terminal input parsing

use crate::session::RequestMode;
use serde_json::{Map, Value};

/// One line of terminal input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send { text: String, mode: RequestMode },
    Context(Map<String, Value>),
    /// Local restart only
    Restart,
    /// Restart and ask the transport to drop its conversation
    Reset,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub const HELP: &str = "\
commands:
  <text>              send using the default mode
  /send <text>        send and wait for the full reply
  /stream <text>      send and print the reply as it streams
  /context k=v ...    merge entries into the request context
  /restart            clear the transcript
  /reset              clear the transcript and the server conversation
  /help               show this help
  /quit               exit";

impl Command {
    pub fn parse(line: &str, default_mode: RequestMode) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Command::Send {
                text: line.to_string(),
                mode: default_mode,
            };
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));

        match name {
            "send" => Command::Send {
                text: rest.to_string(),
                mode: RequestMode::Fetch,
            },
            "stream" => Command::Send {
                text: rest.to_string(),
                mode: RequestMode::Stream,
            },
            "context" => parse_context(rest).unwrap_or_else(|| Command::Unknown(line.to_string())),
            "restart" => Command::Restart,
            "reset" => Command::Reset,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

/// `k=v` pairs; values that parse as JSON keep their type, others become strings
fn parse_context(args: &str) -> Option<Command> {
    let mut entries = Map::new();
    for pair in args.split_whitespace() {
        let (key, value) = pair.split_once('=')?;
        if key.is_empty() {
            return None;
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        entries.insert(key.to_string(), value);
    }
    if entries.is_empty() {
        return None;
    }
    Some(Command::Context(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_uses_default_mode() {
        assert_eq!(
            Command::parse("  hello there ", RequestMode::Stream),
            Command::Send {
                text: "hello there".to_string(),
                mode: RequestMode::Stream,
            }
        );
    }

    #[test]
    fn test_explicit_modes() {
        assert_eq!(
            Command::parse("/stream tell me more", RequestMode::Fetch),
            Command::Send {
                text: "tell me more".to_string(),
                mode: RequestMode::Stream,
            }
        );
        assert_eq!(
            Command::parse("/send", RequestMode::Stream),
            Command::Send {
                text: String::new(),
                mode: RequestMode::Fetch,
            }
        );
    }

    #[test]
    fn test_context_pairs() {
        let Command::Context(entries) =
            Command::parse("/context productId=123 name=boots vip=true", RequestMode::Fetch)
        else {
            panic!("expected context command");
        };
        assert_eq!(entries["productId"], json!(123));
        assert_eq!(entries["name"], json!("boots"));
        assert_eq!(entries["vip"], json!(true));
    }

    #[test]
    fn test_bad_context_is_unknown() {
        assert!(matches!(
            Command::parse("/context nope", RequestMode::Fetch),
            Command::Unknown(_)
        ));
        assert!(matches!(
            Command::parse("/context", RequestMode::Fetch),
            Command::Unknown(_)
        ));
    }

    #[test]
    fn test_control_commands() {
        assert_eq!(Command::parse("/restart", RequestMode::Fetch), Command::Restart);
        assert_eq!(Command::parse("/reset", RequestMode::Fetch), Command::Reset);
        assert_eq!(Command::parse("/quit", RequestMode::Fetch), Command::Quit);
        assert_eq!(Command::parse("", RequestMode::Fetch), Command::Empty);
        assert_eq!(
            Command::parse("/dance", RequestMode::Fetch),
            Command::Unknown("/dance".to_string())
        );
    }
}
