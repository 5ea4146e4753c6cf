//! Line protocol: one whitespace-separated command per line.

mod reply;

use std::fmt;
use std::path::PathBuf;

use crate::storage::{InvalidName, validate_name};
use crate::tasks::{Command, CommandKind, Priority};

pub use reply::Reply;

pub const QUIT_VERB: &str = "QUIT";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Command(Command),
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    EmptyCommand,
    UnknownVerb { verb: String },
    WrongArity { kind: CommandKind, given: usize },
    InvalidSize { value: String },
    InvalidName(InvalidName),
}

impl ProtocolError {
    /// Short text sent to the client after `ERR`.
    pub fn reply_reason(&self) -> String {
        match self {
            Self::EmptyCommand => "empty command".to_owned(),
            Self::UnknownVerb { verb } => format!("unknown command '{verb}'"),
            Self::WrongArity { kind, .. } => format!("usage: {}", kind.usage()),
            Self::InvalidSize { value } => format!("invalid size '{value}'"),
            Self::InvalidName(source) => source.to_string(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "received an empty command line"),
            Self::UnknownVerb { verb } => write!(f, "unknown command verb '{verb}'"),
            Self::WrongArity { kind, given } => write!(
                f,
                "{kind} got {given} argument(s); usage: {}",
                kind.usage()
            ),
            Self::InvalidSize { value } => {
                write!(f, "size '{value}' is not a non-negative integer")
            }
            Self::InvalidName(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(source) => Some(source),
            _ => None,
        }
    }
}

impl From<InvalidName> for ProtocolError {
    fn from(value: InvalidName) -> Self {
        Self::InvalidName(value)
    }
}

/// Parses one command line (without its terminator).
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Err(ProtocolError::EmptyCommand);
    };
    let args = tokens.collect::<Vec<_>>();

    if verb.eq_ignore_ascii_case(QUIT_VERB) {
        return Ok(Request::Quit);
    }
    let Some(kind) = CommandKind::from_verb(verb) else {
        return Err(ProtocolError::UnknownVerb {
            verb: verb.to_owned(),
        });
    };

    let (min, max) = arity(kind);
    if args.len() < min || args.len() > max {
        return Err(ProtocolError::WrongArity {
            kind,
            given: args.len(),
        });
    }

    let username = args[0];
    validate_name("username", username)?;

    let command = match kind {
        CommandKind::Signup => Command::Signup {
            username: username.to_owned(),
            password: args[1].to_owned(),
            priority: args
                .get(2)
                .and_then(|raw| Priority::parse(raw))
                .unwrap_or_default(),
        },
        CommandKind::Login => Command::Login {
            username: username.to_owned(),
            password: args[1].to_owned(),
        },
        CommandKind::Upload => {
            validate_name("filename", args[1])?;
            let size = args[2]
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidSize {
                    value: args[2].to_owned(),
                })?;
            Command::Upload {
                username: username.to_owned(),
                filename: args[1].to_owned(),
                size,
                source: PathBuf::from(args[3]),
            }
        }
        CommandKind::List => Command::List {
            username: username.to_owned(),
        },
        CommandKind::Download => {
            validate_name("filename", args[1])?;
            Command::Download {
                username: username.to_owned(),
                filename: args[1].to_owned(),
            }
        }
        CommandKind::Delete => {
            validate_name("filename", args[1])?;
            Command::Delete {
                username: username.to_owned(),
                filename: args[1].to_owned(),
            }
        }
    };

    Ok(Request::Command(command))
}

fn arity(kind: CommandKind) -> (usize, usize) {
    match kind {
        CommandKind::Signup => (2, 3),
        CommandKind::Login => (2, 2),
        CommandKind::Upload => (4, 4),
        CommandKind::List => (1, 1),
        CommandKind::Download | CommandKind::Delete => (2, 2),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::tasks::{Command, CommandKind, Priority};

    use super::{ProtocolError, Request, parse_request};

    fn command(line: &str) -> Command {
        match parse_request(line).expect("line should parse") {
            Request::Command(command) => command,
            Request::Quit => panic!("unexpected QUIT for {line:?}"),
        }
    }

    #[test]
    fn parses_every_command_kind() {
        assert_eq!(
            command("SIGNUP alice pw HIGH"),
            Command::Signup {
                username: "alice".to_owned(),
                password: "pw".to_owned(),
                priority: Priority::High,
            }
        );
        assert_eq!(
            command("login alice pw"),
            Command::Login {
                username: "alice".to_owned(),
                password: "pw".to_owned(),
            }
        );
        assert_eq!(
            command("UPLOAD alice a.txt 5 /tmp/a.txt"),
            Command::Upload {
                username: "alice".to_owned(),
                filename: "a.txt".to_owned(),
                size: 5,
                source: PathBuf::from("/tmp/a.txt"),
            }
        );
        assert_eq!(command("LIST alice").kind(), CommandKind::List);
        assert_eq!(command("Download alice a.txt").kind(), CommandKind::Download);
        assert_eq!(command("DELETE alice a.txt").kind(), CommandKind::Delete);
    }

    #[test]
    fn signup_priority_defaults_to_normal() {
        for line in ["SIGNUP bob pw", "SIGNUP bob pw urgent"] {
            match command(line) {
                Command::Signup { priority, .. } => assert_eq!(priority, Priority::Normal),
                other => panic!("unexpected {other:?}"),
            }
        }
        match command("SIGNUP bob pw low") {
            Command::Signup { priority, .. } => assert_eq!(priority, Priority::Low),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn quit_is_recognised_in_any_case() {
        assert_eq!(parse_request("QUIT"), Ok(Request::Quit));
        assert_eq!(parse_request("  quit  "), Ok(Request::Quit));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_request("   "), Err(ProtocolError::EmptyCommand));
        assert!(matches!(
            parse_request("RENAME a b"),
            Err(ProtocolError::UnknownVerb { .. })
        ));
        assert!(matches!(
            parse_request("LOGIN alice"),
            Err(ProtocolError::WrongArity {
                kind: CommandKind::Login,
                given: 1
            })
        ));
        assert!(matches!(
            parse_request("LIST alice extra"),
            Err(ProtocolError::WrongArity { .. })
        ));
        assert!(matches!(
            parse_request("UPLOAD alice a.txt -1 /tmp/a"),
            Err(ProtocolError::InvalidSize { .. })
        ));
        assert!(matches!(
            parse_request("DELETE alice ../etc"),
            Err(ProtocolError::InvalidName(_))
        ));
        assert!(matches!(
            parse_request("LIST .hidden"),
            Err(ProtocolError::InvalidName(_))
        ));
    }

    #[test]
    fn reply_reasons_are_short() {
        assert_eq!(ProtocolError::EmptyCommand.reply_reason(), "empty command");
        let arity = parse_request("UPLOAD alice a.txt").expect_err("arity must fail");
        assert_eq!(
            arity.reply_reason(),
            "usage: UPLOAD <user> <filename> <size> <src>"
        );
    }
}
