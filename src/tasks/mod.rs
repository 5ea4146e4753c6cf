use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::queues::Schedulable;
use crate::server::ConnectionId;

/// Scheduling class; the derived order makes `High` the greatest.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "NORMAL" => Some(Self::Normal),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Signup,
    Login,
    Upload,
    List,
    Download,
    Delete,
}

impl CommandKind {
    pub const ALL: [Self; 6] = [
        Self::Signup,
        Self::Login,
        Self::Upload,
        Self::List,
        Self::Download,
        Self::Delete,
    ];

    pub fn verb(self) -> &'static str {
        match self {
            Self::Signup => "SIGNUP",
            Self::Login => "LOGIN",
            Self::Upload => "UPLOAD",
            Self::List => "LIST",
            Self::Download => "DOWNLOAD",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.verb().eq_ignore_ascii_case(verb))
    }

    pub fn usage(self) -> &'static str {
        match self {
            Self::Signup => "SIGNUP <user> <pass> [PRIORITY]",
            Self::Login => "LOGIN <user> <pass>",
            Self::Upload => "UPLOAD <user> <filename> <size> <src>",
            Self::List => "LIST <user>",
            Self::Download => "DOWNLOAD <user> <filename>",
            Self::Delete => "DELETE <user> <filename>",
        }
    }

    pub fn default_priority(self) -> Priority {
        match self {
            Self::Signup | Self::Login | Self::Delete => Priority::High,
            Self::Upload | Self::Download => Priority::Normal,
            Self::List => Priority::Low,
        }
    }

    /// Account-bound commands may have their priority replaced by the
    /// account's stored priority; SIGNUP and LOGIN always run as HIGH.
    pub fn honours_account_priority(self) -> bool {
        !matches!(self, Self::Signup | Self::Login)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Signup {
        username: String,
        password: String,
        priority: Priority,
    },
    Login {
        username: String,
        password: String,
    },
    Upload {
        username: String,
        filename: String,
        size: u64,
        source: PathBuf,
    },
    List {
        username: String,
    },
    Download {
        username: String,
        filename: String,
    },
    Delete {
        username: String,
        filename: String,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Signup { .. } => CommandKind::Signup,
            Self::Login { .. } => CommandKind::Login,
            Self::Upload { .. } => CommandKind::Upload,
            Self::List { .. } => CommandKind::List,
            Self::Download { .. } => CommandKind::Download,
            Self::Delete { .. } => CommandKind::Delete,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Signup { username, .. }
            | Self::Login { username, .. }
            | Self::Upload { username, .. }
            | Self::List { username }
            | Self::Download { username, .. }
            | Self::Delete { username, .. } => username,
        }
    }
}

/// One raw command line read by an acceptor, waiting to be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientTask {
    pub connection_id: ConnectionId,
    pub raw_command: String,
    pub arrival_seq: u64,
}

/// A parsed, priority-tagged unit of work. Immutable once enqueued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub command: Command,
    pub priority: Priority,
    pub connection_id: ConnectionId,
    pub arrival_seq: u64,
}

impl Task {
    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }
}

impl Schedulable for Task {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn arrival_seq(&self) -> u64 {
        self.arrival_seq
    }
}

/// Monotonic arrival counter shared by all acceptors.
#[derive(Debug, Default)]
pub struct ArrivalClock {
    next: AtomicU64,
}

impl ArrivalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
