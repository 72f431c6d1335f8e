use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Warning,
    Error,
    PlayerJoin,
    PlayerLeave,
    Chat,
    Command,
    Backup,
    Restart,
}

impl EventKind {
    /// Short tag used by console renderers.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Info => "INFO",
            EventKind::Warning => "WARN",
            EventKind::Error => "ERROR",
            EventKind::PlayerJoin => "JOIN",
            EventKind::PlayerLeave => "LEAVE",
            EventKind::Chat => "CHAT",
            EventKind::Command => "CMD",
            EventKind::Backup => "BACKUP",
            EventKind::Restart => "RESTART",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorEvent {
    pub time: DateTime<Local>,
    pub kind: EventKind,
    pub message: String,
}

impl SupervisorEvent {
    pub fn new<S: Into<String>>(kind: EventKind, message: S) -> Self {
        Self {
            time: Local::now(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SupervisorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.time.format("%H:%M:%S"),
            self.kind,
            self.message
        )
    }
}
