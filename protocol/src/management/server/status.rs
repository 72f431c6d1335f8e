use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorStatus {
    #[default]
    Stopped,
    Starting,
    Downloading,
    Installing,
    Running,
    Stopping,
    Crashed,
    Restarting,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown supervisor status: {0}")]
pub struct ParseStatusError(String);

impl SupervisorStatus {
    /// Whether the supervisor may move from `self` to `next`.
    ///
    /// Setting the current status again is always accepted (it is a no-op).
    /// The abort edges `Starting/Downloading/Installing -> Stopped` cover a
    /// failed startup.
    pub fn can_transition_to(self, next: SupervisorStatus) -> bool {
        use SupervisorStatus::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Downloading)
                | (Downloading, Installing)
                | (Installing, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Starting, Stopping)
                | (Stopping, Stopped)
                | (Running, Crashed)
                | (Starting, Crashed)
                | (Crashed, Restarting)
                | (Running, Restarting)
                | (Starting, Restarting)
                | (Restarting, Starting)
                | (Starting, Stopped)
                | (Downloading, Stopped)
                | (Installing, Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorStatus::Stopped => "Stopped",
            SupervisorStatus::Starting => "Starting",
            SupervisorStatus::Downloading => "Downloading Modpack",
            SupervisorStatus::Installing => "Installing Modpack",
            SupervisorStatus::Running => "Running",
            SupervisorStatus::Stopping => "Stopping",
            SupervisorStatus::Crashed => "Crashed",
            SupervisorStatus::Restarting => "Restarting",
        }
    }
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupervisorStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stopped" => Ok(SupervisorStatus::Stopped),
            "starting" => Ok(SupervisorStatus::Starting),
            "downloading" => Ok(SupervisorStatus::Downloading),
            "installing" => Ok(SupervisorStatus::Installing),
            "running" => Ok(SupervisorStatus::Running),
            "stopping" => Ok(SupervisorStatus::Stopping),
            "crashed" => Ok(SupervisorStatus::Crashed),
            "restarting" => Ok(SupervisorStatus::Restarting),
            _ => Err(ParseStatusError(s.to_owned())),
        }
    }
}
