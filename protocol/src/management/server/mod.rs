mod config;
mod event;
mod player;
mod report;
mod status;

pub use config::{BackupConfig, PackageConfig, SupervisorConfig};
pub use event::{EventKind, SupervisorEvent};
pub use player::Player;
pub use report::{StatsSnapshot, DEFAULT_MAX_PLAYERS, NOMINAL_TPS};
pub use status::{ParseStatusError, SupervisorStatus};
