pub mod backup;
pub mod classifier;
pub mod comm;
pub mod error;
pub mod install;
pub mod minecraft;
pub mod output;
pub mod registry;
pub mod stats;
pub mod supervisor;

mod state;

pub use backup::BackupManager;
pub use error::{BackupError, SupervisorError};
pub use install::{ArchiveFileSource, PackageSource};
pub use supervisor::Supervisor;
