//! Filesystem preparation that happens before the server JVM is spawned.

mod launch;
mod mods;
mod properties;

pub use launch::{build_launch_args, find_launch_target, parse_args_line, LaunchTarget, TUNED_GC_FLAGS};
pub use mods::{copy_local_mods, ModsCopyReport};
pub use properties::{
    accept_eula, configure_server_properties, merge_properties, parse_properties, EULA_FILE,
    PROPERTIES_FILE,
};

use std::path::Path;

use crate::management::error::SupervisorError;
use mcsv_protocol::management::server::{EventKind, SupervisorConfig};

#[derive(Debug)]
pub struct PreparedLaunch {
    pub target: LaunchTarget,
    pub args: Vec<String>,
    /// Events for the caller to publish. Everything in here is degraded
    /// but not fatal.
    pub notices: Vec<(EventKind, String)>,
}

/// Copies local mods, picks the launch target, writes the EULA marker and
/// port setting, and assembles the JVM argument list. Only a missing
/// launch target (or an unreadable server dir) is an error.
pub fn prepare_launch(
    config: &SupervisorConfig,
    mods_root: &Path,
) -> Result<PreparedLaunch, SupervisorError> {
    let server_dir = &config.server_dir;
    let mut notices = Vec::new();

    match copy_local_mods(mods_root, server_dir) {
        Ok(report) => {
            for (name, err) in report.failed {
                notices.push((EventKind::Warning, format!("Failed to copy mod {}: {}", name, err)));
            }
            for name in &report.copied {
                notices.push((EventKind::Info, format!("Added local mod: {}", name)));
            }
            if !report.copied.is_empty() {
                notices.push((
                    EventKind::Info,
                    format!("Copied {} local mod(s) to server", report.copied.len()),
                ));
            }
        }
        Err(err) => notices.push((EventKind::Warning, format!("Failed to copy local mods: {}", err))),
    }

    let target = find_launch_target(server_dir)?;

    if let Err(err) = accept_eula(server_dir) {
        notices.push((EventKind::Warning, format!("Failed to accept EULA: {}", err)));
    }
    if let Err(err) = configure_server_properties(server_dir, config.port) {
        notices.push((
            EventKind::Warning,
            format!("Failed to configure {}: {}", PROPERTIES_FILE, err),
        ));
    }

    let args = build_launch_args(config, &target);
    Ok(PreparedLaunch {
        target,
        args,
        notices,
    })
}
