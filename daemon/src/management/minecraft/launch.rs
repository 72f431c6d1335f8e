use glob::{MatchOptions, Pattern};
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::management::error::SupervisorError;
use mcsv_protocol::management::server::SupervisorConfig;

const LOADER_SCRIPT: &str = "run.sh";
const LOADER_LIBRARY_DIR: &str = "libraries/net/minecraftforge/forge";
const USER_JVM_ARGS_FILE: &str = "user_jvm_args.txt";
const FALLBACK_JAR: &str = "server.jar";

const SERVER_JAR_PATTERNS: [&str; 6] = [
    "server.jar",
    "forge-*.jar",
    "fabric-server-*.jar",
    "minecraft_server.*.jar",
    "paper-*.jar",
    "spigot-*.jar",
];

/// Aikar's G1 flag set.
pub const TUNED_GC_FLAGS: [&str; 20] = [
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+DisableExplicitGC",
    "-XX:+AlwaysPreTouch",
    "-XX:G1NewSizePercent=30",
    "-XX:G1MaxNewSizePercent=40",
    "-XX:G1HeapRegionSize=8M",
    "-XX:G1ReservePercent=20",
    "-XX:G1HeapWastePercent=5",
    "-XX:G1MixedGCCountTarget=4",
    "-XX:InitiatingHeapOccupancyPercent=15",
    "-XX:G1MixedGCLiveThresholdPercent=90",
    "-XX:G1RSetUpdatingPauseTimePercent=5",
    "-XX:SurvivorRatio=32",
    "-XX:+PerfDisableSharedMem",
    "-XX:MaxTenuringThreshold=1",
    "-Dusing.aikars.flags=https://mcflags.emc.gs",
    "-Daikars.new.flags=true",
];

/// Leading part of [`TUNED_GC_FLAGS`] used in front of loader args files.
const LOADER_GC_FLAG_COUNT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// A jar in the server directory, by file name.
    Jar(String),
    /// A loader installation started through its generated args file.
    Loader,
}

pub fn find_launch_target(server_dir: &Path) -> Result<LaunchTarget, SupervisorError> {
    if server_dir.join(LOADER_SCRIPT).is_file() && server_dir.join(LOADER_LIBRARY_DIR).is_dir() {
        return Ok(LaunchTarget::Loader);
    }

    let known = SERVER_JAR_PATTERNS
        .iter()
        .find_map(|pattern| glob_files(server_dir, pattern, MatchOptions::new()).into_iter().next());
    let target = match known {
        Some(jar) => Some(jar),
        None => {
            let any_case = MatchOptions {
                case_sensitive: false,
                ..MatchOptions::new()
            };
            let jars = glob_files(server_dir, "*.jar", any_case);
            jars.iter()
                .find(|jar| file_name(jar).to_lowercase().contains("server"))
                .or_else(|| jars.first())
                .cloned()
        }
    };

    target
        .map(|jar| LaunchTarget::Jar(file_name(&jar)))
        .ok_or_else(|| SupervisorError::LaunchTargetNotFound(server_dir.to_path_buf()))
}

/// Regular files under `dir` matching `pattern`, sorted by path.
fn glob_files(dir: &Path, pattern: &str, options: MatchOptions) -> Vec<PathBuf> {
    let full = Path::new(&Pattern::escape(&dir.to_string_lossy())).join(pattern);
    let paths = match glob::glob_with(&full.to_string_lossy(), options) {
        Ok(paths) => paths,
        Err(err) => {
            warn!("bad file pattern {}: {}", full.display(), err);
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => path.is_file().then_some(path),
            Err(err) => {
                debug!("skipping unreadable entry: {}", err);
                None
            }
        })
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn build_launch_args(config: &SupervisorConfig, target: &LaunchTarget) -> Vec<String> {
    match target {
        LaunchTarget::Jar(jar) => build_jar_args(config, jar),
        LaunchTarget::Loader => build_loader_args(config),
    }
}

fn heap_flags(config: &SupervisorConfig) -> [String; 2] {
    [
        format!("-Xms{}", config.ram_min),
        format!("-Xmx{}", config.ram_max),
    ]
}

fn extra_flags(config: &SupervisorConfig) -> impl Iterator<Item = String> + '_ {
    config.java_args.split_whitespace().map(str::to_owned)
}

fn build_jar_args(config: &SupervisorConfig, jar: &str) -> Vec<String> {
    let mut args: Vec<String> = heap_flags(config).into();
    args.extend(TUNED_GC_FLAGS.iter().map(|f| f.to_string()));
    args.extend(extra_flags(config));
    args.extend(["-jar".to_owned(), jar.to_owned(), "nogui".to_owned()]);
    args
}

fn build_loader_args(config: &SupervisorConfig) -> Vec<String> {
    let server_dir = &config.server_dir;
    if let Err(err) = write_user_jvm_args(config) {
        warn!("failed to write {}: {}", USER_JVM_ARGS_FILE, err);
    }

    let library_dir = server_dir.join(LOADER_LIBRARY_DIR);
    let Some(args_file) = find_args_file(&library_dir) else {
        return match find_loader_jar(&library_dir) {
            Some(jar) => {
                let mut args: Vec<String> = heap_flags(config).into();
                args.extend(["-jar".to_owned(), jar.to_string_lossy().into_owned()]);
                args.push("nogui".to_owned());
                args
            }
            None => fallback_args(),
        };
    };

    let content = match fs::read_to_string(&args_file) {
        Ok(content) => content,
        Err(err) => {
            warn!("failed to read {}: {}", args_file.display(), err);
            return fallback_args();
        }
    };
    debug!("expanding loader args from {}", args_file.display());

    let mut args: Vec<String> = heap_flags(config).into();
    args.extend(
        TUNED_GC_FLAGS[..LOADER_GC_FLAG_COUNT]
            .iter()
            .map(|f| f.to_string()),
    );
    args.extend(extra_flags(config));
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        args.extend(parse_args_line(line.trim_end_matches('\\').trim()));
    }
    args.push("nogui".to_owned());
    args
}

fn fallback_args() -> Vec<String> {
    vec!["-jar".to_owned(), FALLBACK_JAR.to_owned(), "nogui".to_owned()]
}

fn write_user_jvm_args(config: &SupervisorConfig) -> io::Result<()> {
    let mut content = String::new();
    let flags = heap_flags(config);
    let xx_flags = TUNED_GC_FLAGS.iter().filter(|f| f.starts_with("-XX"));
    for flag in flags.iter().map(String::as_str).chain(xx_flags.copied()) {
        content.push_str(flag);
        content.push('\n');
    }
    fs::write(config.server_dir.join(USER_JVM_ARGS_FILE), content)
}

fn find_args_file(library_dir: &Path) -> Option<PathBuf> {
    let (preferred, other) = if cfg!(windows) {
        ("win_args.txt", "unix_args.txt")
    } else {
        ("unix_args.txt", "win_args.txt")
    };

    let named = |wanted: &str| {
        glob_files(library_dir, &format!("**/{}", wanted), MatchOptions::new())
            .into_iter()
            .next()
    };
    named(preferred).or_else(|| named(other))
}

/// First `forge-*.jar` among the installed loader versions.
fn find_loader_jar(library_dir: &Path) -> Option<PathBuf> {
    glob_files(library_dir, "*/forge-*.jar", MatchOptions::new())
        .into_iter()
        .next()
}

/// Splits one args-file line on whitespace, keeping double-quoted
/// sections together. Quotes are dropped.
pub fn parse_args_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for c in line.chars() {
        match c {
            '"' => in_quote = !in_quote,
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}
