use chrono::{Local, SecondsFormat};
use std::fs;
use std::io;
use std::path::Path;

pub const EULA_FILE: &str = "eula.txt";
pub const PROPERTIES_FILE: &str = "server.properties";

pub fn accept_eula(server_dir: &Path) -> io::Result<()> {
    fs::write(server_dir.join(EULA_FILE), "eula=true\n")
}

pub fn configure_server_properties(server_dir: &Path, port: u16) -> io::Result<()> {
    merge_properties(
        &server_dir.join(PROPERTIES_FILE),
        &[("server-port", port.to_string())],
    )
}

/// Rewrites a properties file with `overrides` applied. Existing entries
/// keep their order, unknown keys are appended, comments are replaced by
/// a fresh header.
pub fn merge_properties(path: &Path, overrides: &[(&str, String)]) -> io::Result<()> {
    let mut entries = match fs::read_to_string(path) {
        Ok(content) => parse_properties(&content),
        Err(err) if err.kind() == io::ErrorKind::NotFound => vec![],
        Err(err) => return Err(err),
    };
    for (key, value) in overrides {
        set_entry(&mut entries, key, value.clone());
    }

    let mut out = format!(
        "# Minecraft Server Properties\n# Generated by mcsv on {}\n\n",
        Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
    );
    for (key, value) in &entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    fs::write(path, out)
}

pub fn parse_properties(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            set_entry(&mut entries, key, value.to_owned());
        }
    }
    entries
}

fn set_entry(entries: &mut Vec<(String, String)>, key: &str, value: String) {
    match entries.iter_mut().find(|(k, _)| k.as_str() == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key.to_owned(), value)),
    }
}
