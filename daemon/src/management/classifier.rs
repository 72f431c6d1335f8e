//! Turns one line of server console output into at most one [`LineEvent`].
//!
//! Matchers run in a fixed priority order and the first hit wins. The
//! classifier holds no state; applying an event is the caller's job.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DONE_PATTERN: Regex =
        Regex::new(r#"Done \([\d.]+s\)! For help, type ["']help["']"#)
            .expect("Failed to compile DONE_PATTERN regex");
    static ref JOIN_PATTERN: Regex =
        Regex::new(r"\[Server thread/INFO\].*?: (\w+) joined the game")
            .expect("Failed to compile JOIN_PATTERN regex");
    static ref LEAVE_PATTERN: Regex =
        Regex::new(r"\[Server thread/INFO\].*?: (\w+) left the game")
            .expect("Failed to compile LEAVE_PATTERN regex");
    static ref PLAYER_LIST_PATTERN: Regex =
        Regex::new(r"There are (\d+) of a max of (\d+) players online")
            .expect("Failed to compile PLAYER_LIST_PATTERN regex");
    static ref TPS_PATTERN: Regex =
        Regex::new(r"Mean TPS: ([\d.]+)").expect("Failed to compile TPS_PATTERN regex");
    static ref CHAT_PATTERN: Regex =
        Regex::new(r"<(\w+)> (.+)").expect("Failed to compile CHAT_PATTERN regex");
    static ref LOGIN_ADDRESS_PATTERN: Regex =
        Regex::new(r"(\w+)\[/(\d+\.\d+\.\d+\.\d+):\d+\] logged in")
            .expect("Failed to compile LOGIN_ADDRESS_PATTERN regex");
    static ref UUID_PATTERN: Regex =
        Regex::new(r"UUID of player (\w+) is ([a-f0-9-]+)")
            .expect("Failed to compile UUID_PATTERN regex");
}

/// Console command whose answer carries the `Mean TPS` line.
pub const TPS_COMMAND: &str = "forge tps";

const METRIC_LABELS: [&str; 2] = ["Mean TPS:", "Mean tick time:"];

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent<'a> {
    Ready,
    PlayerJoined(&'a str),
    PlayerLeft(&'a str),
    PlayerCount { online: usize, max: usize },
    Tps(f64),
    Chat { player: &'a str, message: &'a str },
    PlayerAddress { player: &'a str, address: &'a str },
    PlayerUuid { player: &'a str, uuid: &'a str },
    /// Metric output that must not show up as log noise.
    Suppressed,
    Warning,
    Error,
}

type Matcher = for<'a> fn(&'a str) -> Option<LineEvent<'a>>;

const MATCHERS: [Matcher; 10] = [
    match_ready,
    match_join,
    match_leave,
    match_player_count,
    match_tps,
    match_chat,
    match_login_address,
    match_uuid,
    match_metric_noise,
    match_severity,
];

pub fn classify(line: &str) -> Option<LineEvent<'_>> {
    MATCHERS.iter().find_map(|matcher| matcher(line))
}

fn match_ready(line: &str) -> Option<LineEvent<'_>> {
    DONE_PATTERN.is_match(line).then_some(LineEvent::Ready)
}

fn match_join(line: &str) -> Option<LineEvent<'_>> {
    let caps = JOIN_PATTERN.captures(line)?;
    Some(LineEvent::PlayerJoined(caps.get(1)?.as_str()))
}

fn match_leave(line: &str) -> Option<LineEvent<'_>> {
    let caps = LEAVE_PATTERN.captures(line)?;
    Some(LineEvent::PlayerLeft(caps.get(1)?.as_str()))
}

fn match_player_count(line: &str) -> Option<LineEvent<'_>> {
    let caps = PLAYER_LIST_PATTERN.captures(line)?;
    Some(LineEvent::PlayerCount {
        online: caps[1].parse().ok()?,
        max: caps[2].parse().ok()?,
    })
}

fn match_tps(line: &str) -> Option<LineEvent<'_>> {
    let caps = TPS_PATTERN.captures(line)?;
    // "Mean TPS: 1.2.3" is still a metric line, just not a usable one
    Some(
        caps[1]
            .parse()
            .map(LineEvent::Tps)
            .unwrap_or(LineEvent::Suppressed),
    )
}

fn match_chat(line: &str) -> Option<LineEvent<'_>> {
    let caps = CHAT_PATTERN.captures(line)?;
    Some(LineEvent::Chat {
        player: caps.get(1)?.as_str(),
        message: caps.get(2)?.as_str(),
    })
}

fn match_login_address(line: &str) -> Option<LineEvent<'_>> {
    let caps = LOGIN_ADDRESS_PATTERN.captures(line)?;
    Some(LineEvent::PlayerAddress {
        player: caps.get(1)?.as_str(),
        address: caps.get(2)?.as_str(),
    })
}

fn match_uuid(line: &str) -> Option<LineEvent<'_>> {
    let caps = UUID_PATTERN.captures(line)?;
    Some(LineEvent::PlayerUuid {
        player: caps.get(1)?.as_str(),
        uuid: caps.get(2)?.as_str(),
    })
}

fn match_metric_noise(line: &str) -> Option<LineEvent<'_>> {
    METRIC_LABELS
        .iter()
        .any(|label| line.contains(label))
        .then_some(LineEvent::Suppressed)
}

fn match_severity(line: &str) -> Option<LineEvent<'_>> {
    if line.contains("WARN]") {
        Some(LineEvent::Warning)
    } else if line.contains("ERROR]") {
        Some(LineEvent::Error)
    } else {
        None
    }
}
