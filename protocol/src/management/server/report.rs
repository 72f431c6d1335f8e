use crate::management::server::event::SupervisorEvent;
use crate::management::server::player::Player;
use crate::management::server::status::SupervisorStatus;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_PLAYERS: usize = 20;
pub const NOMINAL_TPS: f64 = 20.0;

/// Point-in-time copy of everything the supervisor knows about the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsSnapshot {
    pub status: SupervisorStatus,
    pub start_time: Option<DateTime<Local>>,
    /// Zero unless the server is running.
    pub uptime: Duration,
    pub restarts: u32,

    pub tps: f64,
    pub memory_used: u64,
    pub memory_max: u64,
    pub cpu_percent: f64,

    pub bytes_in: u64,
    pub bytes_out: u64,
    /// bytes per second
    pub bandwidth_in: f64,
    pub bandwidth_out: f64,

    pub players: Vec<Player>,
    pub player_count: usize,
    pub max_players: usize,

    pub recent_events: Vec<SupervisorEvent>,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            status: SupervisorStatus::Stopped,
            start_time: None,
            uptime: Duration::ZERO,
            restarts: 0,
            tps: NOMINAL_TPS,
            memory_used: 0,
            memory_max: 0,
            cpu_percent: 0.0,
            bytes_in: 0,
            bytes_out: 0,
            bandwidth_in: 0.0,
            bandwidth_out: 0.0,
            players: vec![],
            player_count: 0,
            max_players: DEFAULT_MAX_PLAYERS,
            recent_events: vec![],
        }
    }
}

impl StatsSnapshot {
    pub fn memory_percent(&self) -> f64 {
        if self.memory_max == 0 {
            return 0.0;
        }
        self.memory_used as f64 / self.memory_max as f64 * 100.0
    }
}
