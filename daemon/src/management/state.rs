use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::management::classifier::{classify, LineEvent};
use crate::management::output::{OutputHub, OutputReceiver, OUTPUT_BUFFER_CAPACITY};
use crate::management::registry::{EventLog, PlayerRegistry};
use crate::management::stats::ResourceSample;
use mcsv_protocol::management::server::{
    EventKind, StatsSnapshot, SupervisorEvent, SupervisorStatus, DEFAULT_MAX_PLAYERS, NOMINAL_TPS,
};

pub const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct SupervisorState {
    pub status: SupervisorStatus,
    pub start_time: Option<DateTime<Local>>,
    pub restarts: u32,
    pub tps: f64,
    pub memory_used: u64,
    pub memory_max: u64,
    pub cpu_percent: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub bandwidth_in: f64,
    pub bandwidth_out: f64,
    pub players: PlayerRegistry,
    pub player_count: usize,
    pub max_players: usize,
    pub events: EventLog,
}

impl SupervisorState {
    pub fn new(memory_max: u64) -> Self {
        Self {
            status: SupervisorStatus::Stopped,
            start_time: None,
            restarts: 0,
            tps: NOMINAL_TPS,
            memory_used: 0,
            memory_max,
            cpu_percent: 0.0,
            bytes_in: 0,
            bytes_out: 0,
            bandwidth_in: 0.0,
            bandwidth_out: 0.0,
            players: PlayerRegistry::default(),
            player_count: 0,
            max_players: DEFAULT_MAX_PLAYERS,
            events: EventLog::default(),
        }
    }

    /// Applies `next` if the lifecycle allows it from the current status.
    pub fn set_status(&mut self, next: SupervisorStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!("ignoring status change {} -> {}", self.status, next);
            return false;
        }
        if self.status != next {
            debug!("status {} -> {}", self.status, next);
        }
        self.status = next;
        true
    }

    /// Resets per-run figures before a new child is spawned.
    pub fn begin_run(&mut self) {
        self.start_time = Some(Local::now());
        self.tps = NOMINAL_TPS;
        self.cpu_percent = 0.0;
        self.memory_used = 0;
        self.bandwidth_in = 0.0;
        self.bandwidth_out = 0.0;
        self.players.clear();
        self.player_count = 0;
    }

    pub fn apply_sample(&mut self, sample: &ResourceSample) {
        if let Some(cpu) = sample.cpu_percent {
            self.cpu_percent = cpu;
        }
        if let Some(memory) = sample.memory_used {
            self.memory_used = memory;
        }
        if let Some(io) = sample.io {
            self.bytes_in = io.bytes_in;
            self.bytes_out = io.bytes_out;
            self.bandwidth_in = io.bandwidth_in;
            self.bandwidth_out = io.bandwidth_out;
        }
        self.player_count = self.players.len();
    }

    /// Folds a classified console line into the state. Returns the event
    /// the line produces, if any.
    pub fn apply_line(&mut self, event: LineEvent<'_>, line: &str) -> Option<(EventKind, String)> {
        match event {
            LineEvent::Ready => self
                .set_status(SupervisorStatus::Running)
                .then(|| (EventKind::Info, "Server started successfully!".to_owned())),
            LineEvent::PlayerJoined(name) => {
                self.players.add(name);
                self.player_count = self.players.len();
                Some((EventKind::PlayerJoin, format!("{} joined the game", name)))
            }
            LineEvent::PlayerLeft(name) => {
                self.players.remove(name);
                self.player_count = self.players.len();
                Some((EventKind::PlayerLeave, format!("{} left the game", name)))
            }
            LineEvent::PlayerCount { online, max } => {
                self.player_count = online;
                self.max_players = max;
                None
            }
            LineEvent::Tps(tps) => {
                self.tps = tps;
                None
            }
            LineEvent::Chat { player, message } => {
                Some((EventKind::Chat, format!("<{}> {}", player, message)))
            }
            LineEvent::PlayerAddress { player, address } => {
                match address.parse() {
                    Ok(address) => {
                        self.players.set_address(player, address);
                    }
                    Err(_) => debug!("unparsable address for {}: {}", player, address),
                }
                None
            }
            LineEvent::PlayerUuid { player, uuid } => {
                match uuid.parse() {
                    Ok(uuid) => {
                        self.players.set_uuid(player, uuid);
                    }
                    Err(_) => debug!("unparsable uuid for {}: {}", player, uuid),
                }
                None
            }
            LineEvent::Suppressed => None,
            LineEvent::Warning => Some((EventKind::Warning, line.to_owned())),
            LineEvent::Error => Some((EventKind::Error, line.to_owned())),
        }
    }

    fn record(&mut self, kind: EventKind, message: String) -> SupervisorEvent {
        let event = SupervisorEvent::new(kind, message);
        self.events.push(event.clone());
        event
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let uptime = match (self.status, self.start_time) {
            (SupervisorStatus::Running, Some(start)) => (Local::now() - start)
                .to_std()
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        };
        StatsSnapshot {
            status: self.status,
            start_time: self.start_time,
            uptime,
            restarts: self.restarts,
            tps: self.tps,
            memory_used: self.memory_used,
            memory_max: self.memory_max,
            cpu_percent: self.cpu_percent,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            bandwidth_in: self.bandwidth_in,
            bandwidth_out: self.bandwidth_out,
            players: self.players.snapshot(),
            player_count: self.player_count,
            max_players: self.max_players,
            recent_events: self.events.snapshot(),
        }
    }
}

/// State shared between the supervisor handle and its background loops.
pub struct Shared {
    state: RwLock<SupervisorState>,
    event_tx: mpsc::Sender<SupervisorEvent>,
    output: OutputHub,
}

impl Shared {
    pub fn new(memory_max: u64) -> (Self, mpsc::Receiver<SupervisorEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Self {
            state: RwLock::new(SupervisorState::new(memory_max)),
            event_tx,
            output: OutputHub::new(OUTPUT_BUFFER_CAPACITY),
        };
        (shared, event_rx)
    }

    pub fn subscribe_output(&self) -> OutputReceiver {
        self.output.subscribe()
    }

    pub async fn status(&self) -> SupervisorStatus {
        self.state.read().await.status
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn set_status(&self, next: SupervisorStatus) -> bool {
        self.state.write().await.set_status(next)
    }

    /// Moves to `next` only if the current status is one of `from`.
    /// Returns the status that was replaced.
    pub async fn transition_from(
        &self,
        from: &[SupervisorStatus],
        next: SupervisorStatus,
    ) -> Option<SupervisorStatus> {
        let mut state = self.state.write().await;
        let current = state.status;
        (from.contains(&current) && state.set_status(next)).then_some(current)
    }

    /// Runs `f` under the write lock.
    pub async fn update<R>(&self, f: impl FnOnce(&mut SupervisorState) -> R) -> R {
        f(&mut *self.state.write().await)
    }

    pub async fn emit<S: Into<String>>(&self, kind: EventKind, message: S) {
        let event = self.state.write().await.record(kind, message.into());
        self.publish(event);
    }

    /// Forwards a console line to output subscribers and applies whatever
    /// it tells us about the server.
    pub async fn handle_line(&self, line: String) {
        if let Some(event) = classify(&line) {
            let recorded = {
                let mut state = self.state.write().await;
                state
                    .apply_line(event, &line)
                    .map(|(kind, message)| state.record(kind, message))
            };
            if let Some(event) = recorded {
                self.publish(event);
            }
        }
        self.output.publish(&line);
    }

    fn publish(&self, event: SupervisorEvent) {
        match event.kind {
            EventKind::Error => error!("{}", event.message),
            EventKind::Warning => warn!("{}", event.message),
            EventKind::Command => debug!("{}", event.message),
            _ => info!("[{}] {}", event.kind, event.message),
        }
        if self.event_tx.try_send(event).is_err() {
            debug!("event stream full or closed, dropping event");
        }
    }
}
