use mcsv_protocol::management::server::{Player, SupervisorEvent};
use std::collections::VecDeque;
use std::net::IpAddr;
use uuid::Uuid;

pub const EVENT_LOG_CAPACITY: usize = 100;

/// Bounded event history, oldest entries are evicted first.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<SupervisorEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: SupervisorEvent) {
        if self.capacity == 0 {
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in arrival order.
    pub fn snapshot(&self) -> Vec<SupervisorEvent> {
        self.events.iter().cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAPACITY)
    }
}

/// Players currently online, keyed by name.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: Vec<Player>,
}

impl PlayerRegistry {
    /// Returns false if a player with that name is already online.
    pub fn add(&mut self, name: &str) -> bool {
        if self.get(name).is_some() {
            return false;
        }
        self.players.push(Player::new(name));
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<Player> {
        let index = self.players.iter().position(|p| p.name == name)?;
        Some(self.players.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.name == name)
    }

    pub fn set_uuid(&mut self, name: &str, uuid: Uuid) -> bool {
        self.get_mut(name).map(|p| p.uuid = Some(uuid)).is_some()
    }

    pub fn set_address(&mut self, name: &str, address: IpAddr) -> bool {
        self.get_mut(name).map(|p| p.address = Some(address)).is_some()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Player> {
        self.players.clone()
    }
}
