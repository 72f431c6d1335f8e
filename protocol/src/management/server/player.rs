use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A connected player. `uuid` and `address` arrive on separate log lines
/// after the join line and may never be filled in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub joined_at: DateTime<Local>,
    #[serde(default)]
    pub address: Option<IpAddr>,
}

impl Player {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            uuid: None,
            joined_at: Local::now(),
            address: None,
        }
    }
}
