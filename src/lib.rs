pub mod actors;
pub mod api;
pub mod client;
pub mod config;
pub mod identity;
pub mod intake;
pub mod liveness;
pub mod payload;
pub mod queue;
pub mod realtime;
pub mod storage;
pub mod thresholds;
pub mod util;
pub mod violations;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of a monitored machine
///
/// Every stable id, threshold and liveness record is scoped by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    Host,
    Container,
}

impl MachineType {
    pub const ALL: [MachineType; 2] = [MachineType::Host, MachineType::Container];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineType::Host => "host",
            MachineType::Container => "container",
        }
    }

    /// Map a queue topic to the machine type its messages describe.
    ///
    /// `localhost` carries host payloads collected on the hub machine itself.
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            "host" | "localhost" => Some(MachineType::Host),
            "container" => Some(MachineType::Container),
            _ => None,
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(MachineType::Host),
            "container" => Ok(MachineType::Container),
            other => Err(format!("unknown machine type '{other}'")),
        }
    }
}
