//! In-process typed event broker.

mod broker;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::SandparkError;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use broker::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The closed set of event types the service emits.
///
/// The wire strings ("instance new", "session end", ...) are what browsers
/// receive over the WebSocket stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventType {
    /// An instance joined a session.
    InstanceNew,

    /// An instance was removed.
    InstanceDelete,

    /// A session was created.
    SessionNew,

    /// A session ended and its resources were released.
    SessionEnd,

    /// Output from session setup (stack deployment).
    SessionBuilderOut,

    /// Output from an instance's attached terminal.
    InstanceTerminalOut,

    /// A browser resized the terminal viewport.
    InstanceViewportResize,

    /// A fresh CPU/memory sample for an instance.
    InstanceStats,

    /// The published ports discovered on an instance.
    InstanceCheckedPorts,

    /// The ports published across the swarm an instance manages.
    InstanceClusterPorts,

    /// The swarm role (manager/worker/none) of an instance.
    InstanceSwarmStatus,

    /// The Kubernetes role of an instance.
    InstanceK8sStatus,

    /// The node ports exposed across the Kubernetes cluster an instance
    /// manages.
    InstanceK8sClusterPorts,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EventType {
    /// Every member of the closed set, in declaration order.
    pub fn all() -> [EventType; 13] {
        [
            EventType::InstanceNew,
            EventType::InstanceDelete,
            EventType::SessionNew,
            EventType::SessionEnd,
            EventType::SessionBuilderOut,
            EventType::InstanceTerminalOut,
            EventType::InstanceViewportResize,
            EventType::InstanceStats,
            EventType::InstanceCheckedPorts,
            EventType::InstanceClusterPorts,
            EventType::InstanceSwarmStatus,
            EventType::InstanceK8sStatus,
            EventType::InstanceK8sClusterPorts,
        ]
    }

    /// The wire string for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InstanceNew => "instance new",
            EventType::InstanceDelete => "instance delete",
            EventType::SessionNew => "session new",
            EventType::SessionEnd => "session end",
            EventType::SessionBuilderOut => "session builder out",
            EventType::InstanceTerminalOut => "instance terminal out",
            EventType::InstanceViewportResize => "instance viewport resize",
            EventType::InstanceStats => "instance stats",
            EventType::InstanceCheckedPorts => "instance checked ports",
            EventType::InstanceClusterPorts => "instance cluster ports",
            EventType::InstanceSwarmStatus => "instance swarm status",
            EventType::InstanceK8sStatus => "instance k8s status",
            EventType::InstanceK8sClusterPorts => "instance k8s cluster ports",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = SandparkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SandparkError::Validation(format!("unknown event type: {}", s)))
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl TryFrom<String> for EventType {
    type Error = SandparkError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_strings_round_trip() -> anyhow::Result<()> {
        for t in EventType::all() {
            assert_eq!(t.as_str().parse::<EventType>()?, t);
        }
        Ok(())
    }

    #[test]
    fn test_unknown_wire_string_is_rejected() {
        assert!("instance reboot".parse::<EventType>().is_err());
    }
}
