// src/models/agent.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent presence. The server is authoritative; the client caches it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Available,
    Unavailable,
    Busy,
    AfterCallWork,
    Offline,
}

impl AgentStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(AgentStatus::Available),
            "unavailable" => Some(AgentStatus::Unavailable),
            "busy" => Some(AgentStatus::Busy),
            "after_call_work" => Some(AgentStatus::AfterCallWork),
            "offline" => Some(AgentStatus::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Unavailable => "unavailable",
            AgentStatus::Busy => "busy",
            AgentStatus::AfterCallWork => "after_call_work",
            AgentStatus::Offline => "offline",
        }
    }

    /// `busy` is set by the system while a call is active.
    pub fn is_manually_selectable(&self) -> bool {
        !matches!(self, AgentStatus::Busy)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server view of an agent's presence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPresence {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusUpdate {
    pub status: AgentStatus,
}
