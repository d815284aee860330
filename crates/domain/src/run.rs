//! Run vocabulary — statuses, control signals, job payloads, and the
//! deterministic Redis key names every worker derives per run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(crate::Error::Other(format!("unknown run status: {other}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control signals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Out-of-band signal published on a run's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    EndStream,
    Error,
}

impl ControlSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::EndStream => "END_STREAM",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOP" => Some(Self::Stop),
            "END_STREAM" => Some(Self::EndStream),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// The signal a driver publishes when a run reaches `status`.
    pub fn for_final_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => Self::EndStream,
            RunStatus::Failed => Self::Error,
            _ => Self::Stop,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The payload a worker dequeues for one agent run.
///
/// Jobs are delivered at-least-once; the run ownership lock makes the
/// driver at-most-once in effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub run_id: Uuid,
    pub thread_id: Uuid,
    pub instance_id: String,
    pub project_id: Uuid,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis key names
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic per-run Redis key names.
///
/// Every worker derives the same names from `(run_id, instance_id)`, so a
/// sibling worker can address a run it does not own (stop signals, stream
/// catch-up).
#[derive(Debug, Clone)]
pub struct RunKeys {
    pub stream: String,
    pub pubsub: String,
    pub global_control: String,
    pub instance_control: String,
    pub instance_active: String,
    pub lock: String,
}

impl RunKeys {
    pub fn for_run(run_id: Uuid, instance_id: &str) -> Self {
        Self {
            stream: stream_key(run_id),
            pubsub: format!("agent_run:{run_id}:pubsub"),
            global_control: global_control_channel(run_id),
            instance_control: format!("agent_run:{run_id}:control:{instance_id}"),
            instance_active: instance_active_key(instance_id, run_id),
            lock: lock_key(run_id),
        }
    }
}

pub fn lock_key(run_id: Uuid) -> String {
    format!("agent_run_lock:{run_id}")
}

pub fn instance_active_key(instance_id: &str, run_id: Uuid) -> String {
    format!("active_run:{instance_id}:{run_id}")
}

pub fn stream_key(run_id: Uuid) -> String {
    format!("agent_run:{run_id}:stream")
}

pub fn global_control_channel(run_id: Uuid) -> String {
    format!("agent_run:{run_id}:control")
}
