use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the daemon is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Snapshot of the server as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub phase: Phase,

    /// True only while a listener is bound and serving
    pub listening: bool,

    /// Port actually bound, which may differ from the preferred one
    pub port: Option<u16>,

    pub started_at: Option<DateTime<Utc>>,
}

impl ServerState {
    pub fn stopped() -> Self {
        Self {
            phase: Phase::Stopped,
            listening: false,
            port: None,
            started_at: None,
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::stopped()
    }
}

/// Body of `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,

    /// RFC 3339 timestamp of the response
    pub timestamp: String,

    /// Seconds since the server started listening
    pub uptime: f64,
}

/// Body of a successful `POST /upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,

    /// Generated filename on disk
    pub file: String,

    /// Location relative to the backup root, e.g. "2024-05-01/1714550400000-IMG_0001.HEIC"
    pub path: String,
}

/// Body of any failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serializes_lowercase() {
        let json = serde_json::to_string(&Phase::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn test_default_state_is_stopped() {
        let state = ServerState::default();
        assert_eq!(state.phase, Phase::Stopped);
        assert!(!state.listening);
        assert!(state.port.is_none());
        assert!(state.started_at.is_none());
    }
}
