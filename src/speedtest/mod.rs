pub mod download;
pub mod error;
pub mod ping;
pub mod runner;
pub mod transfer;
pub mod upload;

#[cfg(test)]
pub(crate) mod http_fixture;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Stage of a single test run. `Error` is an absorbing state: once a phase
/// faults, no further phases run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Ping,
    Download,
    Upload,
    Complete,
    Error,
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestPhase::Ping => "Ping",
            TestPhase::Download => "Download",
            TestPhase::Upload => "Upload",
            TestPhase::Complete => "Complete",
            TestPhase::Error => "Error",
        };
        f.write_str(name)
    }
}

/// A progress notification. Emitted and forgotten; consumers render or
/// ignore it, nothing reads it back.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: TestPhase,
    /// Completion of the current phase, 0 to 100.
    pub progress: f64,
    /// Instantaneous speed in Mbps, or latency in ms during the ping phase.
    pub current: f64,
    pub status: String,
}

/// Best-effort progress consumer. `notify` must not block: measurement never
/// waits for a slow or absent sink.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: ProgressEvent);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn notify(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// The one result record a run produces. Assembled by the runner, never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub computer_name: String,
    pub ip: String,
    pub connection_type: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub server: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{ProgressEvent, ProgressSink};

    /// Sink that records every event for later assertions.
    #[derive(Default)]
    pub struct CollectSink(Mutex<Vec<ProgressEvent>>);

    impl CollectSink {
        pub fn events(&self) -> Vec<ProgressEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressSink for CollectSink {
        fn notify(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    /// Sink that drops everything.
    pub struct NullSink;

    impl ProgressSink for NullSink {
        fn notify(&self, _event: ProgressEvent) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_with_camel_case_keys() {
        let result = SpeedTestResult {
            success: true,
            error: None,
            computer_name: "box".into(),
            ip: "192.168.1.10".into(),
            connection_type: "Ethernet".into(),
            download_mbps: 94.12,
            upload_mbps: 41.57,
            ping_ms: 12.3,
            jitter_ms: 1.5,
            server: "https://speedtest.example.com".into(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["computerName"], "box");
        assert_eq!(json["connectionType"], "Ethernet");
        assert_eq!(json["downloadMbps"], 94.12);
        assert_eq!(json["pingMs"], 12.3);
        // A successful run carries no error key at all.
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_result_keeps_error_message() {
        let result = SpeedTestResult {
            success: false,
            error: Some("request failed: HTTP 503".into()),
            computer_name: "box".into(),
            ip: "Unknown".into(),
            connection_type: "Unknown".into(),
            download_mbps: 0.0,
            upload_mbps: 0.0,
            ping_ms: 0.0,
            jitter_ms: 0.0,
            server: "https://speedtest.example.com".into(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "request failed: HTTP 503");
    }
}
