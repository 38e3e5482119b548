use thiserror::Error;

use super::transfer::TransferSummary;

/// Failure of a single transfer worker. A worker's first non-success status
/// is fatal to that worker; transport-level errors always are.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("request failed: HTTP {status} from {url}")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of a transfer phase that did not complete cleanly.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A worker faulted. Surfaced only after every worker of the phase has
    /// finished; `partial` holds the throughput measured up to that point
    /// and is informational only, not a certified measurement.
    #[error("{source}")]
    Worker {
        source: WorkerError,
        partial: TransferSummary,
    },
    /// The run-level cancel signal fired mid-phase. Clean termination,
    /// distinct from a fault.
    #[error("transfer cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PingError {
    /// Every sample failed. Individual failed samples are skipped; only a
    /// fully empty run is fatal.
    #[error("failed to collect any ping samples; verify server '{target}' is reachable")]
    NoSamples { target: String },
    #[error("ping cancelled")]
    Cancelled,
}

/// Run-level outcome. A failed phase still yields a well-formed
/// `SpeedTestResult` with `success = false`; only cancellation aborts the
/// run without a result.
#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("speed test cancelled")]
    Cancelled,
}
