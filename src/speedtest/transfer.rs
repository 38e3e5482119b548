use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use super::error::{TransferError, WorkerError};
use super::{ProgressEvent, ProgressSink, TestPhase};

/// Cadence of the throughput sampler.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Backoff between retries after a worker's non-fatal request failure.
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(1);

/// One-shot broadcast used to stop a phase's workers and sampler. Each phase
/// gets its own signal, derived from the run-level one; cancelling is
/// idempotent and wakes every waiter.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Completes once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // The flag may have flipped between the check and registering
            // the waiter.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Summary of one transfer phase. Computed once at phase end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSummary {
    pub average_mbps: f64,
    pub total_bytes: u64,
    pub sample_count: usize,
}

/// Runs a fixed pool of transfer workers for a bounded wall-clock duration
/// while sampling the shared byte counter every [`SAMPLE_INTERVAL`].
///
/// Each tick reads the counter and records one instantaneous Mbps sample
/// from the delta since the last recorded sample; zero or negative deltas
/// are skipped. When `duration` elapses (the normal termination path) the
/// phase signal stops workers and sampler alike. A worker fault is surfaced
/// only after every worker has finished, carrying the partial summary; a
/// run-level cancel yields `TransferError::Cancelled` instead.
#[allow(clippy::too_many_arguments)]
pub async fn run_transfer<F, Fut, S>(
    threads: u32,
    duration: Duration,
    phase: TestPhase,
    counter: Arc<AtomicU64>,
    progress: Arc<dyn ProgressSink>,
    status: S,
    cancel: &CancelSignal,
    mut worker: F,
) -> Result<TransferSummary, TransferError>
where
    F: FnMut(CancelSignal) -> Fut,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    S: Fn(f64) -> String,
{
    let phase_cancel = CancelSignal::new();

    let mut workers: Vec<JoinHandle<Result<(), WorkerError>>> =
        Vec::with_capacity(threads as usize);
    for _ in 0..threads {
        workers.push(tokio::spawn(worker(phase_cancel.clone())));
    }

    let started = Instant::now();
    let deadline = started + duration;
    let mut ticker = time::interval_at(started + SAMPLE_INTERVAL, SAMPLE_INTERVAL);

    let mut samples: Vec<f64> = Vec::new();
    // Only advanced when a sample is recorded, so idle ticks fold into the
    // next sample's window instead of producing zero-speed samples.
    let mut last_sample_at = started;
    let mut last_sample_bytes = 0u64;
    let mut run_cancelled = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let elapsed = now.duration_since(started).as_secs_f64();
                if elapsed >= duration.as_secs_f64() {
                    break;
                }

                let current_bytes = counter.load(Ordering::Relaxed);
                let delta_bytes = current_bytes.saturating_sub(last_sample_bytes);
                let delta_secs = now.duration_since(last_sample_at).as_secs_f64();

                if delta_secs > 0.0 && delta_bytes > 0 {
                    let mbps = delta_bytes as f64 * 8.0 / (delta_secs * 1_000_000.0);
                    samples.push(mbps);
                    progress.notify(ProgressEvent {
                        phase,
                        progress: elapsed / duration.as_secs_f64() * 100.0,
                        current: mbps,
                        status: status(mbps),
                    });
                    last_sample_at = now;
                    last_sample_bytes = current_bytes;
                }
            }
            _ = time::sleep_until(deadline) => break,
            _ = cancel.cancelled() => {
                run_cancelled = true;
                break;
            }
        }
    }

    phase_cancel.cancel();

    // Workers are always drained before a fault is reported, so throughput
    // measured by still-healthy siblings is accounted for.
    let mut fault: Option<WorkerError> = None;
    for handle in workers {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(WorkerError::Join(join_err)),
        };
        if let Err(err) = outcome {
            if fault.is_none() {
                fault = Some(err);
            } else {
                debug!(%err, "additional worker fault");
            }
        }
    }

    let total_bytes = counter.load(Ordering::Relaxed);
    let average_mbps = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    };
    let summary = TransferSummary {
        average_mbps,
        total_bytes,
        sample_count: samples.len(),
    };

    if run_cancelled {
        return Err(TransferError::Cancelled);
    }
    if let Some(source) = fault {
        return Err(TransferError::Worker {
            source,
            partial: summary,
        });
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::{CollectSink, NullSink};

    /// Worker that adds `chunk` bytes every `every` until cancelled.
    fn steady_worker(
        counter: Arc<AtomicU64>,
        cancel: CancelSignal,
        chunk: u64,
        every: Duration,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send {
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = time::sleep(every) => {
                        counter.fetch_add(chunk, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn cancel_signal_wakes_waiters() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        signal.cancel();
        handle.await.unwrap();
        assert!(signal.is_cancelled());
        // Idempotent.
        signal.cancel();
        signal.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn steady_rate_reports_expected_average_and_sample_count() {
        // 4 workers each adding 156_250 bytes per 100 ms is 50 Mbps total.
        let counter = Arc::new(AtomicU64::new(0));
        let sink = Arc::new(CollectSink::default());
        let cancel = CancelSignal::new();

        let summary = run_transfer(
            4,
            Duration::from_secs(10),
            TestPhase::Download,
            Arc::clone(&counter),
            sink.clone() as Arc<dyn ProgressSink>,
            |mbps| format!("Download: {mbps:.2} Mbps"),
            &cancel,
            |phase_cancel| {
                steady_worker(
                    Arc::clone(&counter),
                    phase_cancel,
                    156_250,
                    Duration::from_millis(100),
                )
            },
        )
        .await
        .unwrap();

        assert!(
            (summary.average_mbps - 50.0).abs() < 5.0,
            "average {} not within 10% of 50 Mbps",
            summary.average_mbps
        );
        // Ticks land at 0.2s..9.8s; the tick at 10s terminates instead of
        // sampling.
        assert!(
            (48..=50).contains(&summary.sample_count),
            "sample count {}",
            summary.sample_count
        );
        assert_eq!(summary.total_bytes, counter.load(Ordering::Relaxed));

        let events = sink.events();
        assert_eq!(events.len(), summary.sample_count);
        // Completion fraction is non-decreasing within the phase.
        for pair in events.windows(2) {
            assert!(pair[1].progress >= pair[0].progress);
        }
        assert!(events.iter().all(|e| e.phase == TestPhase::Download));
    }

    #[tokio::test(start_paused = true)]
    async fn duration_shorter_than_tick_yields_no_samples_but_counts_bytes() {
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancelSignal::new();

        let summary = run_transfer(
            1,
            Duration::from_millis(50),
            TestPhase::Upload,
            Arc::clone(&counter),
            Arc::new(NullSink),
            |mbps| format!("{mbps:.2}"),
            &cancel,
            |phase_cancel| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1000, Ordering::Relaxed);
                    phase_cancel.cancelled().await;
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.average_mbps, 0.0);
        assert_eq!(summary.total_bytes, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_fault_is_surfaced_after_siblings_finish() {
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancelSignal::new();
        let mut spawned = 0u32;

        let result = run_transfer(
            2,
            Duration::from_secs(2),
            TestPhase::Download,
            Arc::clone(&counter),
            Arc::new(NullSink),
            |mbps| format!("{mbps:.2}"),
            &cancel,
            |phase_cancel| {
                spawned += 1;
                let fail_immediately = spawned == 1;
                let counter = Arc::clone(&counter);
                async move {
                    if fail_immediately {
                        return Err(WorkerError::HttpStatus {
                            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                            url: "http://example.com/download?n=1".into(),
                        });
                    }
                    steady_worker(counter, phase_cancel, 100_000, Duration::from_millis(100))
                        .await
                }
            },
        )
        .await;

        // The healthy sibling kept transferring for the whole phase, so the
        // partial summary still holds real samples and bytes.
        match result {
            Err(TransferError::Worker { source, partial }) => {
                assert!(matches!(source, WorkerError::HttpStatus { .. }));
                assert!(partial.total_bytes > 0);
                assert!(partial.sample_count > 0);
            }
            other => panic!("expected worker fault, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_level_cancel_stops_phase_promptly() {
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = run_transfer(
            2,
            Duration::from_secs(10),
            TestPhase::Download,
            Arc::clone(&counter),
            Arc::new(NullSink),
            |mbps| format!("{mbps:.2}"),
            &cancel,
            |phase_cancel| {
                steady_worker(
                    Arc::clone(&counter),
                    phase_cancel,
                    10_000,
                    Duration::from_millis(100),
                )
            },
        )
        .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
        // Nowhere near the 10 s phase duration.
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
