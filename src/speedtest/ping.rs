use std::time::Duration;

use reqwest::Client;
use tokio::time::Instant;

use super::error::PingError;
use super::transfer::CancelSignal;
use super::{ProgressEvent, ProgressSink, TestPhase};
use crate::config::SpeedTestConfig;

/// Gap between probe samples; probing back to back would flood the target
/// and distort the measurement.
const PACING_DELAY: Duration = Duration::from_millis(100);

/// Minimum RTT and mean absolute jitter over the successful samples of one
/// probe run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyOutcome {
    pub min_ms: f64,
    pub jitter_ms: f64,
}

/// Sequentially probes the ping target `ping_samples` times, each request
/// bounded by the configured timeout. Failed samples are reported and
/// skipped; only zero successes across the whole run is fatal. Deliberately
/// not concurrent: overlapping probes would distort RTTs.
pub async fn measure_ping(
    client: &Client,
    config: &SpeedTestConfig,
    progress: &dyn ProgressSink,
    cancel: &CancelSignal,
) -> Result<LatencyOutcome, PingError> {
    let target = ping_url(&config.ping_server);
    let timeout = Duration::from_millis(config.ping_timeout);
    let total = config.ping_samples;

    let mut rtts: Vec<f64> = Vec::with_capacity(total as usize);

    for i in 0..total {
        if cancel.is_cancelled() {
            return Err(PingError::Cancelled);
        }

        let fraction = (i + 1) as f64 / total as f64 * 100.0;
        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PingError::Cancelled),
            sent = client.get(&target).timeout(timeout).send() => sent,
        };

        match outcome {
            // Any completed exchange measures a round trip; the reply's
            // status code is irrelevant here.
            Ok(_) => {
                let rtt = started.elapsed().as_secs_f64() * 1000.0;
                rtts.push(rtt);
                progress.notify(ProgressEvent {
                    phase: TestPhase::Ping,
                    progress: fraction,
                    current: rtt,
                    status: format!("Ping: {rtt:.1} ms ({}/{total})", i + 1),
                });
            }
            Err(err) => {
                progress.notify(ProgressEvent {
                    phase: TestPhase::Ping,
                    progress: fraction,
                    current: 0.0,
                    status: format!("Ping failed: {err} ({}/{total})", i + 1),
                });
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PingError::Cancelled),
            _ = tokio::time::sleep(PACING_DELAY) => {}
        }
    }

    if rtts.is_empty() {
        return Err(PingError::NoSamples {
            target: config.ping_server.clone(),
        });
    }
    Ok(summarize(&rtts))
}

/// A bare host name is probed over plain HTTP; a full URL is used as-is.
fn ping_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}/")
    }
}

fn summarize(rtts: &[f64]) -> LatencyOutcome {
    let min_ms = rtts.iter().copied().fold(f64::INFINITY, f64::min);
    let jitter_ms = if rtts.len() < 2 {
        0.0
    } else {
        rtts.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (rtts.len() - 1) as f64
    };
    LatencyOutcome { min_ms, jitter_ms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::http_fixture::{spawn, Respond};
    use crate::speedtest::testing::CollectSink;

    fn probe_config(target: &str, samples: u32) -> SpeedTestConfig {
        SpeedTestConfig {
            ping_server: target.into(),
            server_url: "http://127.0.0.1:1".into(),
            upload_server_url: None,
            download_endpoint: "/downloading".into(),
            upload_endpoint: "/upload".into(),
            threads: 1,
            download_duration: 5,
            upload_duration: 5,
            ping_samples: samples,
            ping_timeout: 1000,
            upload_data_size_mb: 1,
            allow_insecure_certs: false,
        }
    }

    #[test]
    fn summarize_takes_minimum_and_mean_absolute_jitter() {
        let outcome = summarize(&[10.0, 12.0, 11.0]);
        assert_eq!(outcome.min_ms, 10.0);
        assert!((outcome.jitter_ms - 1.5).abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_jitter() {
        let outcome = summarize(&[42.0]);
        assert_eq!(outcome.min_ms, 42.0);
        assert_eq!(outcome.jitter_ms, 0.0);
    }

    #[test]
    fn minimum_never_exceeds_any_sample() {
        let rtts = [18.0, 9.5, 30.2, 12.1];
        let outcome = summarize(&rtts);
        assert!(rtts.iter().all(|&rtt| outcome.min_ms <= rtt));
        assert!(outcome.jitter_ms >= 0.0);
    }

    #[test]
    fn bare_host_is_probed_over_http() {
        assert_eq!(ping_url("speedtest.example.com"), "http://speedtest.example.com/");
        assert_eq!(
            ping_url("https://speedtest.example.com/ping"),
            "https://speedtest.example.com/ping"
        );
    }

    #[tokio::test]
    async fn probe_collects_samples_and_reports_progress() {
        let addr = spawn(Respond::OkWithBody(0)).await;
        let client = Client::new();
        let config = probe_config(&format!("http://{addr}/"), 3);
        let sink = CollectSink::default();
        let cancel = CancelSignal::new();

        let outcome = measure_ping(&client, &config, &sink, &cancel).await.unwrap();
        assert!(outcome.min_ms > 0.0);
        assert!(outcome.jitter_ms >= 0.0);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.phase == TestPhase::Ping));
        for pair in events.windows(2) {
            assert!(pair[1].progress >= pair[0].progress);
        }
        assert_eq!(events.last().unwrap().progress, 100.0);
    }

    #[tokio::test]
    async fn all_samples_failing_is_a_total_failure() {
        let addr = spawn(Respond::Hangup).await;
        let client = Client::new();
        let config = probe_config(&format!("http://{addr}/"), 3);
        let sink = CollectSink::default();
        let cancel = CancelSignal::new();

        let result = measure_ping(&client, &config, &sink, &cancel).await;
        assert!(matches!(result, Err(PingError::NoSamples { .. })));
        // Each failed sample still produced a progress event.
        assert_eq!(sink.events().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_probe_returns_cancelled_not_failure() {
        let client = Client::new();
        let config = probe_config("127.0.0.1", 3);
        let sink = CollectSink::default();
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = measure_ping(&client, &config, &sink, &cancel).await;
        assert!(matches!(result, Err(PingError::Cancelled)));
        assert!(sink.events().is_empty());
    }
}
