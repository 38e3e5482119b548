mod app;
mod cli;
mod config;
mod host;
mod speedtest;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use app::{poll_event, App, AppAction, ProgressForward, RunMessage};
use clap::Parser;
use cli::Cli;
use config::SpeedTestConfig;
use crossterm::event::Event;
use ratatui::DefaultTerminal;
use reqwest::Client;
use speedtest::error::SpeedTestError;
use speedtest::runner::SpeedTestRunner;
use speedtest::transfer::CancelSignal;
use speedtest::{ProgressEvent, ProgressSink};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Arc::new(
        SpeedTestConfig::load(cli.config.as_deref()).context("failed to load configuration")?,
    );
    let client = config::build_client(&config).context("failed to build HTTP client")?;

    if cli.cli {
        run_headless(config, client, cli.verbose).await
    } else {
        run_tui(config, client).await
    }
}

/// One test run without the TUI: progress to stderr (verbose), the result
/// record as JSON on stdout.
async fn run_headless(
    config: Arc<SpeedTestConfig>,
    client: Client,
    verbose: bool,
) -> Result<ExitCode> {
    let default_filter = if verbose {
        "openspeed=debug"
    } else {
        "openspeed=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelSignal::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let runner = SpeedTestRunner::new(config, client);
    let run = tokio::spawn(async move {
        let sink: Arc<dyn ProgressSink> = Arc::new(progress_tx);
        runner.run(sink, cancel).await
    });

    // The channel closes once the run drops its sink clones.
    while let Some(event) = progress_rx.recv().await {
        if verbose {
            eprintln!("[{}] {}", event.phase, event.status);
        }
    }

    match run.await? {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.success {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
        Err(SpeedTestError::Cancelled) => {
            eprintln!("speed test cancelled");
            Ok(ExitCode::from(130))
        }
    }
}

async fn run_tui(config: Arc<SpeedTestConfig>, client: Client) -> Result<ExitCode> {
    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = tui_loop(&mut terminal, config, client).await;

    ratatui::restore();
    result.map(|_| ExitCode::SUCCESS)
}

async fn tui_loop(
    terminal: &mut DefaultTerminal,
    config: Arc<SpeedTestConfig>,
    client: Client,
) -> Result<()> {
    let mut app = App::new();
    let mut run_rx: Option<mpsc::UnboundedReceiver<RunMessage>> = None;

    loop {
        terminal.draw(|frame| ui::draw_ui(frame, &app, &config.server_url))?;

        if let Some(rx) = run_rx.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(message) => app.apply_message(message),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        run_rx = None;
                        break;
                    }
                }
            }
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        app.reset_for_new_test();

                        let (tx, rx) = mpsc::unbounded_channel();
                        let cancel = CancelSignal::new();
                        app.begin_run(cancel.clone());
                        run_rx = Some(rx);

                        let runner = SpeedTestRunner::new(Arc::clone(&config), client.clone());
                        tokio::spawn(async move {
                            let sink: Arc<dyn ProgressSink> =
                                Arc::new(ProgressForward(tx.clone()));
                            let outcome = runner.run(sink, cancel).await;
                            let _ = tx.send(RunMessage::Finished(Box::new(outcome)));
                        });
                    }
                    AppAction::CancelTest => {
                        // The run task notices the signal and reports back
                        // through the channel as cancelled.
                        app.cancel_test();
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
