use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::speedtest::error::SpeedTestError;
use crate::speedtest::transfer::CancelSignal;
use crate::speedtest::{ProgressEvent, ProgressSink, SpeedTestResult, TestPhase};

const MAX_PING_SAMPLES: usize = 100;
const MAX_SPEED_SAMPLES: usize = 200;

/// Message stream from a running test into the UI loop.
pub enum RunMessage {
    Progress(ProgressEvent),
    Finished(Box<Result<SpeedTestResult, SpeedTestError>>),
}

/// Sink handed to the runner; forwards every event into the UI channel
/// without ever blocking the measurement path.
pub struct ProgressForward(pub mpsc::UnboundedSender<RunMessage>);

impl ProgressSink for ProgressForward {
    fn notify(&self, event: ProgressEvent) {
        let _ = self.0.send(RunMessage::Progress(event));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

pub struct App {
    /// `None` until the first run starts.
    pub phase: Option<TestPhase>,
    pub running: bool,
    pub result: Option<SpeedTestResult>,
    pub error: Option<String>,
    pub status: String,
    pub should_quit: bool,

    // UI state
    pub selected_panel: Panel,
    pub expanded: bool,

    // Progress tracking (fractions 0..1)
    pub ping_progress: f64,
    pub download_progress: f64,
    pub upload_progress: f64,

    // Instantaneous samples for charts
    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,
    pub ping_samples: Vec<f64>,

    cancel: Option<CancelSignal>,
}

impl App {
    pub fn new() -> Self {
        Self {
            phase: None,
            running: false,
            result: None,
            error: None,
            status: String::new(),
            should_quit: false,
            selected_panel: Panel::Download,
            expanded: false,
            ping_progress: 0.0,
            download_progress: 0.0,
            upload_progress: 0.0,
            download_samples: Vec::new(),
            upload_samples: Vec::new(),
            ping_samples: Vec::new(),
            cancel: None,
        }
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.running {
                    self.expanded = true;
                    None
                } else {
                    Some(AppAction::StartTest)
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.running {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = None;
        self.result = None;
        self.error = None;
        self.status.clear();
        self.ping_progress = 0.0;
        self.download_progress = 0.0;
        self.upload_progress = 0.0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.ping_samples.clear();
        self.expanded = false;
    }

    pub fn begin_run(&mut self, cancel: CancelSignal) {
        self.running = true;
        self.cancel = Some(cancel);
    }

    pub fn apply_message(&mut self, message: RunMessage) {
        match message {
            RunMessage::Progress(event) => self.apply_progress(event),
            RunMessage::Finished(outcome) => self.finish(*outcome),
        }
    }

    fn apply_progress(&mut self, event: ProgressEvent) {
        match event.phase {
            TestPhase::Ping => {
                self.ping_progress = event.progress / 100.0;
                if event.current > 0.0 {
                    push_capped(&mut self.ping_samples, event.current, MAX_PING_SAMPLES);
                }
            }
            TestPhase::Download => {
                self.download_progress = event.progress / 100.0;
                if event.current > 0.0 {
                    push_capped(&mut self.download_samples, event.current, MAX_SPEED_SAMPLES);
                }
            }
            TestPhase::Upload => {
                self.upload_progress = event.progress / 100.0;
                if event.current > 0.0 {
                    push_capped(&mut self.upload_samples, event.current, MAX_SPEED_SAMPLES);
                }
            }
            TestPhase::Complete | TestPhase::Error => {}
        }
        self.phase = Some(event.phase);
        self.status = event.status;
    }

    fn finish(&mut self, outcome: Result<SpeedTestResult, SpeedTestError>) {
        self.running = false;
        self.cancel = None;
        match outcome {
            Ok(result) => {
                if result.success {
                    self.phase = Some(TestPhase::Complete);
                } else {
                    self.phase = Some(TestPhase::Error);
                    self.error = result.error.clone();
                }
                self.result = Some(result);
            }
            Err(SpeedTestError::Cancelled) => {
                self.phase = None;
                self.status = "Cancelled".into();
            }
        }
    }

    pub fn cancel_test(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

fn push_capped(samples: &mut Vec<f64>, value: f64, cap: usize) {
    samples.push(value);
    if samples.len() > cap {
        samples.remove(0);
    }
}

pub fn poll_event(timeout: Duration) -> anyhow::Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}
