//! Acquisition Loop
//!
//! One strictly sequential cycle at a time: make sure there is a session and
//! a user id, pull the last 24 hours, merge them into the store, derive the
//! trend and hand the newest reading to the display.
//!
//! Nothing that goes wrong inside a cycle ends the loop. Authentication
//! problems retry after a fixed minute; everything else waits for the next
//! regular poll.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::display::{DisplayFrame, GlucoseDisplay};
use crate::storage::{window_start, Reading, ReadingStore};
use crate::sync::{ApiClient, GlucoseEvent};

/// Wait after a failed login or identity lookup
pub const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Base wait between regular polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Poll jitter, applied uniformly in both directions
pub const POLL_JITTER_SECS: f64 = 30.0;

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Login or identity lookup failed
    Retry,
    /// Fetch failed or the cycle errored; store and display untouched
    Skipped,
    /// Fetch succeeded but the window is empty; nothing published
    NoData,
    Published(DisplayFrame),
}

impl CycleOutcome {
    /// Sleep before the next cycle
    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        match self {
            CycleOutcome::Retry => RETRY_DELAY,
            _ => next_poll_delay(rng),
        }
    }
}

/// Regular poll interval with uniform jitter in [-30s, +30s]
pub fn next_poll_delay<R: Rng>(rng: &mut R) -> Duration {
    let jitter = rng.gen_range(-POLL_JITTER_SECS..=POLL_JITTER_SECS);
    Duration::from_secs_f64(POLL_INTERVAL.as_secs_f64() + jitter)
}

pub struct Acquisition {
    client: ApiClient,
    store: Arc<ReadingStore>,
    display: Box<dyn GlucoseDisplay>,
}

impl Acquisition {
    pub fn new(client: ApiClient, store: Arc<ReadingStore>, display: Box<dyn GlucoseDisplay>) -> Self {
        Self { client, store, display }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut ApiClient {
        &mut self.client
    }

    /// Poll forever
    pub async fn run(&mut self) {
        info!("Acquisition loop started");

        loop {
            let outcome = self.run_cycle().await;
            let delay = outcome.next_delay(&mut rand::thread_rng());

            if outcome == CycleOutcome::Retry {
                debug!("Retrying in {}s", delay.as_secs());
            } else {
                debug!("Next poll in {}s", delay.as_secs());
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Run a single cycle up to, but not including, the sleep
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if !self.ensure_session().await {
            return CycleOutcome::Retry;
        }

        if !self.ensure_identity().await {
            return CycleOutcome::Retry;
        }

        match self.fetch_and_publish().await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Cycle failed: {:#}", err);
                CycleOutcome::Skipped
            }
        }
    }

    async fn ensure_session(&mut self) -> bool {
        let session = self.client.session();
        if session.is_valid() && session.user_id.is_some() {
            return true;
        }

        match self.client.login().await {
            Ok(()) => true,
            Err(_) => {
                debug!("Login failed, retrying in {}s", RETRY_DELAY.as_secs());
                false
            }
        }
    }

    async fn ensure_identity(&mut self) -> bool {
        if self.client.session().user_id.is_some() {
            return true;
        }

        match self.client.fetch_identity().await {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!("Failed to get user ID, retrying in {}s", RETRY_DELAY.as_secs());
                false
            }
            Err(e) => {
                error!("Identity lookup aborted: {}", e);
                false
            }
        }
    }

    async fn fetch_and_publish(&mut self) -> Result<CycleOutcome> {
        let now = Utc::now();

        let events = match self.client.fetch_readings(window_start(now), now).await {
            Ok(Some(events)) => events,
            Ok(None) => {
                warn!("No glucose data this cycle");
                return Ok(CycleOutcome::Skipped);
            }
            Err(e) => return Err(e).context("glucose fetch aborted"),
        };

        let readings = parse_events(&events);
        if !readings.is_empty() {
            let inserted = self.store.add(&readings).context("failed to store readings")?;
            self.store.prune().context("failed to prune readings")?;
            info!("Ingested {} readings ({} new)", readings.len(), inserted);
        }

        let window = self.store.window_24h().context("failed to read 24h window")?;

        let Some(frame) = DisplayFrame::from_window(&window) else {
            info!("No readings in the last 24 hours");
            return Ok(CycleOutcome::NoData);
        };

        self.display.show(&frame);
        Ok(CycleOutcome::Published(frame))
    }

    /// Show the newest stored reading on this loop's display once more.
    /// The window is read on a blocking task.
    pub async fn show_final_state(&mut self) -> Option<DisplayFrame> {
        let store = Arc::clone(&self.store);
        let window = match tokio::task::spawn_blocking(move || store.window_24h()).await {
            Ok(Ok(window)) => window,
            Ok(Err(e)) => {
                error!("Failed to read final state: {}", e);
                return None;
            }
            Err(e) => {
                error!("Final state reader failed: {}", e);
                return None;
            }
        };

        let frame = DisplayFrame::from_window(&window)?;
        self.display.show(&frame);
        Some(frame)
    }
}

/// Turn fetched events into readings, skipping the ones that do not parse
pub fn parse_events(events: &[GlucoseEvent]) -> Vec<Reading> {
    events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| match parse_event(event) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("Skipping glucose event #{}: {}", index, e);
                None
            }
        })
        .collect()
}

pub fn parse_event(event: &GlucoseEvent) -> Result<Reading, IngestError> {
    let timestamp = event.event_date.ok_or(IngestError::MissingTimestamp)?;
    let raw = event
        .converted_value
        .as_ref()
        .ok_or(IngestError::MissingValue)?;

    let value = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .ok_or_else(|| IngestError::InvalidValue(raw.to_string()))?;

    Ok(Reading::new(timestamp, value))
}

/// Per-event ingest errors
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("missing event timestamp")]
    MissingTimestamp,

    #[error("missing glucose value")]
    MissingValue,

    #[error("invalid glucose value: {0}")]
    InvalidValue(String),
}
