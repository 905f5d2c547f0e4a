//! Availability polling and the sold-out → available trigger.

use crate::events::EventSink;
use crate::model::{AvailabilityState, RunConfig};
use crate::session::RemoteSession;
use crate::steps::{self, StepError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fires once, on the first AVAILABLE read that follows a non-available one.
///
/// ERROR reads are remembered as SOLD_OUT, so a glitch between two available
/// reads can neither fire nor re-arm the trigger.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    previous: AvailabilityState,
    fired: bool,
}

impl EdgeDetector {
    /// A detector that has seen nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read. Returns true exactly when the trigger fires.
    pub fn observe(&mut self, state: AvailabilityState) -> bool {
        let current = match state {
            AvailabilityState::Error => AvailabilityState::SoldOut,
            other => other,
        };
        let fire = !self.fired
            && current == AvailabilityState::Available
            && self.previous != AvailabilityState::Available;
        self.previous = current;
        if fire {
            self.fired = true;
        }
        fire
    }

    /// True once the trigger has fired.
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// The last recorded read, with ERROR folded into SOLD_OUT.
    pub fn previous(&self) -> AvailabilityState {
        self.previous
    }
}

/// How a watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Availability appeared on check number `checks`.
    Available { checks: u32 },
    /// The run was cancelled after `checks` completed checks.
    Cancelled { checks: u32 },
}

/// Polls the catalog until the item becomes available or the run is cancelled.
///
/// `watch` consumes the watcher, so a watcher triggers at most once and never
/// resumes polling after handing off.
pub struct AvailabilityWatcher<'a> {
    config: &'a RunConfig,
    poll_interval: Duration,
    cancel: CancellationToken,
    events: EventSink,
    detector: EdgeDetector,
    checks: u32,
}

impl<'a> AvailabilityWatcher<'a> {
    /// Poll every `config.poll_interval` until `cancel` fires.
    pub fn new(config: &'a RunConfig, cancel: CancellationToken, events: EventSink) -> Self {
        Self {
            config,
            poll_interval: config.poll_interval,
            cancel,
            events,
            detector: EdgeDetector::new(),
            checks: 0,
        }
    }

    /// Poll until the trigger fires or the run is cancelled.
    ///
    /// Failed reads are reported as warnings and polling continues.
    pub async fn watch<S: RemoteSession + ?Sized>(mut self, session: &mut S) -> WatchOutcome {
        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled();
            }

            self.checks += 1;
            let state = self.check(session).await;
            if self.detector.observe(state) {
                self.events.info(format!(
                    "[check #{}] {} is AVAILABLE, starting booking",
                    self.checks, self.config.search
                ));
                return WatchOutcome::Available {
                    checks: self.checks,
                };
            }
            self.events.info(format!(
                "[check #{}] {}, next check in {}s",
                self.checks,
                state,
                self.poll_interval.as_secs()
            ));

            if self.cancel.is_cancelled() {
                return self.cancelled();
            }
            let stopped = tokio::select! {
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(self.poll_interval) => false,
            };
            if stopped {
                return self.cancelled();
            }
        }
    }

    /// One navigate → search → read cycle. Any failure reads as ERROR.
    async fn check<S: RemoteSession + ?Sized>(&self, session: &mut S) -> AvailabilityState {
        debug!("availability check #{}", self.checks);
        match self.read(session).await {
            Ok(state) => state,
            Err(e) => {
                warn!("availability check #{} failed: {}", self.checks, e);
                self.events
                    .warn(format!("[check #{}] {}; still monitoring", self.checks, e));
                AvailabilityState::Error
            }
        }
    }

    async fn read<S: RemoteSession + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<AvailabilityState, StepError> {
        let timeouts = &self.config.timeouts;
        steps::open_catalog(session, &self.config.site, timeouts).await?;
        steps::search_item(session, &self.config.search, timeouts).await?;
        steps::read_availability(session, &self.config.search, timeouts).await
    }

    fn cancelled(&self) -> WatchOutcome {
        self.events.info(format!(
            "monitoring stopped after {} check(s)",
            self.checks
        ));
        WatchOutcome::Cancelled {
            checks: self.checks,
        }
    }
}
