//! Run lifecycle: login, optional monitoring, one booking attempt.

use crate::events::{EventLevel, EventSink};
use crate::model::{AbortReason, BookingResult, RunConfig, RunState};
use crate::notify::Notifier;
use crate::session::RemoteSession;
use crate::steps;
use crate::watcher::{AvailabilityWatcher, WatchOutcome};
use crate::workflow::BookingWorkflow;
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drives a single run against one session.
///
/// The orchestrator is the only writer of [`RunState`]. Readers observe it
/// through a [`RunHandle`].
pub struct Orchestrator {
    config: RunConfig,
    state: watch::Sender<RunState>,
    cancel: CancellationToken,
    events: EventSink,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Orchestrator {
    /// Create a run in the `Idle` state.
    pub fn new(config: RunConfig, events: EventSink) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            config,
            state,
            cancel: CancellationToken::new(),
            events,
            notifier: None,
        }
    }

    /// Send an alert when monitoring sees the item become available.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Handle for cancelling and observing this run.
    pub fn handle(&self) -> RunHandle {
        RunHandle {
            state: self.state.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    /// Spawn the run on the tokio runtime.
    pub fn start<S: RemoteSession + 'static>(self, mut session: S) -> StartedRun<S> {
        let handle = self.handle();
        let task = tokio::spawn(async move {
            let state = self.run(&mut session).await;
            (state, session)
        });
        StartedRun { handle, task }
    }

    /// Perform the run and return its terminal state.
    pub async fn run<S: RemoteSession + ?Sized>(self, session: &mut S) -> RunState {
        let config = &self.config;

        self.transition(RunState::LoggingIn);
        if let Err(e) =
            steps::login(session, &config.site, &config.credentials, &config.timeouts).await
        {
            return self.transition(RunState::Aborted(AbortReason::Login(e)));
        }
        self.events.info("logged in");

        if self.cancel.is_cancelled() {
            return self.transition(RunState::Aborted(AbortReason::Cancelled));
        }

        if config.monitoring_enabled {
            self.transition(RunState::Monitoring);
            let watcher = AvailabilityWatcher::new(config, self.cancel.clone(), self.events.clone());
            match watcher.watch(session).await {
                WatchOutcome::Available { checks } => {
                    info!("{} available after {} check(s)", config.search, checks);
                    self.notify_available();
                }
                WatchOutcome::Cancelled { .. } => {
                    return self.transition(RunState::Aborted(AbortReason::Cancelled));
                }
            }
        }

        self.transition(RunState::Booking);
        let result = BookingWorkflow::new(config, self.events.clone())
            .with_authenticated_session()
            .run(session)
            .await;
        if self.cancel.is_cancelled() {
            self.events
                .warn("stop was requested during booking; the attempt was allowed to finish");
        }

        let end = match result {
            BookingResult::Failed { step, error } => {
                RunState::Aborted(AbortReason::Booking { step, error })
            }
            finished => RunState::Done(finished),
        };
        self.transition(end)
    }

    fn transition(&self, next: RunState) -> RunState {
        let previous = self.state.send_replace(next.clone());
        let level = match next {
            RunState::Aborted(AbortReason::Cancelled) => EventLevel::Warn,
            RunState::Aborted(_) => EventLevel::Error,
            _ => EventLevel::Info,
        };
        info!("run state {} -> {}", previous, next);
        self.events.emit(level, format!("state: {}", next));
        next
    }

    fn notify_available(&self) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let search = self.config.search.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match notifier.item_available(&search).await {
                Ok(()) => events.info(format!("availability alert sent for {}", search)),
                Err(e) => {
                    warn!("availability alert failed: {}", e);
                    events.warn(format!("availability alert failed: {}", e));
                }
            }
        });
    }
}

/// Read side of a run plus the stop switch. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunHandle {
    state: watch::Receiver<RunState>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Stop monitoring. A booking attempt in flight is allowed to finish.
    pub fn cancel(&self) {
        if *self.state.borrow() == RunState::Booking {
            info!("stop requested while booking; it takes effect after the attempt");
        }
        self.cancel.cancel();
    }

    /// True once a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Latest state published by the run.
    pub fn current_state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Wait for the run to reach `Done` or `Aborted`.
    pub async fn finished(&self) -> RunState {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(RunState::is_terminal).await.map(|s| (*s).clone());
        match reached {
            Ok(state) => state,
            Err(_) => rx.borrow().clone(),
        }
    }
}

/// A run executing on its own task.
pub struct StartedRun<S> {
    handle: RunHandle,
    task: JoinHandle<(RunState, S)>,
}

impl<S> StartedRun<S> {
    /// Handle for cancelling and observing the run.
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Wait for the run and take the session back.
    pub async fn finish(self) -> Result<(RunState, S)> {
        Ok(self.task.await?)
    }
}

/// Start a run on its own task; the session comes back through [`StartedRun::finish`].
pub fn start_run<S: RemoteSession + 'static>(
    config: RunConfig,
    session: S,
    events: EventSink,
) -> StartedRun<S> {
    Orchestrator::new(config, events).start(session)
}
