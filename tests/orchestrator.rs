//! Whole runs: login, monitoring, booking and the control surface.

mod common;

use async_trait::async_trait;
use common::{run_config, ScriptedSession, KEYWORD};
use sponsor_catcher::AvailabilityState::{Available, SoldOut};
use sponsor_catcher::{
    start_run, AbortReason, BookingResult, Error, Event, EventSink, Notifier, Orchestrator,
    RunState, SearchSpec, Step, StepError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        messages.push(event.message);
    }
    messages
}

fn states(messages: &[String]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|m| m.strip_prefix("state: "))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_book_immediately_and_stop_at_submit() {
    let (events, mut rx) = EventSink::channel();
    let mut session = ScriptedSession::new().with_reads(&[Available]);

    let state = Orchestrator::new(run_config(false, false), events)
        .run(&mut session)
        .await;

    assert_eq!(state, RunState::Done(BookingResult::StoppedBeforeSubmit));
    assert_eq!(session.submit_clicks, 0);
    assert_eq!(session.searches(), 1);
    let messages = drain(&mut rx);
    assert_eq!(
        states(&messages),
        vec!["LOGGING_IN", "BOOKING", "DONE (stopped before submit)"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_login_email_stays_out_of_events() {
    let (events, mut rx) = EventSink::channel();
    let config = run_config(false, false);
    let email = config.credentials.email.clone();
    let mut session = ScriptedSession::new();

    Orchestrator::new(config, events).run(&mut session).await;

    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| m == "logged in"));
    assert!(!messages.iter().any(|m| m.contains(&email)), "{:?}", messages);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_until_available_then_book() {
    let (events, mut rx) = EventSink::channel();
    let mut session = ScriptedSession::new().with_reads(&[SoldOut, SoldOut, Available]);

    let state = Orchestrator::new(run_config(true, false), events)
        .run(&mut session)
        .await;

    assert_eq!(state, RunState::Done(BookingResult::StoppedBeforeSubmit));
    let messages = drain(&mut rx);
    assert_eq!(
        states(&messages),
        vec![
            "LOGGING_IN",
            "MONITORING",
            "BOOKING",
            "DONE (stopped before submit)"
        ]
    );
    let checks = messages.iter().filter(|m| m.starts_with("[check #")).count();
    assert_eq!(checks, 3);
    // Three polls plus the booking's own search; login happened once.
    assert_eq!(session.searches(), 4);
    let logins = session
        .log
        .iter()
        .filter(|l| l.as_str() == "navigate https://site.test/login")
        .count();
    assert_eq!(logins, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_cart_aborts_without_checkout() {
    let mut session = ScriptedSession::new()
        .with_reads(&[Available])
        .with_cart_added_per_click(0);

    let state = Orchestrator::new(run_config(false, false), EventSink::disabled())
        .run(&mut session)
        .await;

    match state {
        RunState::Aborted(AbortReason::Booking {
            step: Step::AddToCart,
            error: StepError::Cart(_),
        }) => {}
        other => panic!("expected cart abort, got {:?}", other),
    }
    assert!(!session.clicked(&format!("review & checkout '{}'", KEYWORD)));
    // No return to monitoring after a failed attempt.
    assert_eq!(session.searches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_booking_does_not_resume_monitoring() {
    let (events, mut rx) = EventSink::channel();
    let mut session = ScriptedSession::new()
        .with_reads(&[SoldOut, Available])
        .with_cart_added_per_click(0);

    let state = Orchestrator::new(run_config(true, false), events)
        .run(&mut session)
        .await;

    assert!(matches!(state, RunState::Aborted(AbortReason::Booking { .. })));
    let messages = drain(&mut rx);
    let last = states(&messages).last().map(|s| s.to_string()).unwrap();
    assert!(last.starts_with("ABORTED (booking failed at add_to_cart"), "{}", last);
    assert_eq!(session.searches(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_aborts_before_monitoring() {
    let (events, mut rx) = EventSink::channel();
    let mut session = ScriptedSession::new()
        .with_reads(&[Available])
        .with_failed_login();

    let state = Orchestrator::new(run_config(true, false), events)
        .run(&mut session)
        .await;

    assert!(matches!(
        state,
        RunState::Aborted(AbortReason::Login(StepError::Auth(_)))
    ));
    assert_eq!(session.searches(), 0);
    let messages = drain(&mut rx);
    assert!(!states(&messages).contains(&"MONITORING"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_monitoring() {
    let session = ScriptedSession::new().with_reads(&[SoldOut]);
    let run = start_run(run_config(true, false), session, EventSink::disabled());
    let handle = run.handle();

    let stopper = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        stopper.cancel();
    });

    let (state, session) = run.finish().await.unwrap();

    assert_eq!(state, RunState::Aborted(AbortReason::Cancelled));
    assert_eq!(handle.current_state(), state);
    assert_eq!(session.add_clicks, 0);
    // Checks at 0s, 5s and 10s; the stop lands during the third sleep.
    assert_eq!(session.searches(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_booking_lets_attempt_finish() {
    let (events, mut rx) = EventSink::channel();
    let orchestrator = Orchestrator::new(run_config(true, false), events);
    let handle = orchestrator.handle();
    let stopper = handle.clone();
    let mut session = ScriptedSession::new()
        .with_reads(&[SoldOut, Available])
        .on_add_to_cart(move || stopper.cancel());

    let state = orchestrator.run(&mut session).await;

    assert!(handle.is_cancelled());
    assert_eq!(state, RunState::Done(BookingResult::StoppedBeforeSubmit));
    assert_eq!(session.typed.len(), 7);
    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| m.contains("allowed to finish")));
}

#[tokio::test(start_paused = true)]
async fn test_handle_reports_progress() {
    let session = ScriptedSession::new().with_reads(&[SoldOut, SoldOut, Available]);
    let run = start_run(run_config(true, true), session, EventSink::disabled());
    let handle = run.handle();
    let mut updates = handle.subscribe();

    let mut seen = Vec::new();
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        let terminal = state.is_terminal();
        seen.push(state);
        if terminal {
            break;
        }
    }

    assert!(seen.contains(&RunState::Monitoring));
    assert_eq!(seen.last(), Some(&RunState::Done(BookingResult::Success)));
    assert_eq!(handle.finished().await, RunState::Done(BookingResult::Success));
    let (state, session) = run.finish().await.unwrap();
    assert_eq!(state, RunState::Done(BookingResult::Success));
    assert_eq!(session.submit_clicks, 1);
}

struct ChannelNotifier {
    tx: mpsc::UnboundedSender<String>,
    fail: bool,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn item_available(&self, search: &SearchSpec) -> sponsor_catcher::Result<()> {
        let _ = self.tx.send(search.keyword.clone());
        if self.fail {
            return Err(Error::Notify("relay unreachable".into()));
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_notifier_runs_once_on_trigger() {
    let (tx, mut alerts) = mpsc::unbounded_channel();
    let mut session = ScriptedSession::new().with_reads(&[SoldOut, Available]);

    let state = Orchestrator::new(run_config(true, false), EventSink::disabled())
        .with_notifier(Arc::new(ChannelNotifier { tx, fail: false }))
        .run(&mut session)
        .await;

    assert_eq!(state, RunState::Done(BookingResult::StoppedBeforeSubmit));
    assert_eq!(alerts.recv().await, Some(KEYWORD.to_string()));
    assert!(alerts.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_failing_notifier_does_not_affect_booking() {
    let (tx, mut alerts) = mpsc::unbounded_channel();
    let (events, mut rx) = EventSink::channel();
    let mut session = ScriptedSession::new().with_reads(&[Available]);

    let state = Orchestrator::new(run_config(true, false), events)
        .with_notifier(Arc::new(ChannelNotifier { tx, fail: true }))
        .run(&mut session)
        .await;

    assert_eq!(state, RunState::Done(BookingResult::StoppedBeforeSubmit));
    assert_eq!(alerts.recv().await, Some(KEYWORD.to_string()));
    tokio::task::yield_now().await;
    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| m.contains("alert failed")));
}

#[tokio::test(start_paused = true)]
async fn test_no_notification_without_monitoring() {
    let (tx, mut alerts) = mpsc::unbounded_channel();
    let mut session = ScriptedSession::new();

    Orchestrator::new(run_config(false, false), EventSink::disabled())
        .with_notifier(Arc::new(ChannelNotifier { tx, fail: false }))
        .run(&mut session)
        .await;

    // The orchestrator (and its sender) is gone; nothing was ever sent.
    assert_eq!(alerts.recv().await, None);
}
