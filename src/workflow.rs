//! One purchase attempt: the steps in order, stopping at the first failure.

use crate::events::EventSink;
use crate::model::{BookingResult, RunConfig, Step};
use crate::session::RemoteSession;
use crate::steps::{self, StepError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Runs the booking steps against a session.
///
/// Failures are never retried here. A retry can double-submit a payment, so
/// the caller gets `Failed` and decides what happens to the run.
pub struct BookingWorkflow<'a> {
    config: &'a RunConfig,
    events: EventSink,
    authenticated: bool,
}

impl<'a> BookingWorkflow<'a> {
    /// A workflow that starts with the login step.
    pub fn new(config: &'a RunConfig, events: EventSink) -> Self {
        Self {
            config,
            events,
            authenticated: false,
        }
    }

    /// Skip the login step and reuse the session's existing login.
    pub fn with_authenticated_session(mut self) -> Self {
        self.authenticated = true;
        self
    }

    /// Steps this workflow will run, in order.
    pub fn steps(&self) -> &'static [Step] {
        if self.authenticated {
            &Step::ALL[1..]
        } else {
            &Step::ALL[..]
        }
    }

    /// Run every step and return the booking result.
    pub async fn run<S: RemoteSession + ?Sized>(&self, session: &mut S) -> BookingResult {
        let steps = self.steps();
        let total = steps.len();

        // A step list that ends before Submit leaves the order for the user.
        let mut result = BookingResult::StoppedBeforeSubmit;
        for (i, &step) in steps.iter().enumerate() {
            let n = i + 1;
            self.events
                .info(format!("[{}/{}] {}...", n, total, self.describe(step)));
            match self.execute(step, session).await {
                Ok(Some(finished)) => result = finished,
                Ok(None) => self.events.info(format!("[{}/{}] {} done", n, total, step)),
                Err(error) => return self.fail(n, total, step, error, session).await,
            }
        }
        self.report_finished(&result);
        result
    }

    /// Run one step. Only Submit produces a result.
    async fn execute<S: RemoteSession + ?Sized>(
        &self,
        step: Step,
        session: &mut S,
    ) -> Result<Option<BookingResult>, StepError> {
        let c = self.config;
        let t = &c.timeouts;
        match step {
            Step::Login => steps::login(session, &c.site, &c.credentials, t).await?,
            Step::OpenCatalog => steps::open_catalog(session, &c.site, t).await?,
            Step::Search => steps::search_item(session, &c.search, t).await?,
            Step::AddToCart => {
                let entries = steps::add_to_cart(session, &c.search, t).await?;
                if entries > 1 {
                    self.events.warn(format!(
                        "cart holds {} entries for {}; review quantities before paying",
                        entries, c.search
                    ));
                }
            }
            Step::Checkout => steps::checkout(session, &c.search, t).await?,
            Step::FillPayment => {
                let summary = steps::fill_payment(session, &c.payment, t).await?;
                if let Some(total) = summary.order_total {
                    self.events.info(format!("order total: {}", total));
                }
                if let Some(error) = summary.validation_error {
                    self.events
                        .warn(format!("checkout form shows a validation error: {}", error));
                }
            }
            Step::Submit => return steps::submit(session, c.auto_submit, t).await.map(Some),
        }
        Ok(None)
    }

    fn describe(&self, step: Step) -> String {
        match step {
            Step::Login => "Logging in".into(),
            Step::OpenCatalog => "Opening catalog".into(),
            Step::Search => format!("Searching for {}", self.config.search),
            Step::AddToCart => "Adding to cart".into(),
            Step::Checkout => "Going to checkout".into(),
            Step::FillPayment => "Filling payment details".into(),
            Step::Submit if self.config.auto_submit => "SUBMITTING ORDER".into(),
            Step::Submit => "Moving to the submit button".into(),
        }
    }

    fn report_finished(&self, result: &BookingResult) {
        match result {
            BookingResult::Success => {
                info!("order submitted for {}", self.config.search);
                self.events.info("ORDER SUBMITTED");
            }
            BookingResult::StoppedBeforeSubmit => {
                self.events.info(
                    "READY TO SUBMIT: payment details filled, review and submit manually",
                );
            }
            BookingResult::Failed { .. } => {}
        }
    }

    async fn fail<S: RemoteSession + ?Sized>(
        &self,
        n: usize,
        total: usize,
        step: Step,
        error: StepError,
        session: &mut S,
    ) -> BookingResult {
        warn!("booking step {} failed: {}", step, error);
        self.events
            .error(format!("[{}/{}] {} failed: {}", n, total, step, error));
        if let StepError::Submit(ref failure) = error {
            if failure.is_ambiguous() {
                self.events.error(
                    "order state unknown: check the account's orders before trying again",
                );
            }
        }
        self.save_failure_screenshot(session).await;
        BookingResult::Failed { step, error }
    }

    async fn save_failure_screenshot<S: RemoteSession + ?Sized>(&self, session: &mut S) {
        let Some(ref template) = self.config.failure_screenshot else {
            return;
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = template.replace("{timestamp}", &timestamp.to_string());
        match session.screenshot().await {
            Ok(data) => match std::fs::write(&path, data) {
                Ok(()) => self
                    .events
                    .info(format!("saved failure screenshot to {}", path)),
                Err(e) => warn!("Failed to save screenshot: {}", e),
            },
            Err(e) => warn!("Failed to capture screenshot: {}", e),
        }
    }
}
