//! Run-scoped data: what to buy, how to pay, and where the run currently is.

use crate::steps::StepError;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

/// Login credentials. Immutable for a run and never logged.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &"***")
            .field("password", &"***")
            .finish()
    }
}

/// Keyword identifying the target item in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    pub keyword: String,
}

impl SearchSpec {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }
}

impl fmt::Display for SearchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.keyword)
    }
}

/// Card and billing details entered on the checkout page.
#[derive(Clone, Deserialize)]
pub struct PaymentDetails {
    pub name_on_card: String,
    #[serde(deserialize_with = "string_or_number")]
    pub card_number: String,
    #[serde(deserialize_with = "string_or_number")]
    pub cvv: String,
    #[serde(deserialize_with = "string_or_number")]
    pub exp_month: String,
    #[serde(deserialize_with = "string_or_number")]
    pub exp_year: String,
    #[serde(deserialize_with = "string_or_number")]
    pub billing_zip: String,
    pub confirmation_email: String,
}

/// YAML users write `exp_month: 12`; the form wants text either way.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

impl PaymentDetails {
    /// Value to enter for a given form field.
    pub fn value(&self, field: PaymentField) -> &str {
        match field {
            PaymentField::NameOnCard => &self.name_on_card,
            PaymentField::CardNumber => &self.card_number,
            PaymentField::Cvv => &self.cvv,
            PaymentField::ExpiryMonth => &self.exp_month,
            PaymentField::ExpiryYear => &self.exp_year,
            PaymentField::BillingZip => &self.billing_zip,
            PaymentField::ConfirmationEmail => &self.confirmation_email,
        }
    }
}

impl fmt::Debug for PaymentDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last4: String = self
            .card_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        f.debug_struct("PaymentDetails")
            .field("name_on_card", &"***")
            .field("card_number", &format!("****{}", last4))
            .field("cvv", &"***")
            .field("exp_month", &"**")
            .field("exp_year", &"****")
            .field("billing_zip", &"***")
            .field("confirmation_email", &self.confirmation_email)
            .finish()
    }
}

/// Payment form fields, in the order they are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentField {
    NameOnCard,
    CardNumber,
    Cvv,
    ExpiryMonth,
    ExpiryYear,
    BillingZip,
    ConfirmationEmail,
}

impl PaymentField {
    pub const ALL: [PaymentField; 7] = [
        PaymentField::NameOnCard,
        PaymentField::CardNumber,
        PaymentField::Cvv,
        PaymentField::ExpiryMonth,
        PaymentField::ExpiryYear,
        PaymentField::BillingZip,
        PaymentField::ConfirmationEmail,
    ];

    /// Dropdown fields are chosen by option rather than typed.
    pub fn is_select(self) -> bool {
        matches!(self, PaymentField::ExpiryMonth | PaymentField::ExpiryYear)
    }

    pub fn name(self) -> &'static str {
        match self {
            PaymentField::NameOnCard => "name_on_card",
            PaymentField::CardNumber => "card_number",
            PaymentField::Cvv => "cvv",
            PaymentField::ExpiryMonth => "exp_month",
            PaymentField::ExpiryYear => "exp_year",
            PaymentField::BillingZip => "billing_zip",
            PaymentField::ConfirmationEmail => "confirmation_email",
        }
    }
}

impl fmt::Display for PaymentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pages of the target site.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub login_url: String,
    pub catalog_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            login_url: "https://members.manufacturedhousing.org/account/login.aspx".into(),
            catalog_url: "https://members.manufacturedhousing.org/sponsorships/become-a-sponsor"
                .into(),
        }
    }
}

/// Bounded waits used by the workflow steps.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Page transitions: login, catalog load, cart, checkout.
    pub page: Duration,
    /// Single element lookups on an already loaded page.
    pub element: Duration,
    /// Order confirmation after submitting.
    pub confirmation: Duration,
    /// Pause after a post-back click before reading the page again.
    pub settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page: Duration::from_millis(10_000),
            element: Duration::from_millis(3_000),
            confirmation: Duration::from_millis(15_000),
            settle: Duration::from_millis(1_000),
        }
    }
}

/// Everything a single run needs. Owned by the orchestrator for the run's lifetime.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub site: SiteConfig,
    pub credentials: Credentials,
    pub search: SearchSpec,
    pub payment: PaymentDetails,
    pub monitoring_enabled: bool,
    pub poll_interval: Duration,
    pub auto_submit: bool,
    pub timeouts: Timeouts,
    /// Screenshot path written when a booking step fails (`{timestamp}` is expanded).
    pub failure_screenshot: Option<String>,
}

/// Result of one availability read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvailabilityState {
    #[default]
    Unknown,
    SoldOut,
    Available,
    Error,
}

impl fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AvailabilityState::Unknown => "unknown",
            AvailabilityState::SoldOut => "sold out",
            AvailabilityState::Available => "AVAILABLE",
            AvailabilityState::Error => "read error",
        })
    }
}

/// Booking workflow steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Login,
    OpenCatalog,
    Search,
    AddToCart,
    Checkout,
    FillPayment,
    Submit,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Login,
        Step::OpenCatalog,
        Step::Search,
        Step::AddToCart,
        Step::Checkout,
        Step::FillPayment,
        Step::Submit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Login => "login",
            Step::OpenCatalog => "open_catalog",
            Step::Search => "search",
            Step::AddToCart => "add_to_cart",
            Step::Checkout => "checkout",
            Step::FillPayment => "fill_payment",
            Step::Submit => "submit",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal output of one booking attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingResult {
    Success,
    StoppedBeforeSubmit,
    Failed { step: Step, error: StepError },
}

impl BookingResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, BookingResult::Failed { .. })
    }
}

impl fmt::Display for BookingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingResult::Success => f.write_str("order submitted"),
            BookingResult::StoppedBeforeSubmit => f.write_str("stopped before submit"),
            BookingResult::Failed { step, error } => write!(f, "failed at {}: {}", step, error),
        }
    }
}

/// Why a run ended without completing.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    Login(StepError),
    Booking { step: Step, error: StepError },
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Login(e) => write!(f, "login failed: {}", e),
            AbortReason::Booking { step, error } => {
                write!(f, "booking failed at {}: {}", step, error)
            }
            AbortReason::Cancelled => f.write_str("cancelled by user"),
        }
    }
}

/// Lifecycle of a run. Written only by the orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunState {
    #[default]
    Idle,
    LoggingIn,
    Monitoring,
    Booking,
    Done(BookingResult),
    Aborted(AbortReason),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done(_) | RunState::Aborted(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("IDLE"),
            RunState::LoggingIn => f.write_str("LOGGING_IN"),
            RunState::Monitoring => f.write_str("MONITORING"),
            RunState::Booking => f.write_str("BOOKING"),
            RunState::Done(result) => write!(f, "DONE ({})", result),
            RunState::Aborted(reason) => write!(f, "ABORTED ({})", reason),
        }
    }
}
