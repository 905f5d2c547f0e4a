//! The remote page capability the workflow steps drive.
//!
//! Steps speak in terms of [`Element`]s ("the add button for this keyword"),
//! never raw selectors. The binding to the target site's markup lives in one
//! adapter ([`browser::EokaSession`]); tests substitute a scripted session.

pub mod browser;

use crate::model::PaymentField;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Interval between checks inside a bounded wait.
pub const POLL_STEP: Duration = Duration::from_millis(100);

/// Errors reported by a session implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("driver error: {0}")]
    Driver(String),

    #[error("element is no longer attached: {0}")]
    StaleElement(String),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Semantic page elements the booking flow interacts with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Element {
    LoginEmail,
    LoginPassword,
    LoginButton,
    /// Validation summary shown for rejected credentials.
    LoginError,
    /// Present only once the session is authenticated.
    SignedIn,
    /// Marks the loaded catalog page.
    Catalog,
    SearchInput,
    SearchButton,
    ProductCard(String),
    SoldOutBadge(String),
    AddButton(String),
    ReviewCheckout(String),
    /// A cart entry for the keyword (selected product card).
    CartEntry(String),
    CartSoldOutWarning,
    CartCheckoutButton,
    PaymentInput(PaymentField),
    OrderTotal,
    CheckoutValidationError,
    SubmitButton,
    OrderConfirmation,
    OrderError,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::LoginEmail => f.write_str("login email input"),
            Element::LoginPassword => f.write_str("login password input"),
            Element::LoginButton => f.write_str("login button"),
            Element::LoginError => f.write_str("login error"),
            Element::SignedIn => f.write_str("signed-in marker"),
            Element::Catalog => f.write_str("catalog"),
            Element::SearchInput => f.write_str("search input"),
            Element::SearchButton => f.write_str("search button"),
            Element::ProductCard(k) => write!(f, "product card '{}'", k),
            Element::SoldOutBadge(k) => write!(f, "sold-out badge '{}'", k),
            Element::AddButton(k) => write!(f, "add button '{}'", k),
            Element::ReviewCheckout(k) => write!(f, "review & checkout '{}'", k),
            Element::CartEntry(k) => write!(f, "cart entry '{}'", k),
            Element::CartSoldOutWarning => f.write_str("cart sold-out warning"),
            Element::CartCheckoutButton => f.write_str("cart checkout button"),
            Element::PaymentInput(field) => write!(f, "payment field {}", field),
            Element::OrderTotal => f.write_str("order total"),
            Element::CheckoutValidationError => f.write_str("checkout validation error"),
            Element::SubmitButton => f.write_str("submit button"),
            Element::OrderConfirmation => f.write_str("order confirmation"),
            Element::OrderError => f.write_str("order error"),
        }
    }
}

/// Opaque reference to a located element, valid until the page changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A remote page the run holds exclusively.
#[async_trait]
pub trait RemoteSession: Send {
    async fn navigate(&mut self, url: &str) -> SessionResult<()>;

    /// Locate the first match, if any, without waiting.
    async fn find(&mut self, element: &Element) -> SessionResult<Option<ElementHandle>>;

    /// Number of matches currently on the page.
    async fn count(&mut self, element: &Element) -> SessionResult<usize>;

    async fn click(&mut self, handle: &ElementHandle) -> SessionResult<()>;

    /// Replace the element's value with `text`.
    async fn type_text(&mut self, handle: &ElementHandle, text: &str) -> SessionResult<()>;

    /// Choose a dropdown option by value or visible text.
    async fn select(&mut self, handle: &ElementHandle, value: &str) -> SessionResult<()>;

    async fn read_text(&mut self, handle: &ElementHandle) -> SessionResult<String>;

    async fn scroll_into_view(&mut self, handle: &ElementHandle) -> SessionResult<()>;

    async fn screenshot(&mut self) -> SessionResult<Vec<u8>>;

    /// Wait until one of `elements` is present and return its index and handle.
    ///
    /// Earlier entries win when several are present on the same check. Driver
    /// errors while waiting count as "not yet": pages mid-navigation often
    /// refuse script evaluation.
    async fn wait_for_any(
        &mut self,
        elements: &[Element],
        timeout: Duration,
    ) -> SessionResult<Option<(usize, ElementHandle)>> {
        let deadline = Instant::now() + timeout;
        let mut last_error = None;
        loop {
            for (i, element) in elements.iter().enumerate() {
                match self.find(element).await {
                    Ok(Some(handle)) => return Ok(Some((i, handle))),
                    Ok(None) => {}
                    Err(e) => last_error = Some(e),
                }
            }
            if Instant::now() >= deadline {
                if let Some(e) = last_error {
                    debug!("wait gave up after {:?}, last error: {}", timeout, e);
                }
                return Ok(None);
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    /// Wait until `element` is present.
    async fn wait_for(
        &mut self,
        element: &Element,
        timeout: Duration,
    ) -> SessionResult<Option<ElementHandle>> {
        Ok(self
            .wait_for_any(std::slice::from_ref(element), timeout)
            .await?
            .map(|(_, handle)| handle))
    }
}
