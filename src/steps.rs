//! The individual operations of the purchase flow.
//!
//! Each step takes the session plus the slice of configuration it needs and
//! either succeeds or reports its own error kind. Steps that change remote
//! state (adding to cart, submitting) confirm the change by reading the page
//! again; a click that returned without error proves nothing.

use crate::model::{
    AvailabilityState, BookingResult, Credentials, PaymentDetails, PaymentField, SearchSpec,
    SiteConfig, Timeouts,
};
use crate::session::{Element, RemoteSession, SessionError, POLL_STEP};
use tokio::time::Instant;
use tracing::{debug, info};

/// How a submit attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitFailure {
    #[error("submit control not found")]
    MissingControl,

    /// Neither confirmation nor failure was shown. The order may have gone through.
    #[error("could not verify the order ({0}); it may have been placed, verify before retrying")]
    Unverified(String),

    /// The site showed an explicit failure.
    #[error("order rejected: {0}")]
    Rejected(String),
}

impl SubmitFailure {
    /// True when the order may exist despite the failure.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SubmitFailure::Unverified(_))
    }
}

/// Errors raised by individual steps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("search failed: {0}")]
    Search(String),

    #[error("cart error: {0}")]
    Cart(String),

    #[error("payment field '{field}' could not be set: {reason}")]
    PaymentForm { field: PaymentField, reason: String },

    #[error("submit failed: {0}")]
    Submit(#[from] SubmitFailure),

    #[error("availability read failed: {0}")]
    TransientRead(String),
}

/// What the checkout page showed after the payment form was filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentSummary {
    pub order_total: Option<String>,
    pub validation_error: Option<String>,
}

/// Open the login page, submit credentials and wait for the signed-in marker.
pub async fn login<S: RemoteSession + ?Sized>(
    session: &mut S,
    site: &SiteConfig,
    credentials: &Credentials,
    timeouts: &Timeouts,
) -> Result<(), StepError> {
    let auth = |what: &str, e: SessionError| StepError::Auth(format!("{}: {}", what, e));

    session
        .navigate(&site.login_url)
        .await
        .map_err(|e| auth("could not open login page", e))?;

    let email = session
        .wait_for(&Element::LoginEmail, timeouts.page)
        .await
        .map_err(|e| auth("login form", e))?
        .ok_or_else(|| {
            StepError::Auth(format!("login form did not load within {:?}", timeouts.page))
        })?;
    session
        .type_text(&email, &credentials.email)
        .await
        .map_err(|e| auth("could not enter email", e))?;

    let password = session
        .wait_for(&Element::LoginPassword, timeouts.element)
        .await
        .map_err(|e| auth("login form", e))?
        .ok_or_else(|| StepError::Auth("password input not found".into()))?;
    session
        .type_text(&password, &credentials.password)
        .await
        .map_err(|e| auth("could not enter password", e))?;

    let button = session
        .wait_for(&Element::LoginButton, timeouts.element)
        .await
        .map_err(|e| auth("login form", e))?
        .ok_or_else(|| StepError::Auth("login button not found".into()))?;
    session
        .click(&button)
        .await
        .map_err(|e| auth("could not click login", e))?;

    match session
        .wait_for_any(&[Element::SignedIn, Element::LoginError], timeouts.page)
        .await
        .map_err(|e| auth("waiting for login", e))?
    {
        Some((0, _)) => {
            info!("signed in");
            Ok(())
        }
        Some((_, marker)) => {
            let message = session.read_text(&marker).await.unwrap_or_default();
            Err(StepError::Auth(format!(
                "credentials rejected: {}",
                message.trim()
            )))
        }
        None => Err(StepError::Auth(format!(
            "no signed-in marker within {:?}",
            timeouts.page
        ))),
    }
}

/// Navigate to the catalog and wait for it to render.
pub async fn open_catalog<S: RemoteSession + ?Sized>(
    session: &mut S,
    site: &SiteConfig,
    timeouts: &Timeouts,
) -> Result<(), StepError> {
    session
        .navigate(&site.catalog_url)
        .await
        .map_err(|e| StepError::Navigation(format!("could not open catalog: {}", e)))?;
    let marker = session
        .wait_for(&Element::Catalog, timeouts.page)
        .await
        .map_err(|e| StepError::Navigation(e.to_string()))?;
    if marker.is_none() {
        return Err(StepError::Navigation(format!(
            "catalog page did not load within {:?}",
            timeouts.page
        )));
    }
    Ok(())
}

/// Enter the keyword into the catalog search and trigger it.
pub async fn search_item<S: RemoteSession + ?Sized>(
    session: &mut S,
    search: &SearchSpec,
    timeouts: &Timeouts,
) -> Result<(), StepError> {
    let input = session
        .wait_for(&Element::SearchInput, timeouts.element)
        .await
        .map_err(|e| StepError::Search(e.to_string()))?
        .ok_or_else(|| StepError::Search("search control not found".into()))?;
    session
        .type_text(&input, &search.keyword)
        .await
        .map_err(|e| StepError::Search(format!("could not enter keyword: {}", e)))?;

    let button = session
        .wait_for(&Element::SearchButton, timeouts.element)
        .await
        .map_err(|e| StepError::Search(e.to_string()))?
        .ok_or_else(|| StepError::Search("search button not found".into()))?;
    session
        .click(&button)
        .await
        .map_err(|e| StepError::Search(format!("could not trigger search: {}", e)))?;

    // The search is a post-back; give the result list time to re-render.
    tokio::time::sleep(timeouts.settle).await;
    debug!("searched for {}", search);
    Ok(())
}

/// Classify the searched item as sold out or available.
///
/// An unresolvable card is a [`StepError::TransientRead`]; callers that poll
/// treat it as [`AvailabilityState::Error`].
pub async fn read_availability<S: RemoteSession + ?Sized>(
    session: &mut S,
    search: &SearchSpec,
    timeouts: &Timeouts,
) -> Result<AvailabilityState, StepError> {
    let keyword = search.keyword.clone();
    let found = session
        .wait_for_any(
            &[
                Element::SoldOutBadge(keyword.clone()),
                Element::AddButton(keyword.clone()),
            ],
            timeouts.element,
        )
        .await
        .map_err(|e| StepError::TransientRead(e.to_string()))?;

    match found {
        Some((0, _)) => Ok(AvailabilityState::SoldOut),
        Some(_) => Ok(AvailabilityState::Available),
        None => {
            let card = session
                .find(&Element::ProductCard(keyword))
                .await
                .unwrap_or(None);
            Err(StepError::TransientRead(if card.is_some() {
                format!(
                    "product card for {} shows neither a sold-out badge nor an add control",
                    search
                )
            } else {
                format!("no product card for {} within {:?}", search, timeouts.element)
            }))
        }
    }
}

/// Add the searched item to the cart and confirm the cart holds it.
///
/// Returns the number of matching cart entries. An item that is already in
/// the cart is not added again.
pub async fn add_to_cart<S: RemoteSession + ?Sized>(
    session: &mut S,
    search: &SearchSpec,
    timeouts: &Timeouts,
) -> Result<usize, StepError> {
    let entry = Element::CartEntry(search.keyword.clone());
    let existing = session
        .count(&entry)
        .await
        .map_err(|e| StepError::Cart(format!("could not read cart: {}", e)))?;
    if existing > 0 {
        info!("{} already in cart", search);
        return Ok(existing);
    }

    let add = session
        .wait_for(&Element::AddButton(search.keyword.clone()), timeouts.element)
        .await
        .map_err(|e| StepError::Cart(e.to_string()))?
        .ok_or_else(|| {
            StepError::Cart(format!("no add control for {} (sold out again?)", search))
        })?;
    let _ = session.scroll_into_view(&add).await;
    session
        .click(&add)
        .await
        .map_err(|e| StepError::Cart(format!("could not click add: {}", e)))?;
    tokio::time::sleep(timeouts.settle).await;

    let confirmed = session
        .wait_for(&entry, timeouts.page)
        .await
        .map_err(|e| StepError::Cart(format!("could not read cart: {}", e)))?;
    if confirmed.is_none() {
        return Err(StepError::Cart(format!(
            "cart shows no entry for {} after adding",
            search
        )));
    }
    session
        .count(&entry)
        .await
        .map_err(|e| StepError::Cart(format!("could not read cart: {}", e)))
}

/// Go from the catalog through the cart to the payment form.
pub async fn checkout<S: RemoteSession + ?Sized>(
    session: &mut S,
    search: &SearchSpec,
    timeouts: &Timeouts,
) -> Result<(), StepError> {
    let nav = |what: &str, e: SessionError| StepError::Navigation(format!("{}: {}", what, e));

    let review = session
        .wait_for(&Element::ReviewCheckout(search.keyword.clone()), timeouts.element)
        .await
        .map_err(|e| nav("review & checkout", e))?
        .ok_or_else(|| StepError::Navigation("review & checkout control not found".into()))?;
    let _ = session.scroll_into_view(&review).await;
    session
        .click(&review)
        .await
        .map_err(|e| nav("could not open cart", e))?;

    let found = session
        .wait_for_any(
            &[Element::CartSoldOutWarning, Element::CartCheckoutButton],
            timeouts.page,
        )
        .await
        .map_err(|e| nav("cart page", e))?;
    let checkout_button = match found {
        Some((0, warning)) => return Err(sold_out_at_cart(session, &warning).await),
        Some((_, button)) => button,
        None => {
            return Err(StepError::Navigation(format!(
                "cart page did not load within {:?}",
                timeouts.page
            )))
        }
    };
    if let Ok(Some(warning)) = session.find(&Element::CartSoldOutWarning).await {
        return Err(sold_out_at_cart(session, &warning).await);
    }

    session
        .click(&checkout_button)
        .await
        .map_err(|e| nav("could not click checkout", e))?;
    let form = session
        .wait_for(
            &Element::PaymentInput(PaymentField::NameOnCard),
            timeouts.page,
        )
        .await
        .map_err(|e| nav("payment page", e))?;
    if form.is_none() {
        return Err(StepError::Navigation(format!(
            "payment form did not load within {:?}",
            timeouts.page
        )));
    }
    Ok(())
}

async fn sold_out_at_cart<S: RemoteSession + ?Sized>(
    session: &mut S,
    warning: &crate::session::ElementHandle,
) -> StepError {
    let message = session.read_text(warning).await.unwrap_or_default();
    StepError::Cart(format!("sold out at cart: {}", message.trim()))
}

/// Fill every payment field in order. Values are never logged.
pub async fn fill_payment<S: RemoteSession + ?Sized>(
    session: &mut S,
    payment: &PaymentDetails,
    timeouts: &Timeouts,
) -> Result<PaymentSummary, StepError> {
    for field in PaymentField::ALL {
        let handle = session
            .wait_for(&Element::PaymentInput(field), timeouts.element)
            .await
            .map_err(|e| StepError::PaymentForm {
                field,
                reason: e.to_string(),
            })?
            .ok_or(StepError::PaymentForm {
                field,
                reason: "field not found".into(),
            })?;

        let value = payment.value(field);
        let result = if field.is_select() {
            session.select(&handle, value).await
        } else {
            session.type_text(&handle, value).await
        };
        result.map_err(|e| StepError::PaymentForm {
            field,
            reason: e.to_string(),
        })?;
        debug!("filled {}", field);
    }

    let mut summary = PaymentSummary::default();
    if let Ok(Some(total)) = session.find(&Element::OrderTotal).await {
        summary.order_total = session
            .read_text(&total)
            .await
            .ok()
            .map(|t| t.trim().to_string());
    }
    if let Ok(Some(error)) = session.find(&Element::CheckoutValidationError).await {
        summary.validation_error = session
            .read_text(&error)
            .await
            .ok()
            .map(|t| t.trim().to_string());
    }
    Ok(summary)
}

/// Stop in front of the submit control, or click it and confirm the order.
///
/// The checkout page shows validation errors and order errors in the same
/// banner. A banner only counts as a rejection once the page has answered the
/// click: either the submit control is gone or the banner text changed. A
/// banner that stays put next to the submit control is reported as
/// [`SubmitFailure::Unverified`].
pub async fn submit<S: RemoteSession + ?Sized>(
    session: &mut S,
    auto_submit: bool,
    timeouts: &Timeouts,
) -> Result<BookingResult, StepError> {
    let button = session
        .wait_for(&Element::SubmitButton, timeouts.element)
        .await
        .ok()
        .flatten()
        .ok_or(SubmitFailure::MissingControl)?;

    if !auto_submit {
        let _ = session.scroll_into_view(&button).await;
        return Ok(BookingResult::StoppedBeforeSubmit);
    }

    let banner_before = banner_text(session).await;
    if let Some(ref text) = banner_before {
        debug!("banner shown before submit: {}", text);
    }

    if let Err(e) = session.click(&button).await {
        return Err(SubmitFailure::Unverified(format!("submit click reported: {}", e)).into());
    }

    let deadline = Instant::now() + timeouts.confirmation;
    let mut unanswered_banner = None;
    loop {
        if let Ok(Some(_)) = session.find(&Element::OrderConfirmation).await {
            return Ok(BookingResult::Success);
        }
        if let Some(text) = banner_text(session).await {
            let left_form = matches!(session.find(&Element::SubmitButton).await, Ok(None));
            if left_form || banner_before.as_deref() != Some(text.as_str()) {
                return Err(SubmitFailure::Rejected(text).into());
            }
            unanswered_banner = Some(text);
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_STEP).await;
    }

    let reason = match unanswered_banner {
        Some(text) => format!(
            "checkout page still shows '{}' after {:?}",
            text, timeouts.confirmation
        ),
        None => format!("no confirmation within {:?}", timeouts.confirmation),
    };
    Err(SubmitFailure::Unverified(reason).into())
}

/// Text of the order error banner, if one is showing.
async fn banner_text<S: RemoteSession + ?Sized>(session: &mut S) -> Option<String> {
    let marker = session.find(&Element::OrderError).await.ok().flatten()?;
    Some(
        session
            .read_text(&marker)
            .await
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|_| "failure page shown".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unverified_submit_is_ambiguous() {
        assert!(SubmitFailure::Unverified("timeout".into()).is_ambiguous());
        assert!(!SubmitFailure::Rejected("declined".into()).is_ambiguous());
        assert!(!SubmitFailure::MissingControl.is_ambiguous());
    }

    #[test]
    fn test_payment_error_names_the_field() {
        let e = StepError::PaymentForm {
            field: PaymentField::Cvv,
            reason: "field not found".into(),
        };
        assert_eq!(
            e.to_string(),
            "payment field 'cvv' could not be set: field not found"
        );
    }

    #[test]
    fn test_submit_failure_converts() {
        let e: StepError = SubmitFailure::Rejected("card declined".into()).into();
        assert!(matches!(e, StepError::Submit(SubmitFailure::Rejected(_))));
        assert!(e.to_string().contains("card declined"));
    }
}
