//! In-memory stand-in for the member site.
//!
//! The scripted page moves between login, catalog, cart, payment and result
//! pages as the workflow clicks through it, so steps observe the same
//! sequence of elements they would on the real site.

#![allow(dead_code)]

use async_trait::async_trait;
use sponsor_catcher::{
    AvailabilityState, Credentials, Element, ElementHandle, PaymentDetails, PaymentField,
    RemoteSession, RunConfig, SearchSpec, SessionError, SiteConfig, Timeouts,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

pub const KEYWORD: &str = "Attendee Giveaways";

pub fn run_config(monitoring: bool, auto_submit: bool) -> RunConfig {
    RunConfig {
        site: SiteConfig {
            login_url: "https://site.test/login".into(),
            catalog_url: "https://site.test/catalog".into(),
        },
        credentials: Credentials {
            email: "jane@example.com".into(),
            password: "hunter2".into(),
        },
        search: SearchSpec::new(KEYWORD),
        payment: PaymentDetails {
            name_on_card: "Jane Doe".into(),
            card_number: "4111111111111111".into(),
            cvv: "123".into(),
            exp_month: "12".into(),
            exp_year: "2027".into(),
            billing_zip: "30301".into(),
            confirmation_email: "jane@example.com".into(),
        },
        monitoring_enabled: monitoring,
        poll_interval: Duration::from_secs(5),
        auto_submit,
        timeouts: Timeouts {
            page: Duration::from_secs(10),
            element: Duration::from_secs(3),
            confirmation: Duration::from_secs(15),
            settle: Duration::ZERO,
        },
        failure_screenshot: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Confirmed,
    /// The confirmation page appears only after the given delay.
    ConfirmedAfter(Duration),
    Rejected(String),
    /// The page shows neither confirmation nor error.
    Silent,
    /// The click itself reports a driver error; the page stays put.
    ClickError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Blank,
    Login,
    LoginFailed,
    Home,
    Catalog,
    Cart,
    Payment,
    Confirmation,
    Rejected,
}

pub struct ScriptedSession {
    // Script
    login_ok: bool,
    reads: VecDeque<AvailabilityState>,
    last_read: AvailabilityState,
    cart_added_per_click: usize,
    cart_sold_out: bool,
    missing_fields: HashSet<PaymentField>,
    missing_submit: bool,
    banner: Option<String>,
    submit_outcome: SubmitOutcome,
    on_add: Option<Box<dyn Fn() + Send>>,

    // Page state
    page: Page,
    searched: bool,
    current: AvailabilityState,
    cart_entries: usize,
    confirm_at: Option<Instant>,
    handles: HashMap<String, Element>,

    // Observations
    pub log: Vec<String>,
    pub search_times: Vec<Instant>,
    pub add_clicks: usize,
    pub submit_clicks: usize,
    pub typed: Vec<(PaymentField, String)>,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self {
            login_ok: true,
            reads: VecDeque::new(),
            last_read: AvailabilityState::Available,
            cart_added_per_click: 1,
            cart_sold_out: false,
            missing_fields: HashSet::new(),
            missing_submit: false,
            banner: None,
            submit_outcome: SubmitOutcome::Confirmed,
            on_add: None,
            page: Page::Blank,
            searched: false,
            current: AvailabilityState::Unknown,
            cart_entries: 0,
            confirm_at: None,
            handles: HashMap::new(),
            log: Vec::new(),
            search_times: Vec::new(),
            add_clicks: 0,
            submit_clicks: 0,
            typed: Vec::new(),
        }
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Availability per search, in order. The last entry repeats once exhausted.
    pub fn with_reads(mut self, reads: &[AvailabilityState]) -> Self {
        self.reads = reads.iter().copied().collect();
        if let Some(last) = reads.last() {
            self.last_read = *last;
        }
        self
    }

    pub fn with_failed_login(mut self) -> Self {
        self.login_ok = false;
        self
    }

    pub fn with_cart_added_per_click(mut self, n: usize) -> Self {
        self.cart_added_per_click = n;
        self
    }

    pub fn with_item_in_cart(mut self) -> Self {
        self.cart_entries = 1;
        self
    }

    pub fn with_cart_sold_out(mut self) -> Self {
        self.cart_sold_out = true;
        self
    }

    pub fn without_field(mut self, field: PaymentField) -> Self {
        self.missing_fields.insert(field);
        self
    }

    pub fn without_submit_button(mut self) -> Self {
        self.missing_submit = true;
        self
    }

    /// Show an error banner on the checkout page from the moment it loads.
    pub fn with_validation_banner(mut self, text: &str) -> Self {
        self.banner = Some(text.to_string());
        self
    }

    pub fn with_submit(mut self, outcome: SubmitOutcome) -> Self {
        self.submit_outcome = outcome;
        self
    }

    /// Run `f` when the add-to-cart control is clicked.
    pub fn on_add_to_cart(mut self, f: impl Fn() + Send + 'static) -> Self {
        self.on_add = Some(Box::new(f));
        self
    }

    pub fn searches(&self) -> usize {
        self.search_times.len()
    }

    pub fn clicked(&self, what: &str) -> bool {
        self.log.iter().any(|l| l == &format!("click {}", what))
    }

    fn page(&self) -> Page {
        match self.confirm_at {
            Some(at) if Instant::now() >= at => Page::Confirmation,
            _ => self.page,
        }
    }

    fn present(&self, element: &Element) -> usize {
        let page = self.page();
        let on_banner = page == Page::Payment && self.banner.is_some();
        let on_results = page == Page::Catalog && self.searched;
        let visible = match element {
            Element::LoginEmail | Element::LoginPassword | Element::LoginButton => {
                page == Page::Login
            }
            Element::LoginError => page == Page::LoginFailed,
            Element::SignedIn => !matches!(
                page,
                Page::Blank | Page::Login | Page::LoginFailed
            ),
            Element::Catalog | Element::SearchInput | Element::SearchButton => {
                page == Page::Catalog
            }
            Element::ProductCard(k) => {
                on_results && k == KEYWORD && self.current != AvailabilityState::Error
            }
            Element::SoldOutBadge(k) => {
                on_results && k == KEYWORD && self.current == AvailabilityState::SoldOut
            }
            Element::AddButton(k) => {
                on_results && k == KEYWORD && self.current == AvailabilityState::Available
            }
            Element::CartEntry(k) => {
                return if page == Page::Catalog && k == KEYWORD {
                    self.cart_entries
                } else {
                    0
                };
            }
            Element::ReviewCheckout(k) => {
                page == Page::Catalog && k == KEYWORD && self.cart_entries > 0
            }
            Element::CartSoldOutWarning => page == Page::Cart && self.cart_sold_out,
            Element::CartCheckoutButton => page == Page::Cart,
            Element::PaymentInput(field) => {
                page == Page::Payment && !self.missing_fields.contains(field)
            }
            Element::OrderTotal => page == Page::Payment,
            Element::CheckoutValidationError => on_banner,
            Element::SubmitButton => page == Page::Payment && !self.missing_submit,
            Element::OrderConfirmation => page == Page::Confirmation,
            Element::OrderError => page == Page::Rejected || on_banner,
        };
        usize::from(visible)
    }

    fn resolve(&self, handle: &ElementHandle) -> Result<Element, SessionError> {
        self.handles
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| SessionError::StaleElement(handle.as_str().to_string()))
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.log.push(format!("navigate {}", url));
        self.searched = false;
        self.page = match url {
            "https://site.test/login" => Page::Login,
            "https://site.test/catalog" => Page::Catalog,
            other => return Err(SessionError::Driver(format!("unknown url {}", other))),
        };
        Ok(())
    }

    async fn find(&mut self, element: &Element) -> Result<Option<ElementHandle>, SessionError> {
        if self.present(element) == 0 {
            return Ok(None);
        }
        let id = format!("{:?}", element);
        self.handles.insert(id.clone(), element.clone());
        Ok(Some(ElementHandle::new(id)))
    }

    async fn count(&mut self, element: &Element) -> Result<usize, SessionError> {
        Ok(self.present(element))
    }

    async fn click(&mut self, handle: &ElementHandle) -> Result<(), SessionError> {
        let element = self.resolve(handle)?;
        self.log.push(format!("click {}", element));
        match element {
            Element::LoginButton => {
                self.page = if self.login_ok {
                    Page::Home
                } else {
                    Page::LoginFailed
                };
            }
            Element::SearchButton => {
                self.searched = true;
                self.current = self.reads.pop_front().unwrap_or(self.last_read);
                self.search_times.push(Instant::now());
            }
            Element::AddButton(_) => {
                self.add_clicks += 1;
                self.cart_entries += self.cart_added_per_click;
                if let Some(ref f) = self.on_add {
                    f();
                }
            }
            Element::ReviewCheckout(_) => self.page = Page::Cart,
            Element::CartCheckoutButton => self.page = Page::Payment,
            Element::SubmitButton => {
                self.submit_clicks += 1;
                match self.submit_outcome {
                    SubmitOutcome::Confirmed => self.page = Page::Confirmation,
                    SubmitOutcome::ConfirmedAfter(delay) => {
                        self.confirm_at = Some(Instant::now() + delay)
                    }
                    SubmitOutcome::Rejected(_) => self.page = Page::Rejected,
                    SubmitOutcome::Silent => {}
                    SubmitOutcome::ClickError => {
                        return Err(SessionError::Driver("target closed".into()))
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn type_text(&mut self, handle: &ElementHandle, text: &str) -> Result<(), SessionError> {
        if let Element::PaymentInput(field) = self.resolve(handle)? {
            self.typed.push((field, text.to_string()));
        }
        Ok(())
    }

    async fn select(&mut self, handle: &ElementHandle, value: &str) -> Result<(), SessionError> {
        self.type_text(handle, value).await
    }

    async fn read_text(&mut self, handle: &ElementHandle) -> Result<String, SessionError> {
        Ok(match self.resolve(handle)? {
            Element::LoginError => "Invalid user name or password.".into(),
            Element::CartSoldOutWarning => "This item is sold out.".into(),
            Element::OrderTotal => "$500.00".into(),
            Element::OrderError | Element::CheckoutValidationError => {
                match (&self.submit_outcome, self.page()) {
                    (SubmitOutcome::Rejected(message), Page::Rejected) => message.clone(),
                    _ => self.banner.clone().unwrap_or_default(),
                }
            }
            _ => String::new(),
        })
    }

    async fn scroll_into_view(&mut self, handle: &ElementHandle) -> Result<(), SessionError> {
        let element = self.resolve(handle)?;
        self.log.push(format!("scroll {}", element));
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, SessionError> {
        Ok(Vec::new())
    }
}
