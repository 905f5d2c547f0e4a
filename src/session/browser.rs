//! Chrome-backed session bound to the sponsorship store's markup.

use super::{Element, ElementHandle, RemoteSession, SessionError, SessionResult};
use crate::config::BrowserConfig;
use crate::model::PaymentField;
use crate::Result;
use async_trait::async_trait;
use eoka::{Browser, Page};
use serde::Serialize;
use tracing::debug;

impl From<eoka::Error> for SessionError {
    fn from(e: eoka::Error) -> Self {
        SessionError::Driver(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Driver(format!("script argument encoding: {}", e))
    }
}

/// Product cards on the catalog page and the title used to match a keyword.
const CARD: &str = ".pricing";
const SELECTED_CARD: &str = ".pricing.selected";
const CARD_TITLE: &str = ".pricing-head h3";

/// How an [`Element`] is found in the page. Text filters are lowercase.
#[derive(Debug, Serialize)]
struct Locator<'a> {
    /// Card selector when the element is scoped to the product matching `keyword`.
    card: Option<&'static str>,
    title: Option<&'static str>,
    keyword: Option<&'a str>,
    /// Selector inside the card, or on the whole document when unscoped.
    css: Option<&'static str>,
    text: Option<&'static str>,
    without_text: Option<&'static str>,
    visible: bool,
}

impl<'a> Locator<'a> {
    fn css(css: &'static str) -> Self {
        Self {
            card: None,
            title: None,
            keyword: None,
            css: Some(css),
            text: None,
            without_text: None,
            visible: false,
        }
    }

    fn in_card(card: &'static str, keyword: &'a str, css: Option<&'static str>) -> Self {
        Self {
            card: Some(card),
            title: Some(CARD_TITLE),
            keyword: Some(keyword),
            css,
            text: None,
            without_text: None,
            visible: false,
        }
    }

    fn visible(mut self) -> Self {
        self.visible = true;
        self
    }

    fn with_text(mut self, text: &'static str) -> Self {
        self.text = Some(text);
        self
    }

    fn without_text(mut self, text: &'static str) -> Self {
        self.without_text = Some(text);
        self
    }

    fn for_element(element: &'a Element) -> Self {
        match element {
            Element::LoginEmail => Self::css("#main_content_Login_txtLoginUserName"),
            Element::LoginPassword => {
                Self::css("#main_content_Login_ctlLoginPassword_txtPassword")
            }
            Element::LoginButton => Self::css("#LoginButton"),
            Element::LoginError => Self::css("#main_content_Login_LoginValidationSummary").visible(),
            Element::SignedIn => Self::css("a[href*='logout' i], a[href*='signout' i]"),
            Element::Catalog => Self::css(".products-list"),
            Element::SearchInput => Self::css(".input-group input.form-control"),
            Element::SearchButton => Self::css(".input-group .btn.green"),
            Element::ProductCard(k) => Self::in_card(CARD, k, None),
            Element::SoldOutBadge(k) => Self::in_card(CARD, k, Some(".product-sold-out")),
            Element::AddButton(k) => {
                Self::in_card(CARD, k, Some(".pricing-footer .btn.green")).without_text("checkout")
            }
            Element::ReviewCheckout(k) => {
                Self::in_card(CARD, k, Some("a.btn.green")).with_text("checkout")
            }
            Element::CartEntry(k) => Self::in_card(SELECTED_CARD, k, None),
            Element::CartSoldOutWarning => Self::css(".alert.alert-warning").visible(),
            Element::CartCheckoutButton => Self::css(".btn-cart-checkout"),
            Element::PaymentInput(field) => Self::css(match field {
                PaymentField::NameOnCard => "input[id$='_txtName']",
                PaymentField::CardNumber => "input[id$='_txtCCNumber']",
                PaymentField::Cvv => "input[id$='_txtCVV']",
                PaymentField::ExpiryMonth => "select[id$='_ddlCCExpireMonth']",
                PaymentField::ExpiryYear => "select[id$='_ddlCCExpireYear']",
                PaymentField::BillingZip => "input[id$='_txtCCZip']",
                PaymentField::ConfirmationEmail => "input[id$='_txtCCEmail']",
            }),
            Element::OrderTotal => Self::css("[id$='_lblTotal']"),
            Element::CheckoutValidationError => Self::css(".alert.alert-danger").visible(),
            Element::SubmitButton => Self::css("a.btn.green").with_text("submit your order"),
            Element::OrderConfirmation => {
                Self::css("[id$='_lblOrderNumber'], .alert.alert-success").visible()
            }
            Element::OrderError => Self::css(".alert.alert-danger").visible(),
        }
    }
}

/// Resolve a locator to a CSS path per match.
const LOCATE_JS: &str = r#"((loc) => {
    const cssPath = (el) => {
        const path = [];
        let node = el;
        while (node && node !== document.body && node.nodeType === 1) {
            if (node.id) {
                path.unshift('#' + CSS.escape(node.id));
                return path.join(' > ');
            }
            let selector = node.tagName.toLowerCase();
            const siblings = Array.from(node.parentNode?.children || []);
            if (siblings.length > 1) selector += ':nth-child(' + (siblings.indexOf(node) + 1) + ')';
            path.unshift(selector);
            node = node.parentNode;
        }
        path.unshift('body');
        return path.join(' > ');
    };
    const textOk = (el) => {
        const t = (el.textContent || '').trim().toLowerCase();
        if (loc.text && !t.includes(loc.text)) return false;
        if (loc.without_text && t.includes(loc.without_text)) return false;
        return true;
    };
    const shown = (el) =>
        !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length) &&
        getComputedStyle(el).display !== 'none';
    let roots = [document];
    if (loc.card) {
        const kw = (loc.keyword || '').toLowerCase();
        roots = Array.from(document.querySelectorAll(loc.card)).filter((card) => {
            const title = card.querySelector(loc.title);
            return title && title.textContent.trim().toLowerCase().includes(kw);
        });
    }
    const found = [];
    for (const root of roots) {
        const nodes = loc.css ? Array.from(root.querySelectorAll(loc.css)) : [root];
        for (const el of nodes) {
            if (!textOk(el)) continue;
            if (loc.visible && !shown(el)) continue;
            found.push(cssPath(el));
        }
    }
    return found;
})"#;

/// Click through the DOM so post-back links fire their handlers.
const CLICK_JS: &str = r#"((sel) => {
    const el = document.querySelector(sel);
    if (!el) return false;
    el.click();
    return true;
})"#;

/// Set a value directly and fire the events form validators listen to.
const SET_VALUE_JS: &str = r#"((sel, value) => {
    const el = document.querySelector(sel);
    if (!el) return false;
    el.value = value;
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
})"#;

const SELECT_JS: &str = r#"((sel, value) => {
    const el = document.querySelector(sel);
    if (!el) return 'element_not_found';
    const wanted = String(value).trim();
    const opt = Array.from(el.options).find((o) =>
        o.value === wanted || o.text.trim() === wanted ||
        (/^\d+$/.test(wanted) && /^\d+$/.test(o.value) && Number(o.value) === Number(wanted)));
    if (!opt) return 'option_not_found';
    el.value = opt.value;
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return 'ok';
})"#;

const READ_TEXT_JS: &str = r#"((sel) => {
    const el = document.querySelector(sel);
    return el ? (el.innerText || el.textContent || '').trim() : null;
})"#;

const SCROLL_JS: &str = r#"((sel) => {
    const el = document.querySelector(sel);
    if (!el) return false;
    el.scrollIntoView({ behavior: 'smooth', block: 'center' });
    return true;
})"#;

/// A launched Chrome instance with a single page.
pub struct EokaSession {
    browser: Browser,
    page: Page,
}

impl EokaSession {
    /// Launch Chrome with the given browser options.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Self { browser, page })
    }

    /// Get the underlying page.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Close the browser.
    pub async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }

    async fn locate(&self, element: &Element) -> SessionResult<Vec<String>> {
        let locator = Locator::for_element(element);
        let js = format!("{}({})", LOCATE_JS, serde_json::to_string(&locator)?);
        let found: Vec<String> = self.page.evaluate(&js).await?;
        Ok(found)
    }

    async fn call_bool(&self, script: &str, handle: &ElementHandle) -> SessionResult<()> {
        let js = format!("{}({})", script, serde_json::to_string(handle.as_str())?);
        let ok: bool = self.page.evaluate(&js).await?;
        if ok {
            Ok(())
        } else {
            Err(SessionError::StaleElement(handle.as_str().to_string()))
        }
    }
}

#[async_trait]
impl RemoteSession for EokaSession {
    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        debug!("goto: {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn find(&mut self, element: &Element) -> SessionResult<Option<ElementHandle>> {
        let found = self.locate(element).await?;
        Ok(found.into_iter().next().map(ElementHandle::new))
    }

    async fn count(&mut self, element: &Element) -> SessionResult<usize> {
        Ok(self.locate(element).await?.len())
    }

    async fn click(&mut self, handle: &ElementHandle) -> SessionResult<()> {
        debug!("click: {}", handle.as_str());
        self.call_bool(CLICK_JS, handle).await
    }

    async fn type_text(&mut self, handle: &ElementHandle, text: &str) -> SessionResult<()> {
        let js = format!(
            "{}({}, {})",
            SET_VALUE_JS,
            serde_json::to_string(handle.as_str())?,
            serde_json::to_string(text)?
        );
        let ok: bool = self.page.evaluate(&js).await?;
        if ok {
            Ok(())
        } else {
            Err(SessionError::StaleElement(handle.as_str().to_string()))
        }
    }

    async fn select(&mut self, handle: &ElementHandle, value: &str) -> SessionResult<()> {
        let js = format!(
            "{}({}, {})",
            SELECT_JS,
            serde_json::to_string(handle.as_str())?,
            serde_json::to_string(value)?
        );
        let result: String = self.page.evaluate(&js).await?;
        match result.as_str() {
            "ok" => Ok(()),
            "element_not_found" => Err(SessionError::StaleElement(handle.as_str().to_string())),
            "option_not_found" => Err(SessionError::Driver(format!(
                "no matching option in {}",
                handle.as_str()
            ))),
            other => Err(SessionError::Driver(format!("select failed: {}", other))),
        }
    }

    async fn read_text(&mut self, handle: &ElementHandle) -> SessionResult<String> {
        let js = format!("{}({})", READ_TEXT_JS, serde_json::to_string(handle.as_str())?);
        let text: Option<String> = self.page.evaluate(&js).await?;
        text.ok_or_else(|| SessionError::StaleElement(handle.as_str().to_string()))
    }

    async fn scroll_into_view(&mut self, handle: &ElementHandle) -> SessionResult<()> {
        self.call_bool(SCROLL_JS, handle).await?;
        self.page.wait(200).await;
        Ok(())
    }

    async fn screenshot(&mut self) -> SessionResult<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }
}
