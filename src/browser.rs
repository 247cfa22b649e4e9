//! Headless-Chrome implementation of [`Viewer`] / [`ViewerConnector`].
//!
//! Drives the archive portal over CDP with `chromiumoxide`. Every connection
//! is a separate browser process with its own profile, so no cookie or
//! session state leaks from one item attempt into the next.
//!
//! Element lookups use XPath and are retried at the poll interval until the
//! element timeout; a lookup that never succeeds is reported as
//! [`ViewerError::Timeout`]. Reads used by the page probe (`.scanImage` style,
//! next arrow) are single-shot and report [`ViewerError::NotFound`] so the
//! probe keeps polling.

use crate::config::{Credentials, HarvestConfig};
use crate::error::ViewerError;
use crate::poll::{PollSettings, Poller};
use crate::task::ItemKey;
use crate::viewer::{Viewer, ViewerConnector};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

mod xpath {
    pub const EMAIL: &str = "//label[contains(text(), 'Электронная почта')]/preceding-sibling::input";
    pub const PASSWORD: &str = "//input[@type='password']";
    pub const LOGIN: &str = "//span[text()='Войти']";
    pub const SEARCH_FORM: &str = "//span[text()='Поиск по шифру/заголовку']";
    pub const COLLECTION: &str = "//label[text()='Фонд']/preceding-sibling::input";
    pub const SUB_COLLECTION: &str = "//label[text()='Опись']/preceding-sibling::input";
    pub const ITEM: &str = "//label[text()='Дело']/preceding-sibling::input";
    pub const SEARCH: &str = "//span[text()='Найти']";
    pub const RESULTS: &str = "//div[@class='cipherHeader']/a";
    pub const METADATA: &str = "//div[contains(@class, 'act-data-inner')]";
    pub const SCANS: &str = "//span[text()='Просмотр сканов']/ancestor::button";
    pub const FIRST_PREVIEW: &str =
        "//a[contains(@id, ':0:') and contains(@onclick, 'watermarkPreviewPanel')]";
    pub const NEXT: &str = "//img[contains(@src, 'arrow-right.png')]";
    pub const TIME_LEFT: &str = "//*[@id='form:j_idt539']";
}

const SCAN_IMAGE: &str = ".scanImage";
const TIME_LEFT_PREFIX: &str = "Осталось ";

const JS_CLICK: &str = "function() { this.click(); }";
const JS_INTERACTABLE: &str =
    "function() { return this.offsetParent !== null && !this.disabled; }";

/// Launches one Chrome per [`ViewerConnector::connect`].
#[derive(Debug, Clone)]
pub struct ChromeConnector {
    portal_url: String,
    headless: bool,
    element_poll: PollSettings,
}

impl ChromeConnector {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            portal_url: config.portal_url.clone(),
            headless: config.headless,
            element_poll: config.element_poll(),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, ViewerError> {
        let mut builder = BrowserConfig::builder()
            .arg("--ignore-certificate-errors")
            .arg("--allow-insecure-localhost")
            .arg("--disable-gpu");
        builder = if self.headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };
        builder.build().map_err(ViewerError::Browser)
    }
}

#[async_trait]
impl ViewerConnector for ChromeConnector {
    async fn connect(&self) -> Result<Box<dyn Viewer>, ViewerError> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| ViewerError::Browser(format!("launch: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    trace!("CDP handler: {e}");
                }
            }
        });

        let page = match browser.new_page(self.portal_url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(ViewerError::Browser(format!(
                    "open {}: {e}",
                    self.portal_url
                )));
            }
        };
        debug!(url = %self.portal_url, "Portal opened");

        Ok(Box::new(ChromeViewer {
            browser,
            handler,
            page,
            element_poll: self.element_poll,
        }))
    }
}

/// One browser session on the portal.
pub struct ChromeViewer {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    element_poll: PollSettings,
}

impl ChromeViewer {
    /// Poll for the first match of `xpath` until the element timeout.
    async fn wait_for(&self, xpath: &str) -> Result<Element, ViewerError> {
        let mut poller = Poller::new(self.element_poll, None);
        loop {
            if let Ok(element) = self.page.find_xpath(xpath).await {
                return Ok(element);
            }
            if !poller.tick().await {
                return Err(ViewerError::Timeout {
                    what: xpath.to_string(),
                    ms: self.element_poll.ceiling_ms(),
                });
            }
        }
    }

    async fn wait_and_click(&self, xpath: &str) -> Result<(), ViewerError> {
        let element = self.wait_for(xpath).await?;
        element.click().await.map_err(|e| stale(xpath, e))?;
        Ok(())
    }

    async fn wait_and_type(&self, xpath: &str, text: &str) -> Result<(), ViewerError> {
        let element = self.wait_for(xpath).await?;
        element.click().await.map_err(|e| stale(xpath, e))?;
        element.type_str(text).await.map_err(|e| stale(xpath, e))?;
        Ok(())
    }

    /// All current matches of `RESULTS`, waiting until at least one shows.
    async fn search_results(&self) -> Vec<Element> {
        let mut poller = Poller::new(self.element_poll, None);
        loop {
            match self.page.find_xpaths(xpath::RESULTS).await {
                Ok(found) if !found.is_empty() => return found,
                _ => {}
            }
            if !poller.tick().await {
                return Vec::new();
            }
        }
    }
}

/// A handle that stopped working between lookup and use.
fn stale(what: &str, e: chromiumoxide::error::CdpError) -> ViewerError {
    ViewerError::StaleHandle {
        what: format!("{what}: {e}"),
    }
}

#[async_trait]
impl Viewer for ChromeViewer {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), ViewerError> {
        self.wait_and_type(xpath::EMAIL, &credentials.email).await?;
        self.wait_and_type(xpath::PASSWORD, &credentials.password)
            .await?;
        self.wait_and_click(xpath::LOGIN).await?;
        // the search link only renders for a logged-in session
        self.wait_for(xpath::SEARCH_FORM).await?;
        debug!("Logged in");
        Ok(())
    }

    async fn locate(&mut self, key: &ItemKey) -> Result<(), ViewerError> {
        self.wait_and_click(xpath::SEARCH_FORM).await?;
        self.wait_and_type(xpath::COLLECTION, &key.collection).await?;
        self.wait_and_type(xpath::SUB_COLLECTION, &key.sub_collection)
            .await?;
        self.wait_and_type(xpath::ITEM, &key.item).await?;
        self.wait_and_click(xpath::SEARCH).await?;

        let found = self.search_results().await.len();
        if found != 1 {
            return Err(ViewerError::NotUnique {
                key: key.to_string(),
                found,
            });
        }
        debug!(item = %key, "Search matched one item");
        Ok(())
    }

    async fn metadata_text(&mut self) -> Result<String, ViewerError> {
        let block = self.wait_for(xpath::METADATA).await?;
        block
            .inner_text()
            .await
            .map_err(|e| stale(xpath::METADATA, e))?
            .ok_or_else(|| ViewerError::not_found(xpath::METADATA))
    }

    async fn open_viewer(&mut self) -> Result<(), ViewerError> {
        self.wait_and_click(&format!("({})[1]", xpath::RESULTS))
            .await?;
        self.wait_and_click(xpath::SCANS).await?;
        let preview = self.wait_for(xpath::FIRST_PREVIEW).await?;
        preview
            .call_js_fn(JS_CLICK, false)
            .await
            .map_err(|e| stale(xpath::FIRST_PREVIEW, e))?;
        Ok(())
    }

    async fn presentation_state(&mut self) -> Result<String, ViewerError> {
        let image = self
            .page
            .find_element(SCAN_IMAGE)
            .await
            .map_err(|_| ViewerError::not_found(SCAN_IMAGE))?;
        image
            .attribute("style")
            .await
            .map_err(|e| stale(SCAN_IMAGE, e))?
            .ok_or_else(|| ViewerError::not_found("style of .scanImage"))
    }

    async fn try_advance(&mut self) -> Result<bool, ViewerError> {
        let next = self
            .page
            .find_xpath(xpath::NEXT)
            .await
            .map_err(|_| ViewerError::not_found(xpath::NEXT))?;
        let ready = next
            .call_js_fn(JS_INTERACTABLE, false)
            .await
            .map_err(|e| stale(xpath::NEXT, e))?
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !ready {
            return Ok(false);
        }
        next.call_js_fn(JS_CLICK, false)
            .await
            .map_err(|e| stale(xpath::NEXT, e))?;
        Ok(true)
    }

    async fn session_time_left(&mut self) -> Option<String> {
        let label = self.page.find_xpath(xpath::TIME_LEFT).await.ok()?;
        let raw = label.inner_text().await.ok()??;
        let raw = raw.trim();
        let left = raw.strip_prefix(TIME_LEFT_PREFIX).unwrap_or(raw).trim();
        (!left.is_empty()).then(|| left.to_string())
    }

    async fn close(self: Box<Self>) -> Result<(), ViewerError> {
        let ChromeViewer {
            mut browser,
            handler,
            page,
            ..
        } = *self;
        drop(page);
        let result = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!("Browser did not exit cleanly: {e}");
        }
        handler.abort();
        result
            .map(|_| ())
            .map_err(|e| ViewerError::Browser(format!("close: {e}")))
    }
}
