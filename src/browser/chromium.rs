//! Headless Chrome backend over the DevTools protocol

use super::{BrowserSession, ElementRef, Locator, SessionLauncher};
use crate::config::BrowserConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::Path;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn cdp_error(e: impl std::fmt::Display) -> Error {
    Error::Browser(e.to_string())
}

/// Launches Chrome with downloads redirected to the staging directory
pub struct ChromiumLauncher {
    config: BrowserConfig,
}

impl ChromiumLauncher {
    /// Launcher using the given browser settings
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self, download_dir: &Path) -> Result<Box<dyn BrowserSession>> {
        // Chrome resolves relative download paths against its own cwd
        let download_dir = std::fs::canonicalize(download_dir)?;

        let mut builder = CdpBrowserConfig::builder();
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.config.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        let cdp_config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(cdp_config).await.map_err(cdp_error)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
        });

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().into_owned())
            .build()
            .map_err(Error::Browser)?;
        browser.execute(params).await.map_err(cdp_error)?;

        let page = browser.new_page("about:blank").await.map_err(cdp_error)?;

        info!(?download_dir, headless = self.config.headless, "browser session started");

        Ok(Box::new(ChromiumSession {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task: Mutex::new(Some(handler_task)),
        }))
    }
}

/// A single Chrome tab driven over CDP
pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumSession {
    async fn resolve_all(&self, locator: &Locator) -> Result<Vec<Element>> {
        match locator {
            Locator::XPath(expr) => self.page.find_xpaths(expr.as_str()).await,
            Locator::Css(selector) => self.page.find_elements(selector.as_str()).await,
        }
        .map_err(cdp_error)
    }

    async fn resolve(&self, element: &ElementRef) -> Result<Element> {
        let mut found = self.resolve_all(&element.locator).await?;
        if element.index < found.len() {
            Ok(found.swap_remove(element.index))
        } else {
            Err(Error::navigation(
                format!("resolve {} #{}", element.locator, element.index),
                format!("only {} matching elements", found.len()),
            ))
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!(url, "navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| Error::navigation(format!("navigate to {url}"), e))?;
        Ok(())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>> {
        let count = self.resolve_all(locator).await?.len();
        Ok((0..count)
            .map(|index| ElementRef::new(locator.clone(), index))
            .collect())
    }

    async fn text(&self, element: &ElementRef) -> Result<String> {
        let resolved = self.resolve(element).await?;
        Ok(resolved
            .inner_text()
            .await
            .map_err(cdp_error)?
            .unwrap_or_default())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let resolved = self.resolve(element).await?;
        resolved.attribute(name).await.map_err(cdp_error)
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        let resolved = self.resolve(element).await?;
        resolved.scroll_into_view().await.map_err(cdp_error)?;
        resolved
            .click()
            .await
            .map_err(|e| Error::navigation(format!("click {}", element.locator), e))?;
        Ok(())
    }

    async fn page_source(&self) -> Result<String> {
        self.page.content().await.map_err(cdp_error)
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };

        let closed = browser.close().await.map_err(cdp_error);
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "browser process did not exit cleanly");
        }
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
        info!("browser session closed");
        closed.map(|_| ())
    }
}
