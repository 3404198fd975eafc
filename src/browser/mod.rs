//! Browser automation seam
//!
//! The crawl never talks to a browser directly; it drives a [`BrowserSession`]
//! through a handful of primitives (navigate, wait, find, click, read). Element
//! handles are plain values that are re-resolved on every use, so a page's
//! download links can be handed to concurrent workers.

#[cfg(feature = "chromium")]
mod chromium;
#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(feature = "chromium")]
pub use chromium::{ChromiumLauncher, ChromiumSession};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// How to locate elements on the current page
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locator {
    /// XPath 1.0 expression
    XPath(String),
    /// CSS selector
    Css(String),
}

impl Locator {
    /// XPath locator
    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    /// The raw selector text
    pub fn as_str(&self) -> &str {
        match self {
            Locator::XPath(s) | Locator::Css(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::XPath(s) => write!(f, "xpath:{s}"),
            Locator::Css(s) => write!(f, "css:{s}"),
        }
    }
}

/// The `index`-th element matched by `locator`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementRef {
    /// Locator the element was found with
    pub locator: Locator,
    /// Position among the locator's matches (0-based)
    pub index: usize,
}

impl ElementRef {
    /// Handle for one match of a locator
    pub fn new(locator: Locator, index: usize) -> Self {
        Self { locator, index }
    }
}

/// One live browser page
///
/// Implementations must tolerate concurrent `click` calls from download
/// workers; navigation is only ever driven by one caller at a time.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` in the current page
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Every element currently matching `locator`
    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>>;

    /// Visible text of an element
    async fn text(&self, element: &ElementRef) -> Result<String>;

    /// Attribute value of an element
    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>>;

    /// Scroll an element into view and click it
    async fn click(&self, element: &ElementRef) -> Result<()>;

    /// Serialized DOM of the current page
    async fn page_source(&self) -> Result<String>;

    /// Release the browser
    async fn shutdown(&self) -> Result<()>;

    /// First element matching `locator`
    async fn find(&self, locator: &Locator) -> Result<ElementRef> {
        self.find_all(locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::navigation(format!("find {locator}"), "no matching element"))
    }

    /// Wait until at least one element matches `locator`
    async fn wait_until(
        &self,
        locator: &Locator,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            // Lookup errors while the page is still loading count as "not yet"
            if let Ok(found) = self.find_all(locator).await
                && !found.is_empty()
            {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::navigation(
                    format!("wait for {locator}"),
                    format!("not present after {timeout:?}"),
                ));
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}

/// Starts browser sessions whose downloads land in a given directory
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Start a session downloading into `download_dir`
    async fn launch(&self, download_dir: &Path) -> Result<Box<dyn BrowserSession>>;
}
