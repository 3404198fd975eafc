//! Scripted catalog site for crawl, batch and download tests
//!
//! Interprets the XPath locators the crawler builds from a
//! [`CatalogSelectors`] and simulates browser downloads by writing files into
//! the staging directory from background tasks.

use super::{BrowserSession, ElementRef, Locator, SessionLauncher};
use crate::config::CatalogSelectors;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// What a simulated download click does
#[derive(Clone, Debug)]
pub(crate) enum ClickAction {
    /// Write `file` into staging after `after`
    Deliver { file: String, after: Duration },
    /// Write `file`, then delete it `remove_after` later (scanner quarantine)
    DeliverThenRemove {
        file: String,
        after: Duration,
        remove_after: Duration,
    },
    /// Accept the click, never produce a file
    Ignore,
    /// Reject the click
    Fail(String),
    /// Panic inside the click
    Panic,
}

/// Which link is being clicked, and how many times it has been clicked
#[derive(Clone, Debug)]
pub(crate) struct ClickContext {
    pub year: String,
    pub page: u32,
    /// 1-based link position on the page
    pub index: usize,
    /// 1-based click count for this link
    pub attempt: u32,
}

type ClickScript = dyn Fn(&ClickContext) -> ClickAction + Send + Sync;

/// A category link on a year's page, leading to a paginated listing
#[derive(Clone, Debug)]
pub(crate) struct FakeListing {
    pub class: String,
    pub text: String,
    pub href: String,
    pub total_pages: u32,
    pub links_per_page: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct FakeYear {
    pub label: String,
    pub listings: Vec<FakeListing>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Location {
    Blank,
    Root { selected_year: Option<String> },
    Listing { year: String, listing: usize, page: u32 },
}

#[derive(Debug, Default)]
pub(crate) struct Record {
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub download_clicks: HashMap<(String, u32, usize), u32>,
    pub shutdown_calls: u32,
}

struct State {
    location: Location,
    record: Record,
}

/// Fake catalog site implementing [`BrowserSession`]
pub(crate) struct FakeCatalog {
    root_url: String,
    selectors: CatalogSelectors,
    year_suffix: String,
    mesh_value: Option<String>,
    years: Vec<FakeYear>,
    staging: PathBuf,
    state: Mutex<State>,
    on_download: Arc<ClickScript>,
    pub ready_fails_for: HashSet<String>,
    pub mesh_click_fails: bool,
    pub unreachable_pages: HashSet<u32>,
}

impl FakeCatalog {
    pub fn new(root_url: &str, selectors: CatalogSelectors, staging: PathBuf) -> Self {
        Self {
            root_url: root_url.to_string(),
            selectors,
            year_suffix: "年".into(),
            mesh_value: None,
            years: Vec::new(),
            staging,
            state: Mutex::new(State {
                location: Location::Blank,
                record: Record::default(),
            }),
            on_download: Arc::new(|ctx: &ClickContext| ClickAction::Deliver {
                file: format!("{}_p{}_{}.zip", ctx.year, ctx.page, ctx.index),
                after: Duration::from_millis(20),
            }),
            ready_fails_for: HashSet::new(),
            mesh_click_fails: false,
            unreachable_pages: HashSet::new(),
        }
    }

    /// Start on a listing page (for batch and task tests that skip navigation)
    pub fn on_listing(mut self, year: &str, links_per_page: usize) -> Self {
        self.years.push(FakeYear {
            label: format!("{year}年"),
            listings: vec![FakeListing {
                class: "stat-title-anchor".into(),
                text: "listing".into(),
                href: format!("https://catalog.test/list?year={year}"),
                total_pages: 1,
                links_per_page,
            }],
        });
        self.state_mut().location = Location::Listing {
            year: year.to_string(),
            listing: 0,
            page: 1,
        };
        self
    }

    pub fn with_year(mut self, year: FakeYear) -> Self {
        self.years.push(year);
        self
    }

    pub fn with_mesh_value(mut self, value: &str) -> Self {
        self.mesh_value = Some(value.to_string());
        self
    }

    pub fn with_download_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&ClickContext) -> ClickAction + Send + Sync + 'static,
    {
        self.on_download = Arc::new(script);
        self
    }

    fn state_mut(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state_mut().record.navigations.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state_mut().record.clicks.clone()
    }

    pub fn download_clicks(&self, year: &str, page: u32, index: usize) -> u32 {
        self.state_mut()
            .record
            .download_clicks
            .get(&(year.to_string(), page, index))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_download_clicks(&self) -> u32 {
        self.state_mut().record.download_clicks.values().sum()
    }

    pub fn shutdown_calls(&self) -> u32 {
        self.state_mut().record.shutdown_calls
    }

    fn year_label(&self, year: &FakeYear) -> String {
        year.label.trim_end_matches(self.year_suffix.as_str()).to_string()
    }

    fn listing(&self, year: &str, listing: usize) -> Option<&FakeListing> {
        self.years
            .iter()
            .find(|y| self.year_label(y) == year)
            .and_then(|y| y.listings.get(listing))
    }

    /// Number of elements `locator` matches at the current location
    fn count(&self, locator: &Locator) -> usize {
        let expr = locator.as_str();
        let location = self.state_mut().location.clone();
        let s = &self.selectors;

        match &location {
            Location::Blank => 0,
            Location::Root { selected_year } => {
                if expr == s.page_ready {
                    return match selected_year {
                        Some(year) if self.ready_fails_for.contains(year) => 0,
                        _ => 1,
                    };
                }
                if expr == s.year_labels {
                    return self.years.len();
                }
                if self
                    .years
                    .iter()
                    .any(|y| expr == s.year_option.replace("{label}", &y.label))
                {
                    return 1;
                }
                if let Some(value) = &self.mesh_value
                    && selected_year.is_some()
                    && expr == s.mesh_filter.replace("{value}", value)
                {
                    return 1;
                }
                match selected_year {
                    Some(year) => self.matching_links(year, expr).len(),
                    None => 0,
                }
            }
            Location::Listing { year, listing, .. } => {
                let Some(current) = self.listing(year, *listing) else {
                    return 0;
                };
                if expr == s.page_ready || expr == s.result_list || expr == s.last_page {
                    return 1;
                }
                if expr == s.download_links {
                    return current.links_per_page;
                }
                (1..=current.total_pages)
                    .filter(|n| !self.unreachable_pages.contains(n))
                    .any(|n| expr == s.page_button.replace("{page}", &n.to_string()))
                    as usize
            }
        }
    }

    fn matching_links(&self, year: &str, expr: &str) -> Vec<usize> {
        static CONTAINS: OnceLock<Regex> = OnceLock::new();
        let re = CONTAINS.get_or_init(|| {
            Regex::new(r"contains\((text\(\)|@href|@class),\s*'([^']*)'\)")
                .unwrap_or_else(|e| panic!("bad regex: {e}"))
        });
        if !expr.starts_with("//a[") {
            return Vec::new();
        }
        let conditions: Vec<(String, String)> = re
            .captures_iter(expr)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        let Some(entry) = self.years.iter().find(|y| self.year_label(y) == year) else {
            return Vec::new();
        };
        entry
            .listings
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                conditions.iter().all(|(field, needle)| match field.as_str() {
                    "text()" => l.text.contains(needle.as_str()),
                    "@href" => l.href.contains(needle.as_str()),
                    _ => l.class.contains(needle.as_str()),
                })
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn spawn_download(&self, action: ClickAction) {
        let staging = self.staging.clone();
        tokio::spawn(async move {
            match action {
                ClickAction::Deliver { file, after } => {
                    tokio::time::sleep(after).await;
                    let _ = tokio::fs::write(staging.join(file), b"PK\x05\x06").await;
                }
                ClickAction::DeliverThenRemove {
                    file,
                    after,
                    remove_after,
                } => {
                    tokio::time::sleep(after).await;
                    let path = staging.join(file);
                    let _ = tokio::fs::write(&path, b"PK\x05\x06").await;
                    tokio::time::sleep(remove_after).await;
                    let _ = tokio::fs::remove_file(&path).await;
                }
                ClickAction::Ignore | ClickAction::Fail(_) | ClickAction::Panic => {}
            }
        });
    }
}

#[async_trait]
impl BrowserSession for FakeCatalog {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state_mut();
        state.record.navigations.push(url.to_string());
        if url == self.root_url {
            state.location = Location::Root {
                selected_year: None,
            };
            return Ok(());
        }
        for year in &self.years {
            for (i, listing) in year.listings.iter().enumerate() {
                if listing.href == url {
                    state.location = Location::Listing {
                        year: self.year_label(year),
                        listing: i,
                        page: 1,
                    };
                    return Ok(());
                }
            }
        }
        Err(Error::navigation(format!("navigate to {url}"), "404"))
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>> {
        Ok((0..self.count(locator))
            .map(|i| ElementRef::new(locator.clone(), i))
            .collect())
    }

    async fn text(&self, element: &ElementRef) -> Result<String> {
        if element.locator.as_str() == self.selectors.year_labels {
            return self
                .years
                .get(element.index)
                .map(|y| y.label.clone())
                .ok_or_else(|| Error::navigation("read year label", "stale element"));
        }
        Ok(String::new())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let location = self.state_mut().location.clone();
        match location {
            Location::Root {
                selected_year: Some(year),
            } if name == "href" => {
                let matches = self.matching_links(&year, element.locator.as_str());
                Ok(matches
                    .get(element.index)
                    .and_then(|i| self.listing(&year, *i))
                    .map(|l| l.href.clone()))
            }
            Location::Listing { year, listing, .. }
                if element.locator.as_str() == self.selectors.last_page
                    && name == self.selectors.page_count_attribute =>
            {
                Ok(self
                    .listing(&year, listing)
                    .map(|l| l.total_pages.to_string()))
            }
            _ => Ok(None),
        }
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        if self.count(&element.locator) <= element.index {
            return Err(Error::navigation(
                format!("click {}", element.locator),
                "element not found",
            ));
        }
        let expr = element.locator.as_str().to_string();
        let s = &self.selectors;

        let download_ctx = {
            let mut state = self.state_mut();
            state.record.clicks.push(expr.clone());

            match state.location.clone() {
                Location::Root { .. } => {
                    if let Some(year) = self
                        .years
                        .iter()
                        .find(|y| expr == s.year_option.replace("{label}", &y.label))
                    {
                        state.location = Location::Root {
                            selected_year: Some(self.year_label(year)),
                        };
                        return Ok(());
                    }
                    let is_mesh = self
                        .mesh_value
                        .as_ref()
                        .is_some_and(|v| expr == s.mesh_filter.replace("{value}", v));
                    if is_mesh && self.mesh_click_fails {
                        return Err(Error::navigation("expand mesh filter", "not clickable"));
                    }
                    return Ok(());
                }
                Location::Listing {
                    year,
                    listing,
                    page,
                } => {
                    if expr == s.download_links {
                        let key = (year.clone(), page, element.index + 1);
                        let attempt = {
                            let counter = state.record.download_clicks.entry(key).or_insert(0);
                            *counter += 1;
                            *counter
                        };
                        ClickContext {
                            year,
                            page,
                            index: element.index + 1,
                            attempt,
                        }
                    } else {
                        let total = self
                            .listing(&year, listing)
                            .map(|l| l.total_pages)
                            .unwrap_or(1);
                        if let Some(n) = (1..=total)
                            .find(|n| expr == s.page_button.replace("{page}", &n.to_string()))
                        {
                            state.location = Location::Listing {
                                year,
                                listing,
                                page: n,
                            };
                        }
                        return Ok(());
                    }
                }
                Location::Blank => return Ok(()),
            }
        };

        match (self.on_download)(&download_ctx) {
            ClickAction::Fail(reason) => Err(Error::navigation("click download link", reason)),
            ClickAction::Panic => panic!("simulated click panic"),
            action => {
                self.spawn_download(action);
                Ok(())
            }
        }
    }

    async fn page_source(&self) -> Result<String> {
        Ok(format!("<html><!-- {:?} --></html>", self.state_mut().location))
    }

    async fn shutdown(&self) -> Result<()> {
        self.state_mut().record.shutdown_calls += 1;
        Ok(())
    }
}

/// Session handle sharing a [`FakeCatalog`] with the test
pub(crate) struct SharedCatalog(pub Arc<FakeCatalog>);

#[async_trait]
impl BrowserSession for SharedCatalog {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.0.navigate(url).await
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>> {
        self.0.find_all(locator).await
    }

    async fn text(&self, element: &ElementRef) -> Result<String> {
        self.0.text(element).await
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        self.0.attribute(element, name).await
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        self.0.click(element).await
    }

    async fn page_source(&self) -> Result<String> {
        self.0.page_source().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.0.shutdown().await
    }
}

/// Launcher handing out the shared fake catalog, or failing to start
pub(crate) struct FakeLauncher {
    pub catalog: Arc<FakeCatalog>,
    pub fail: bool,
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self, _download_dir: &std::path::Path) -> Result<Box<dyn BrowserSession>> {
        if self.fail {
            return Err(Error::Browser("no browser available".into()));
        }
        Ok(Box::new(SharedCatalog(Arc::clone(&self.catalog))))
    }
}
