//! Catalog page operations: one method per UI step of the crawl

use super::Crawler;
use crate::browser::Locator;
use crate::error::{Error, Result};
use crate::types::{CatalogYear, DownloadLink};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn year_pattern() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"\d{4}").unwrap_or_else(|e| panic!("invalid year regex: {e}")))
}

/// Four-digit year inside a year label ("2020年" → "2020")
pub fn parse_year_label(label: &str) -> Option<String> {
    year_pattern().find(label).map(|m| m.as_str().to_string())
}

impl Crawler<'_> {
    fn locator(&self, template: &str, placeholder: &str, value: &str) -> Locator {
        Locator::xpath(template.replace(placeholder, value))
    }

    /// Load the catalog root and wait for it to render
    pub(crate) async fn open_root(&self) -> Result<()> {
        self.session.navigate(&self.dataset.catalog_url).await?;
        self.session
            .wait_until(
                &Locator::xpath(&self.dataset.selectors.page_ready),
                self.config.browser.page_load_timeout,
                self.config.browser.wait_poll,
            )
            .await
    }

    /// Years listed on the root page that the dataset wants, in page order
    pub(crate) async fn enumerate_years(&self) -> Result<Vec<CatalogYear>> {
        let labels = self
            .session
            .find_all(&Locator::xpath(&self.dataset.selectors.year_labels))
            .await?;

        let mut years: Vec<CatalogYear> = Vec::new();
        for element in labels {
            let label = self.session.text(&element).await?.trim().to_string();
            if !label.contains(self.dataset.year_label_suffix.as_str()) {
                continue;
            }
            let Some(year) = parse_year_label(&label) else {
                debug!(%label, "year label without a four-digit year");
                continue;
            };
            if !self.dataset.wants_year(&year) {
                debug!(%year, "year not in allow-list");
                continue;
            }
            if years.iter().any(|y| y.year == year) {
                continue;
            }
            years.push(CatalogYear { year, label });
        }
        Ok(years)
    }

    /// Click a year's label and wait for the page to settle
    pub(crate) async fn select_year(&self, year: &CatalogYear) -> Result<()> {
        let option = self.locator(&self.dataset.selectors.year_option, "{label}", &year.label);
        let element = self.session.find(&option).await?;
        self.session.click(&element).await?;
        self.session
            .wait_until(
                &Locator::xpath(&self.dataset.selectors.page_ready),
                self.config.browser.page_load_timeout,
                self.config.browser.wait_poll,
            )
            .await
            .map_err(|e| Error::navigation(format!("select year {}", year.year), e))
    }

    /// Expand the mesh filter; failures are logged and ignored
    pub(crate) async fn expand_mesh_filter(&self, year: &CatalogYear) {
        let Some(value) = &self.dataset.mesh_filter else {
            return;
        };
        let control = self.locator(&self.dataset.selectors.mesh_filter, "{value}", value);
        let clicked = match self.session.find(&control).await {
            Ok(element) => self.session.click(&element).await,
            Err(e) => Err(e),
        };
        match clicked {
            Ok(()) => debug!(year = %year.year, "mesh filter expanded"),
            Err(e) => warn!(year = %year.year, error = %e, "mesh filter expansion failed, continuing"),
        }
    }

    /// Find the year's category link and follow it to the result listing
    pub(crate) async fn open_category(&self, year: &CatalogYear) -> Result<()> {
        let step = || format!("resolve category link for {}", year.year);
        let pattern = self
            .dataset
            .category_links
            .pattern_for(&year.year)
            .ok_or_else(|| Error::navigation(step(), "year has no category link pattern"))?;

        let xpath = pattern.to_xpath(&year.year);
        debug!(year = %year.year, %xpath, "resolving category link");
        let anchors = self.session.find_all(&Locator::xpath(xpath)).await?;
        let anchor = anchors
            .into_iter()
            .next()
            .ok_or_else(|| Error::navigation(step(), "no link matches the pattern"))?;
        let href = self
            .session
            .attribute(&anchor, "href")
            .await?
            .ok_or_else(|| Error::navigation(step(), "link has no href"))?;

        self.session.navigate(&href).await?;
        self.session
            .wait_until(
                &Locator::xpath(&self.dataset.selectors.page_ready),
                self.config.browser.page_load_timeout,
                self.config.browser.wait_poll,
            )
            .await
    }

    /// Total result pages from the last-page indicator, 1 if unreadable
    pub(crate) async fn read_total_pages(&self) -> u32 {
        let selectors = &self.dataset.selectors;
        let indicator = match self.session.find(&Locator::xpath(&selectors.last_page)).await {
            Ok(element) => element,
            Err(_) => {
                debug!("no last-page indicator, assuming a single page");
                return 1;
            }
        };
        match self
            .session
            .attribute(&indicator, &selectors.page_count_attribute)
            .await
        {
            Ok(Some(value)) => value.trim().parse::<u32>().ok().filter(|n| *n > 0).unwrap_or_else(|| {
                warn!(%value, "unparseable page count, assuming a single page");
                1
            }),
            Ok(None) | Err(_) => 1,
        }
    }

    /// Click the button of result page `page`, then let the listing settle
    pub(crate) async fn open_page(&self, page: u32) -> Result<()> {
        let button = self.locator(&self.dataset.selectors.page_button, "{page}", &page.to_string());
        let element = self.session.find(&button).await?;
        self.session.click(&element).await?;
        tokio::time::sleep(self.config.browser.page_settle).await;
        Ok(())
    }

    /// Download links of the listing currently shown
    pub(crate) async fn collect_links(&self, page: u32) -> Result<Vec<DownloadLink>> {
        let selectors = &self.dataset.selectors;
        self.session
            .wait_until(
                &Locator::xpath(&selectors.result_list),
                self.config.browser.element_timeout,
                self.config.browser.wait_poll,
            )
            .await?;
        let elements = self
            .session
            .find_all(&Locator::xpath(&selectors.download_links))
            .await?;
        Ok(elements
            .into_iter()
            .enumerate()
            .map(|(i, element)| DownloadLink {
                index: i + 1,
                page,
                element,
            })
            .collect())
    }
}
