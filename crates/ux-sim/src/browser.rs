//! Scripted browser for agent-mode simulations.
//!
//! A [`SiteMap`] is a set of pages keyed by path, each with an ordered list of
//! links. Clicking `link-N` follows the N-th link of the current page.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;
use url::Url;
use ux_core::{ActionError, Automation, BrowserAction, BrowserSession, EpisodeId, PageState};

pub const CHECKOUT_ORIGIN: &str = "https://shop.test";

#[derive(Debug, Clone)]
pub struct SitePage {
    pub title: String,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SiteMap {
    pages: IndexMap<String, SitePage>,
}

impl SiteMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, path: &str, title: &str, links: &[&str]) -> Self {
        self.pages.insert(
            path.to_string(),
            SitePage {
                title: title.to_string(),
                links: links.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }

    /// A small shop whose primary links lead from the home page to an
    /// order confirmation.
    pub fn checkout() -> Self {
        SiteMap::new()
            .page("/", "Home", &["/products", "/help", "/about"])
            .page("/products", "Products", &["/cart", "/", "/help"])
            .page("/cart", "Cart", &["/checkout", "/products"])
            .page("/checkout", "Checkout", &["/confirmation", "/cart", "/help"])
            .page("/confirmation", "Order confirmed", &[])
            .page("/help", "Help", &["/"])
            .page("/about", "About us", &["/"])
    }

    pub fn get(&self, path: &str) -> Option<&SitePage> {
        self.pages.get(path)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

pub struct SyntheticBrowser {
    site: Arc<SiteMap>,
}

impl SyntheticBrowser {
    pub fn new(site: SiteMap) -> Self {
        SyntheticBrowser {
            site: Arc::new(site),
        }
    }
}

#[async_trait]
impl Automation for SyntheticBrowser {
    async fn open(
        &self,
        episode_id: EpisodeId,
        url: &str,
    ) -> Result<Box<dyn BrowserSession>, ActionError> {
        let parsed = Url::parse(url).map_err(|e| ActionError::Navigation(format!("{}: {}", url, e)))?;
        let path = parsed.path().to_string();
        if self.site.get(&path).is_none() {
            return Err(ActionError::Navigation(format!("404 for {}", url)));
        }

        debug!(%episode_id, url, "Opened synthetic browser session");
        Ok(Box::new(SyntheticSession {
            site: self.site.clone(),
            origin: parsed.origin().ascii_serialization(),
            history: vec![path],
            closed: false,
        }))
    }
}

pub struct SyntheticSession {
    site: Arc<SiteMap>,
    origin: String,
    /// Visited paths; the last one is the current page.
    history: Vec<String>,
    closed: bool,
}

impl SyntheticSession {
    fn current(&self) -> Result<(&str, &SitePage), ActionError> {
        if self.closed {
            return Err(ActionError::SessionClosed);
        }
        let path = self.history.last().ok_or(ActionError::SessionClosed)?;
        let page = self
            .site
            .get(path)
            .ok_or_else(|| ActionError::Navigation(format!("404 for {}", path)))?;
        Ok((path, page))
    }

    fn state(&self) -> Result<PageState, ActionError> {
        let (path, page) = self.current()?;
        Ok(PageState {
            url: Some(format!("{}{}", self.origin, path)),
            page_title: Some(page.title.clone()),
            element_count: Some(page.links.len() as u32),
            screenshot_path: None,
        })
    }

    fn follow(&mut self, target: &str) -> Result<(), ActionError> {
        let (_, page) = self.current()?;
        let next = target
            .strip_prefix("link-")
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|n| page.links.get(n))
            .cloned()
            .ok_or_else(|| ActionError::ElementMissing(target.to_string()))?;
        self.history.push(next);
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for SyntheticSession {
    async fn observe(&mut self) -> Result<PageState, ActionError> {
        self.state()
    }

    async fn execute(&mut self, action: &BrowserAction) -> Result<PageState, ActionError> {
        self.current()?;
        match action {
            BrowserAction::Click { target } => self.follow(target)?,
            BrowserAction::Type { target, .. } => {
                if !target.starts_with("input-") {
                    return Err(ActionError::ElementMissing(target.clone()));
                }
            }
            BrowserAction::NavigateBack => {
                if self.history.len() > 1 {
                    self.history.pop();
                }
            }
            BrowserAction::ClickCoordinates { .. }
            | BrowserAction::Scroll { .. }
            | BrowserAction::Wait { .. }
            | BrowserAction::Done { .. } => {}
        }
        self.state()
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
