use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client};
use scraper::{ElementRef, Html, Selector};
use tracing::instrument;
use url::Url;

use crate::config::SelectorSettings;
use crate::error::{FetchError, SettingsError};
use crate::listing::{Listing, Snapshot, UNKNOWN_PRICE};

const WIDTH_PLACEHOLDER: &str = "{width}";

/// Supplies the raw HTML of one catalog page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<String, FetchError>;
}

/// Fetches catalog pages over HTTP, one request per page.
pub struct HttpPageSource {
    client: Client,
    catalog_url: Url,
}

impl HttpPageSource {
    pub fn new(catalog_url: Url, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            catalog_url,
        })
    }

    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.catalog_url.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, page: u32) -> Result<String, FetchError> {
        let url = self.page_url(page);
        tracing::debug!(url = %url, "Requesting catalog page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport { page, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { page, status });
        }

        response
            .text()
            .await
            .map_err(|source| FetchError::Transport { page, source })
    }
}

/// Compiled selectors for one listing card.
#[derive(Debug)]
pub struct Selectors {
    listing: Selector,
    link: Selector,
    name: Selector,
    price: Selector,
    image: Selector,
    image_attr: String,
}

impl Selectors {
    pub fn parse(settings: &SelectorSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            listing: compile("selectors.listing", &settings.listing)?,
            link: compile("selectors.link", &settings.link)?,
            name: compile("selectors.name", &settings.name)?,
            price: compile("selectors.price", &settings.price)?,
            image: compile("selectors.image", &settings.image)?,
            image_attr: settings.image_attr.clone(),
        })
    }
}

fn compile(field: &'static str, css: &str) -> Result<Selector, SettingsError> {
    Selector::parse(css).map_err(|e| SettingsError::Invalid {
        field,
        reason: e.to_string(),
    })
}

/// What a single page yielded: matched card elements and the valid listings among them.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub elements: usize,
    pub listings: Vec<Listing>,
}

pub fn parse_page(html: &str, selectors: &Selectors, image_width: &str) -> ParsedPage {
    let document = Html::parse_document(html);
    let mut parsed = ParsedPage::default();

    for card in document.select(&selectors.listing) {
        parsed.elements += 1;
        if let Some(listing) = parse_listing(card, selectors, image_width) {
            parsed.listings.push(listing);
        }
    }

    parsed
}

fn parse_listing(card: ElementRef<'_>, selectors: &Selectors, image_width: &str) -> Option<Listing> {
    let key = card.select(&selectors.link).next()?.value().attr("href")?;
    let name = card.select(&selectors.name).next().map(stripped_text)?;

    let price = card
        .select(&selectors.price)
        .next()
        .map(stripped_text)
        .unwrap_or_else(|| UNKNOWN_PRICE.to_string());

    let image_url = card
        .select(&selectors.image)
        .next()
        .and_then(|img| img.value().attr(&selectors.image_attr))
        .map(|raw| normalize_image_url(raw, image_width));

    Some(Listing {
        key: key.to_string(),
        name,
        price,
        image_url,
    })
}

// Each text node is trimmed and the pieces concatenated.
fn stripped_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

/// Coerces protocol-relative URLs to `https:` and fills the `{width}` template token.
pub fn normalize_image_url(raw: &str, width: &str) -> String {
    let absolute = match raw.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_string(),
    };
    absolute.replace(WIDTH_PLACEHOLDER, width)
}

/// Why pagination ended for a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EmptyPage { page: u32 },
    HttpStatus { page: u32, status: u16 },
    Transport { page: u32, message: String },
    PageLimit { pages: u32 },
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EmptyPage { .. } => "empty_page",
            StopReason::HttpStatus { .. } => "http_status",
            StopReason::Transport { .. } => "transport",
            StopReason::PageLimit { .. } => "page_limit",
        }
    }

    fn from_error(page: u32, err: &FetchError) -> Self {
        match err {
            FetchError::Status { status, .. } => StopReason::HttpStatus {
                page,
                status: status.as_u16(),
            },
            other => StopReason::Transport {
                page,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EmptyPage { page } => write!(f, "page {page} had no listings"),
            StopReason::HttpStatus { page, status } => write!(f, "page {page} returned HTTP {status}"),
            StopReason::Transport { page, message } => write!(f, "page {page} failed: {message}"),
            StopReason::PageLimit { pages } => write!(f, "reached the {pages} page limit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCount {
    pub page: u32,
    pub elements: usize,
    pub listings: usize,
}

/// Result of one full pagination pass.
#[derive(Debug)]
pub struct FetchReport {
    pub snapshot: Snapshot,
    pub pages: Vec<PageCount>,
    pub stop: StopReason,
}

pub struct Fetcher<S> {
    source: S,
    selectors: Selectors,
    max_pages: u32,
    image_width: String,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: S, selectors: Selectors, max_pages: u32, image_width: impl Into<String>) -> Self {
        Self {
            source,
            selectors,
            max_pages,
            image_width: image_width.into(),
        }
    }

    /// Walks pages sequentially until one fails, comes back empty, or the page bound is hit.
    /// Failures end pagination; whatever was gathered so far is returned.
    #[instrument(skip(self), fields(max_pages = self.max_pages))]
    pub async fn fetch(&self) -> FetchReport {
        let start = Instant::now();
        let mut snapshot = Snapshot::new();
        let mut pages = Vec::new();
        let mut stop = StopReason::PageLimit {
            pages: self.max_pages,
        };

        for page in 1..=self.max_pages {
            let body = match self.source.fetch_page(page).await {
                Ok(body) => body,
                Err(e) => {
                    stop = StopReason::from_error(page, &e);
                    tracing::warn!(page = page, stop = stop.as_str(), error = %e, "Stopping pagination");
                    break;
                }
            };

            let parsed = parse_page(&body, &self.selectors, &self.image_width);
            if parsed.elements == 0 {
                stop = StopReason::EmptyPage { page };
                tracing::info!(page = page, stop = stop.as_str(), "No more listings, stopping pagination");
                break;
            }

            tracing::info!(
                page = page,
                elements = parsed.elements,
                listings = parsed.listings.len(),
                "Page scrape successful"
            );
            pages.push(PageCount {
                page,
                elements: parsed.elements,
                listings: parsed.listings.len(),
            });
            snapshot.extend(parsed.listings);
        }

        tracing::info!(
            total_listings = snapshot.len(),
            pages = pages.len(),
            stop = stop.as_str(),
            reason = %stop,
            duration = ?start.elapsed(),
            "Completed catalog scrape"
        );

        FetchReport {
            snapshot,
            pages,
            stop,
        }
    }
}
