//! In-memory page sources and notifiers used by unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use teloxide::{ApiError, RequestError};

use crate::error::{FetchError, NotifyError};
use crate::fetcher::PageSource;
use crate::notifier::{Notification, Notifier};

#[derive(Debug, Clone)]
pub enum PageReply {
    Body(String),
    Status(u16),
}

/// Serves a fixed list of pages; anything past the list gets the fallback reply.
pub struct StaticPages {
    pages: Vec<PageReply>,
    fallback: PageReply,
    calls: AtomicU32,
}

impl StaticPages {
    pub fn new(pages: Vec<PageReply>) -> Self {
        Self {
            pages,
            fallback: PageReply::Body(catalog_page(&[])),
            calls: AtomicU32::new(0),
        }
    }

    pub fn repeating(reply: PageReply) -> Self {
        Self {
            pages: Vec::new(),
            fallback: reply,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for StaticPages {
    async fn fetch_page(&self, page: u32) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .pages
            .get(page as usize - 1)
            .unwrap_or(&self.fallback);
        match reply {
            PageReply::Body(body) => Ok(body.clone()),
            PageReply::Status(code) => Err(FetchError::Status {
                page,
                status: StatusCode::from_u16(*code).unwrap(),
            }),
        }
    }
}

pub struct Card {
    key: String,
    name: String,
    price: Option<String>,
    image: Option<String>,
}

impl Card {
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            price: None,
            image: None,
        }
    }

    pub fn price(mut self, price: &str) -> Self {
        self.price = Some(price.to_string());
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }
}

/// Renders cards using the default catalog markup.
pub fn catalog_page(cards: &[Card]) -> String {
    let mut html = String::from("<html><body><main>");
    for card in cards {
        html.push_str("<div class=\"product--root\">");
        html.push_str(&format!("<a href=\"{}\">", card.key));
        if let Some(image) = &card.image {
            html.push_str(&format!("<img data-src=\"{image}\">"));
        }
        html.push_str("</a>");
        html.push_str(&format!("<h2 class=\"product_name\">{}</h2>", card.name));
        if let Some(price) = &card.price {
            html.push_str(&format!("<div class=\"product_price\">{price}</div>"));
        }
        html.push_str("</div>");
    }
    html.push_str("</main></body></html>");
    html
}

/// Records every notification it delivers; `fail_when` picks messages the channel rejects.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail_when: Option<fn(&Notification) -> bool>,
}

impl RecordingNotifier {
    pub fn failing_when(fail_when: fn(&Notification) -> bool) -> Self {
        Self {
            sent: Mutex::default(),
            fail_when: Some(fail_when),
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.fail_when.is_some_and(|fail| fail(notification)) {
            return Err(NotifyError::Telegram(RequestError::Api(ApiError::ChatNotFound)));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A page source that panics on the first request.
pub struct PanickingPages;

#[async_trait]
impl PageSource for PanickingPages {
    async fn fetch_page(&self, page: u32) -> Result<String, FetchError> {
        panic!("page source blew up on page {page}");
    }
}
