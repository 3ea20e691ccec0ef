use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, ParseMode, Recipient};
use teloxide::Bot;
use teloxide::utils::html;
use tracing::instrument;
use url::Url;

use crate::diff::ListingDiff;
use crate::error::NotifyError;
use crate::listing::{Listing, Snapshot};

const REMOVED_TITLE: &str = "❌ Listing removed (possibly restocking)";
const ADDED_TITLE: &str = "🆕 New listing";
const SUMMARY_TITLE: &str = "📦 Catalog check complete";

/// A message for the outbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    /// Listing name, rendered in bold under the title.
    pub headline: Option<String>,
    pub body: String,
    pub image_url: Option<String>,
    pub link: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Delay between consecutive item messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    delay: Duration,
}

impl Pacing {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn listing_link(origin: &Url, key: &str) -> Option<String> {
    origin.join(key).ok().map(String::from)
}

fn listing_notification(title: &str, listing: &Listing, origin: &Url) -> Notification {
    Notification {
        title: title.to_string(),
        headline: Some(listing.name.clone()),
        body: format!("Price: {}", listing.price),
        image_url: listing.image_url.clone(),
        link: listing_link(origin, &listing.key),
    }
}

pub fn removed_notification(listing: &Listing, origin: &Url) -> Notification {
    listing_notification(REMOVED_TITLE, listing, origin)
}

pub fn added_notification(listing: &Listing, origin: &Url) -> Notification {
    listing_notification(ADDED_TITLE, listing, origin)
}

pub fn summary_notification(total: usize, added: usize, removed: usize) -> Notification {
    Notification {
        title: SUMMARY_TITLE.to_string(),
        headline: None,
        body: format!("Current listings: {total}\nAdded: {added}\nRemoved: {removed}"),
        image_url: None,
        link: None,
    }
}

/// One message per removed listing (read from `old`), then one per added listing (read from `new`).
pub fn item_notifications(
    diff: &ListingDiff,
    old: &Snapshot,
    new: &Snapshot,
    origin: &Url,
) -> Vec<Notification> {
    let removed = diff
        .removed
        .iter()
        .filter_map(|key| old.get(key))
        .map(|listing| removed_notification(listing, origin));
    let added = diff
        .added
        .iter()
        .filter_map(|key| new.get(key))
        .map(|listing| added_notification(listing, origin));
    removed.chain(added).collect()
}

/// Message counts for one `announce` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed: usize,
}

/// Sends item messages with `pacing` between them, followed by the summary.
///
/// A message the channel rejects is logged and skipped so the rest still go out.
/// Only when nothing at all could be delivered is the last error returned.
#[instrument(skip_all, fields(added = diff.added.len(), removed = diff.removed.len()))]
pub async fn announce<N: Notifier + ?Sized>(
    notifier: &N,
    diff: &ListingDiff,
    old: &Snapshot,
    new: &Snapshot,
    origin: &Url,
    pacing: Pacing,
) -> Result<Delivery, NotifyError> {
    let mut delivery = Delivery::default();
    let mut last_error = None;

    for item in &item_notifications(diff, old, new, origin) {
        tracing::info!(title = %item.title, link = ?item.link, "Sending listing notification");
        match notifier.send(item).await {
            Ok(()) => delivery.sent += 1,
            Err(e) => {
                tracing::warn!(link = ?item.link, error = %e, "Listing notification not delivered");
                delivery.failed += 1;
                last_error = Some(e);
            }
        }
        pacing.wait().await;
    }

    let summary = summary_notification(new.len(), diff.added.len(), diff.removed.len());
    match notifier.send(&summary).await {
        Ok(()) => delivery.sent += 1,
        Err(e) => {
            tracing::warn!(error = %e, "Summary notification not delivered");
            delivery.failed += 1;
            last_error = Some(e);
        }
    }

    match (delivery.sent, last_error) {
        (0, Some(e)) => Err(e),
        _ => {
            tracing::info!(sent = delivery.sent, failed = delivery.failed, "Notifications sent");
            Ok(delivery)
        }
    }
}

/// Renders a notification as Telegram HTML.
pub fn render_html(notification: &Notification) -> String {
    let mut text = format!("<b>{}</b>\n", html::escape(&notification.title));
    if let Some(headline) = &notification.headline {
        text.push_str(&format!("<b>{}</b>\n", html::escape(headline)));
    }
    text.push_str(&html::escape(&notification.body));
    if let Some(link) = &notification.link {
        text.push_str(&format!("\n<a href=\"{}\">View product</a>", html::escape(link)));
    }
    text
}

pub fn parse_recipient(raw: &str) -> Recipient {
    match raw.trim().parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(raw.trim().to_string()),
    }
}

/// Delivers notifications to one Telegram chat through the Bot API.
pub struct TelegramNotifier {
    bot: Bot,
    destination: Recipient,
    destination_name: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, destination: &str) -> Self {
        Self {
            bot: Bot::new(token),
            destination: parse_recipient(destination),
            destination_name: destination.to_string(),
        }
    }

    /// Confirms the token works and the destination chat exists; returns the chat title.
    pub async fn resolve_destination(&self) -> Result<String, NotifyError> {
        let me = self.bot.get_me().await?;
        tracing::info!(
            bot = %me.user.username.as_deref().unwrap_or(&me.user.first_name),
            "Logged in to Telegram"
        );

        let chat = self
            .bot
            .get_chat(self.destination.clone())
            .await
            .map_err(|source| NotifyError::Destination {
                destination: self.destination_name.clone(),
                source,
            })?;
        Ok(chat
            .title()
            .or_else(|| chat.username())
            .unwrap_or(self.destination_name.as_str())
            .to_string())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let text = render_html(notification);
        let photo = notification
            .image_url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok());

        if let Some(url) = photo {
            match self
                .bot
                .send_photo(self.destination.clone(), InputFile::url(url))
                .caption(text.clone())
                .parse_mode(ParseMode::Html)
                .await
            {
                Ok(_) => return Ok(()),
                // Telegram fetches the image itself and may refuse it; the text still goes out.
                Err(e) => tracing::warn!(
                    image = ?notification.image_url,
                    error = %e,
                    "Photo rejected, sending text only"
                ),
            }
        }

        self.bot
            .send_message(self.destination.clone(), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}
