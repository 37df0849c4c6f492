use crate::models::ListingRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Outbound channel for new listings and operator errors.
///
/// Delivery is best effort: implementations log failures and never return them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_created(&self, listing: &ListingRecord);
    async fn notify_error(&self, message: &str);
}

/// Writes notifications to the log instead of sending them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_created(&self, listing: &ListingRecord) {
        info!("New listing: {}", format_listing_message(listing).replace('\n', " | "));
    }

    async fn notify_error(&self, message: &str) {
        warn!("Error notification: {}", message);
    }
}

/// Sends notifications through the Telegram Bot API
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        Self::with_api_base(TELEGRAM_API, token, chat_id)
    }

    /// Read `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID` from the environment
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").context("TELEGRAM_CHAT_ID must be set")?;
        info!("Initializing Telegram notifier with chat ID: {}", chat_id);
        Self::new(token, chat_id)
    }

    pub fn with_api_base(
        api_base: &str,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    async fn send_message(&self, text: &str, html: bool) -> Result<()> {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": false,
        });
        if html {
            body["parse_mode"] = json!("HTML");
        }

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_base, self.token))
            .json(&body)
            .send()
            .await
            .context("Failed to reach Telegram")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram returned {}: {}", status, detail);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_created(&self, listing: &ListingRecord) {
        let message = format_listing_message(listing);
        match self.send_message(&message, true).await {
            Ok(()) => info!("Sent notification for listing {}", listing.id),
            Err(e) => {
                error!("Failed to send Telegram notification: {:#}", e);
                let fallback = format!(
                    "New listing: {} {}\n\nView at: {}",
                    listing.make, listing.model, listing.url
                );
                match self.send_message(&fallback, false).await {
                    Ok(()) => info!("Sent simplified notification for listing {}", listing.id),
                    Err(e) => error!("Failed to send fallback notification: {:#}", e),
                }
            }
        }
    }

    async fn notify_error(&self, message: &str) {
        let text = format!(
            "<b>Error Alert</b>\n\nAn error occurred during the search process:\n\n{}\n\n{}",
            escape_html(message),
            Local::now().format("%Y-%m-%d %H:%M")
        );
        match self.send_message(&text, true).await {
            Ok(()) => info!("Sent error notification"),
            Err(e) => error!("Failed to send error notification: {:#}", e),
        }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Thousands grouped with commas, e.g. `24990` as `24,990`
fn group_thousands(value: u32) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// HTML message body for a newly seen listing
pub fn format_listing_message(listing: &ListingRecord) -> String {
    let price = if listing.price > 0 {
        format!("€{}", group_thousands(listing.price))
    } else {
        "Price not available".to_string()
    };
    let year = if listing.year > 0 {
        listing.year.to_string()
    } else {
        "Year not available".to_string()
    };
    let kilometers = if listing.kilometers > 0 {
        format!("{} km", group_thousands(listing.kilometers))
    } else {
        "Mileage not available".to_string()
    };

    // a bare postal code says nothing useful
    let location = listing.location.trim();
    let location = if location.chars().count() > 5 && !location.chars().all(|c| c.is_ascii_digit()) {
        format!("\nLocation: {}", escape_html(location))
    } else {
        String::new()
    };

    let title = if listing.title.trim().is_empty() {
        format!("{} {}", listing.make, listing.model)
    } else {
        listing.title.clone()
    };

    format!(
        "{} {}\n{}\n\n{}\n{}\n{}{}\n\n<a href=\"{}\">View Details</a>",
        escape_html(&listing.make),
        escape_html(&listing.model),
        escape_html(&title),
        year,
        kilometers,
        price,
        location,
        escape_html(&listing.url)
    )
}
