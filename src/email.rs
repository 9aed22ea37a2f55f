//! Email Dispatch
//! Mission: Deliver login links and welcome mail, or log them when no provider is configured

use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// A rendered message ready for delivery
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Messages this service knows how to render
#[derive(Debug, Clone)]
pub enum EmailTemplate {
    MagicLink { name: String, url: String, ttl_minutes: i64 },
    Welcome { name: String, site_url: String },
}

impl EmailTemplate {
    pub fn render(&self, to: &str) -> EmailMessage {
        match self {
            EmailTemplate::MagicLink {
                name,
                url,
                ttl_minutes,
            } => EmailMessage {
                to: to.to_string(),
                subject: "Your login link".to_string(),
                html: format!(
                    "<p>Hello {name},</p>\
                     <p>Use the button below to log in.</p>\
                     <p><a href=\"{url}\">Log in</a></p>\
                     <ul>\
                     <li>This link is valid for {ttl} minutes.</li>\
                     <li>It can be used only once.</li>\
                     <li>Do not share this email with anyone.</li>\
                     </ul>\
                     <p>If you did not request this, you can ignore this email.</p>",
                    name = escape_html(name),
                    url = escape_html(url),
                    ttl = ttl_minutes,
                ),
                text: format!(
                    "Hello {},\n\nLog in with this link (valid for {} minutes, single use):\n{}\n\n\
                     If you did not request this, you can ignore this email.\n",
                    name, ttl_minutes, url
                ),
            },
            EmailTemplate::Welcome { name, site_url } => EmailMessage {
                to: to.to_string(),
                subject: "Welcome to the library".to_string(),
                html: format!(
                    "<p>Hello {name},</p>\
                     <p>Your registration is complete.</p>\
                     <p>Your downloads and favourites now sync across devices.</p>\
                     <p><a href=\"{url}\">Visit the site</a></p>",
                    name = escape_html(name),
                    url = escape_html(site_url),
                ),
                text: format!(
                    "Hello {},\n\nYour registration is complete.\nVisit the site: {}\n",
                    name, site_url
                ),
            },
        }
    }
}

/// Display name for greetings: the profile name, else the email's local part.
pub fn greeting_name(name: Option<&str>, email: &str) -> String {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string())
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Outbound email transport
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Delivers through the Resend HTTP API
pub struct ResendSender {
    http_client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendSender {
    pub fn new(api_key: String, from: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl EmailSender for ResendSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let body = json!({
            "from": self.from,
            "to": [message.to],
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        });

        let resp = self
            .http_client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach email provider")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(%status, "Email provider rejected message");
            bail!("Email provider returned {}: {}", status, detail);
        }

        info!(subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Stand-in when no provider key is configured: logs instead of sending.
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "Email delivery not configured; message logged instead of sent"
        );
        Ok(())
    }
}

/// Pick the transport from configuration: Resend when a key is present, else the log stub.
pub fn sender_from_config(config: &AppConfig) -> Result<Arc<dyn EmailSender>> {
    match &config.resend_api_key {
        Some(key) => {
            info!("Email delivery via Resend");
            Ok(Arc::new(ResendSender::new(
                key.clone(),
                config.email_from.clone(),
            )?))
        }
        None => {
            warn!("RESEND_API_KEY not set - emails will only be logged");
            Ok(Arc::new(LogSender))
        }
    }
}
