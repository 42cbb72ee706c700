//! Delivery of report pages to destinations
//!
//! Pages of one report go out strictly in order. The first failed page
//! stops the sequence so nothing after it is delivered out of order; the
//! caller then leaves the tick uncommitted and the next run resends.

use crate::core::config::{DeliveryConfig, NotifierKind, SourceConfig};
use crate::core::error::{BgsError, Result};
use crate::report::builder::{PageKind, ReportPage, REPORT_FOOTER};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;

pub trait Notifier: Send + Sync {
    fn deliver(
        &self,
        destination: &str,
        page: &ReportPage,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Deliver `pages` in order, stopping at the first failure
pub async fn deliver_in_order<N: Notifier>(
    notifier: &N,
    destination: &str,
    pages: &[ReportPage],
) -> Result<()> {
    for (idx, page) in pages.iter().enumerate() {
        notifier.deliver(destination, page).await.map_err(|e| {
            BgsError::Delivery(format!(
                "page {}/{} to '{}': {}",
                idx + 1,
                pages.len(),
                destination,
                e
            ))
        })?;
        tracing::debug!(destination, page = idx + 1, total = pages.len(), "Page delivered");
    }
    Ok(())
}

/// Prints pages to stdout
#[derive(Debug, Default)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    async fn deliver(&self, destination: &str, page: &ReportPage) -> Result<()> {
        println!("[{}]\n{}\n", destination, page.render_text());
        Ok(())
    }
}

/// Posts pages to chat webhooks, one URL per destination
pub struct WebhookNotifier {
    client: Client,
    webhooks: BTreeMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(webhooks: BTreeMap<String, String>, source: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(source.timeout())
            .build()
            .map_err(|e| BgsError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, webhooks })
    }
}

impl Notifier for WebhookNotifier {
    async fn deliver(&self, destination: &str, page: &ReportPage) -> Result<()> {
        let url = self
            .webhooks
            .get(destination)
            .ok_or_else(|| BgsError::Delivery(format!("no webhook for '{}'", destination)))?;

        let response = self
            .client
            .post(url)
            .json(&WebhookPayload::from_page(page))
            .send()
            .await
            .map_err(|e| BgsError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BgsError::Delivery(format!("webhook error: {}", error_text)));
        }
        Ok(())
    }
}

/// Records deliveries in memory; can be told to fail a given call
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    delivered: Mutex<Vec<(String, ReportPage)>>,
    fail_on_call: Option<usize>,
    calls: Mutex<usize>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th delivery call (0-based), succeed on all others
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on_call: Some(n),
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<(String, ReportPage)> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    async fn deliver(&self, destination: &str, page: &ReportPage) -> Result<()> {
        let call = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| BgsError::Delivery("notifier poisoned".into()))?;
            let call = *calls;
            *calls += 1;
            call
        };
        if self.fail_on_call == Some(call) {
            return Err(BgsError::Delivery(format!("simulated failure on call {}", call)));
        }
        self.delivered
            .lock()
            .map_err(|_| BgsError::Delivery("notifier poisoned".into()))?
            .push((destination.to_string(), page.clone()));
        Ok(())
    }
}

/// Notifier chosen at runtime from configuration
pub enum AnyNotifier {
    Stdout(StdoutNotifier),
    Webhook(WebhookNotifier),
}

impl AnyNotifier {
    pub fn from_config(delivery: &DeliveryConfig, source: &SourceConfig) -> Result<Self> {
        match delivery.notifier {
            NotifierKind::Stdout => Ok(AnyNotifier::Stdout(StdoutNotifier)),
            NotifierKind::Webhook => Ok(AnyNotifier::Webhook(WebhookNotifier::new(
                delivery.webhooks.clone(),
                source,
            )?)),
        }
    }
}

impl Notifier for AnyNotifier {
    async fn deliver(&self, destination: &str, page: &ReportPage) -> Result<()> {
        match self {
            AnyNotifier::Stdout(n) => n.deliver(destination, page).await,
            AnyNotifier::Webhook(n) => n.deliver(destination, page).await,
        }
    }
}

// Webhook wire format: one embed per page

#[derive(Serialize)]
struct WebhookPayload {
    embeds: Vec<Embed>,
}

#[derive(Serialize)]
struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    color: u32,
    fields: Vec<EmbedField>,
    footer: EmbedFooter,
}

#[derive(Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct EmbedFooter {
    text: String,
}

const COLOR_RED: u32 = 0xE74C3C;
const COLOR_ORANGE: u32 = 0xE67E22;
const COLOR_GREEN: u32 = 0x2ECC71;

/// Severity only picks the colour
fn page_color(page: &ReportPage) -> u32 {
    match (page.kind, page.severity) {
        (_, true) => COLOR_RED,
        (PageKind::Report, false) => COLOR_ORANGE,
        _ => COLOR_GREEN,
    }
}

impl WebhookPayload {
    fn from_page(page: &ReportPage) -> Self {
        Self {
            embeds: vec![Embed {
                title: page.title.clone(),
                description: page.description.clone(),
                color: page_color(page),
                fields: page
                    .entries
                    .iter()
                    .map(|e| EmbedField {
                        name: e.heading(),
                        value: e.body(),
                        inline: false,
                    })
                    .collect(),
                footer: EmbedFooter {
                    text: REPORT_FOOTER.into(),
                },
            }],
        }
    }
}
