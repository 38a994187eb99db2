//! Hosted payment collaborator.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GalleryError, Result};

/// One purchasable line of a checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutLine {
    pub name: String,
    /// Unit price in minor currency units.
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Everything the provider needs to host a payment page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutOrder {
    pub currency: String,
    pub lines: Vec<CheckoutLine>,
    /// Return URL after payment. May contain the provider's
    /// `{CHECKOUT_SESSION_ID}` placeholder.
    pub success_url: String,
    pub cancel_url: String,
}

/// The external payment provider, seen only at its interface boundary.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout and returns the URL to redirect the client to.
    async fn create_checkout(&self, order: &CheckoutOrder) -> Result<String>;

    /// Customer email recorded by the provider for a completed checkout.
    async fn customer_email(&self, checkout_id: &str) -> Result<Option<String>>;
}

/// Gateway used when no provider is configured. Every call fails.
#[derive(Debug, Clone, Default)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_checkout(&self, _order: &CheckoutOrder) -> Result<String> {
        Err(GalleryError::PaymentLookupFailure(
            "payments are not configured".into(),
        ))
    }

    async fn customer_email(&self, _checkout_id: &str) -> Result<Option<String>> {
        Err(GalleryError::PaymentLookupFailure(
            "payments are not configured".into(),
        ))
    }
}

const STRIPE_API: &str = "https://api.stripe.com/v1";

/// Stripe Checkout over its form-encoded REST API.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
    customer_details: Option<CustomerDetails>,
}

#[derive(Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: secret_key.into(),
            api_base: STRIPE_API.to_string(),
        }
    }

    /// Points the client at another API base, e.g. a local mock.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<CheckoutSession> {
        let response = request
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(lookup_failure)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GalleryError::PaymentLookupFailure(format!(
                "provider answered {status}"
            )));
        }
        response.json().await.map_err(lookup_failure)
    }
}

fn lookup_failure(e: reqwest::Error) -> GalleryError {
    GalleryError::PaymentLookupFailure(e.to_string())
}

/// Stripe object ids are short runs of ASCII letters, digits and underscores.
/// Anything else would change the request path once interpolated.
fn is_checkout_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 255
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Flattens an order into Stripe's bracketed form fields.
fn checkout_form(order: &CheckoutOrder) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), order.success_url.clone()),
        ("cancel_url".to_string(), order.cancel_url.clone()),
    ];
    for (i, line) in order.lines.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            order.currency.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            line.name.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            line.unit_amount.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout(&self, order: &CheckoutOrder) -> Result<String> {
        let url = format!("{}/checkout/sessions", self.api_base);
        let session = self
            .send(self.client.post(url).form(&checkout_form(order)))
            .await?;
        debug!(checkout_id = %session.id, "checkout session created");
        session.url.ok_or_else(|| {
            GalleryError::PaymentLookupFailure("checkout session has no url".into())
        })
    }

    async fn customer_email(&self, checkout_id: &str) -> Result<Option<String>> {
        if !is_checkout_id(checkout_id) {
            return Err(GalleryError::PaymentLookupFailure(
                "malformed checkout id".into(),
            ));
        }
        let url = format!("{}/checkout/sessions/{checkout_id}", self.api_base);
        let session = self.send(self.client.get(url)).await?;
        Ok(session.customer_details.and_then(|c| c.email))
    }
}
