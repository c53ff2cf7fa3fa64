//! Reqwest-backed Notify provider adapter.
//!
//! This adapter owns transport details only: request serialisation, bearer
//! authentication, timeout and HTTP error mapping, and JSON decoding into
//! domain receipts.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};

use super::dto::{SendEmailDto, SendEmailResponseDto, TemplateDto};
use crate::domain::credentials::CachedProviderCredential;
use crate::domain::ports::{
    DeliveryProviderError, EmailDeliveryProvider, EmailReceipt, EmailRequest,
};

const DEFAULT_USER_AGENT: &str = "lease-notifier/0.1";

/// Notify adapter that talks to one API base URL.
pub struct NotifyHttpProvider {
    client: Client,
    base: Url,
    credential: Arc<CachedProviderCredential>,
}

impl NotifyHttpProvider {
    /// Build an adapter using a reqwest client with an explicit request timeout.
    /// ```rust,ignore
    /// let provider = NotifyHttpProvider::new(base, credential, timeout);
    /// assert!(provider.is_ok() || provider.is_err());
    /// ```
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        base: Url,
        credential: Arc<CachedProviderCredential>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base,
            credential,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DeliveryProviderError> {
        build_endpoint(&self.base, segments)
    }

    async fn bearer(&self) -> Result<String, DeliveryProviderError> {
        let key = self
            .credential
            .get()
            .await
            .map_err(|error| DeliveryProviderError::credential(error.to_string()))?;
        Ok(format!("Bearer {}", key.expose()))
    }
}

#[async_trait]
impl EmailDeliveryProvider for NotifyHttpProvider {
    async fn send_email(
        &self,
        request: &EmailRequest,
    ) -> Result<EmailReceipt, DeliveryProviderError> {
        let url = self.endpoint(&["v2", "notifications", "email"])?;
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&SendEmailDto::from(request))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, retry_after, body.as_ref()));
        }
        parse_receipt(body.as_ref())
    }

    async fn template_fields(
        &self,
        template_id: &str,
    ) -> Result<BTreeSet<String>, DeliveryProviderError> {
        let url = self.endpoint(&["v2", "template", template_id])?;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, retry_after, body.as_ref()));
        }
        let decoded: TemplateDto = serde_json::from_slice(body.as_ref()).map_err(|error| {
            DeliveryProviderError::decode(format!("invalid template JSON payload: {error}"))
        })?;
        Ok(decoded.into_field_names())
    }
}

fn build_endpoint(base: &Url, segments: &[&str]) -> Result<Url, DeliveryProviderError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| DeliveryProviderError::transport(format!("base url {base} has no path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn parse_receipt(body: &[u8]) -> Result<EmailReceipt, DeliveryProviderError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(EmailReceipt::default());
    }
    let decoded: SendEmailResponseDto = serde_json::from_slice(body).map_err(|error| {
        DeliveryProviderError::decode(format!("invalid send response JSON payload: {error}"))
    })?;
    Ok(decoded.into_receipt())
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn map_transport_error(error: reqwest::Error) -> DeliveryProviderError {
    if error.is_timeout() {
        DeliveryProviderError::timeout(error.to_string())
    } else {
        DeliveryProviderError::transport(error.to_string())
    }
}

fn map_status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &[u8],
) -> DeliveryProviderError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        body_preview
    };
    DeliveryProviderError::status(status.as_u16(), retry_after, message)
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
