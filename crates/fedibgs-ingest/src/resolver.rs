//! Attachment Resolver: probes a candidate image URL and returns its
//! canonical form.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode};
use tracing::{debug, warn};

use fedibgs_core::error::FedibgsError;
use fedibgs_core::identity::strip_query;

/// Resolves attachment URLs to canonical URLs.
///
/// `None` means the attachment must be dropped.
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Option<String>;
}

/// Resolver backed by a bounded-timeout HTTP HEAD probe.
///
/// Redirects are followed; anything but a final 200 drops the attachment;
/// the final URL has its query string removed.
pub struct HttpAttachmentResolver {
    client: Client,
}

impl HttpAttachmentResolver {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FedibgsError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(10))
            .user_agent(user_agent)
            .build()
            .map_err(|e| FedibgsError::Config(format!("Failed to build probe client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AttachmentResolver for HttpAttachmentResolver {
    async fn resolve(&self, url: &str) -> Option<String> {
        let response = match self.client.head(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Attachment probe failed");
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            warn!(url = %url, status = %response.status(), "Attachment probe returned non-200");
            return None;
        }

        let canonical = strip_query(response.url().as_str()).to_string();
        if canonical != url {
            debug!(from = %url, to = %canonical, "Attachment URL canonicalized");
        }
        Some(canonical)
    }
}
