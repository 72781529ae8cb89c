//! DNS-over-HTTPS upstream client (RFC 8484, spec.md §4.3 "DoH"). Uses
//! `reqwest`'s HTTP/2 client with the `application/dns-message` media
//! type, POSTing the raw wire query and reading the raw wire response.

use super::{Upstream, next_query_id};
use crate::dns::Message;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::time::Duration;

const DNS_MESSAGE_MIME: &str = "application/dns-message";

pub struct DohClient {
    name: String,
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    trusted: bool,
}

impl DohClient {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
        skip_tls_verify: bool,
        trusted: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .http2_prior_knowledge()
            .danger_accept_invalid_certs(skip_tls_verify)
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Upstream(format!("failed to build DoH client: {e}")))?;
        Ok(Self { name: name.into(), url: url.into(), client, timeout, trusted })
    }
}

#[async_trait]
impl Upstream for DohClient {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        let mut wire_query = query.clone();
        wire_query.header.id = next_query_id();
        let wire = wire_query.to_wire()?;

        let resp = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE_MIME)
                .header(reqwest::header::ACCEPT, DNS_MESSAGE_MIME)
                .body(wire)
                .send(),
        )
        .await
        .map_err(|_| CoreError::Timeout)?
        .map_err(|e| CoreError::Upstream(format!("{}: request failed: {e}", self.name)))?;

        if !resp.status().is_success() {
            return Err(CoreError::Upstream(format!(
                "{}: unexpected status {}",
                self.name,
                resp.status()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| CoreError::Upstream(format!("{}: failed to read body: {e}", self.name)))?;
        Message::parse(&body)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn trusted(&self) -> bool {
        self.trusted
    }
}
