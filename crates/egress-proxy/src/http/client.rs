//! IP-echo client
//!
//! Asks public "what is my IP" services for the caller's address, through the
//! supervised SOCKS5 proxy. Endpoints are tried in order; the first valid
//! answer wins.

use crate::config::{EchoEndpoint, EchoFormat, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::traits::{EgressIpSource, parse_reported_ip};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use std::net::IpAddr;
use std::time::Duration;

/// User agent sent to the echo services
pub const USER_AGENT: &str = "WireProxy-HealthCheck/1.0";

/// HTTP client for IP-echo endpoints.
#[derive(Clone, Debug)]
pub struct EchoClient {
    client: ReqwestClient,
    endpoints: Vec<EchoEndpoint>,
    timeout: Duration,
}

impl EchoClient {
    /// Client that routes every request through the proxy in `config`.
    pub fn for_proxy(config: &ProxyConfig) -> Result<Self> {
        let proxy = reqwest::Proxy::all(config.proxy_url())
            .map_err(|e| ProxyError::config("proxy_url", e.to_string()))?;
        Self::build(
            ReqwestClient::builder().proxy(proxy),
            config.echo_endpoints.clone(),
            config.timings.egress_timeout,
        )
    }

    /// Client that talks to the endpoints directly.
    pub fn direct(endpoints: Vec<EchoEndpoint>, timeout: Duration) -> Result<Self> {
        Self::build(ReqwestClient::builder().no_proxy(), endpoints, timeout)
    }

    fn build(
        builder: reqwest::ClientBuilder,
        endpoints: Vec<EchoEndpoint>,
        timeout: Duration,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(ProxyError::config(
                "echo_endpoints",
                "at least one endpoint is required",
            ));
        }

        let client = builder
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProxyError::config("echo_client", e.to_string()))?;

        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    /// Configured endpoints, in the order they are tried
    pub fn endpoints(&self) -> &[EchoEndpoint] {
        &self.endpoints
    }

    async fn query(&self, endpoint: &EchoEndpoint) -> Result<IpAddr> {
        let response = self
            .client
            .get(&endpoint.url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::EgressLookup(format!(
                "{} answered HTTP {}",
                endpoint.url,
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let raw = match &endpoint.format {
            EchoFormat::PlainText => body,
            EchoFormat::Json { field } => {
                let json: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
                    ProxyError::EgressLookup(format!("{}: invalid JSON: {}", endpoint.url, e))
                })?;
                json.get(field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ProxyError::EgressLookup(format!(
                            "{}: field '{}' missing",
                            endpoint.url, field
                        ))
                    })?
            }
        };

        parse_reported_ip(&raw)
    }

    fn map_request_error(&self, err: reqwest::Error) -> ProxyError {
        if err.is_timeout() {
            ProxyError::EgressTimeout(self.timeout)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl EgressIpSource for EchoClient {
    async fn fetch_ip(&self, subject_id: Option<&str>) -> Result<IpAddr> {
        let mut last_error = None;

        for endpoint in &self.endpoints {
            match self.query(endpoint).await {
                Ok(ip) => {
                    tracing::debug!(
                        endpoint = %endpoint.url,
                        subject = subject_id.unwrap_or("-"),
                        %ip,
                        "egress IP resolved"
                    );
                    return Ok(ip);
                }
                Err(err) => {
                    tracing::debug!(
                        endpoint = %endpoint.url,
                        subject = subject_id.unwrap_or("-"),
                        error = %err,
                        "IP echo endpoint failed, trying next"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProxyError::EgressLookup("no endpoints configured".to_string())))
    }
}
