//! Client for the upstream cloud backend: token verification and the
//! incremental tenant-config pull used by the synchronizer.
//!
//! Split behind a trait so the authenticator, synchronizer, and tests can
//! all depend on [`CloudBackend`] rather than a concrete `reqwest` client —
//! the same seam `proxy`'s console client uses so test code can swap in an
//! in-process stub instead of hitting the network.

pub mod messages;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use messages::{ConfigsResponse, VerifyTokenData};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// `POST /auth/verify-token?token=...`. `Ok(None)` on a 401 (invalid
    /// token); `Err` on any other transport/status failure.
    async fn verify_token(&self, token: &str) -> Result<Option<VerifyTokenData>>;

    /// `GET /gateway/configs?since=...`.
    async fn fetch_configs(&self, since: Option<&str>) -> Result<ConfigsResponse>;
}

/// Real HTTP implementation, grounded on the same `reqwest::Client` +
/// bearer-header + JSON-body pattern used for console calls elsewhere in
/// the stack.
pub struct HttpCloudBackend {
    http: reqwest::Client,
    base_url: url::Url,
    service_token: String,
}

impl HttpCloudBackend {
    pub fn new(base_url: url::Url, service_token: String) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to construct cloud backend HTTP client");
        Self {
            http,
            base_url,
            service_token,
        }
    }
}

#[async_trait]
impl CloudBackend for HttpCloudBackend {
    async fn verify_token(&self, token: &str) -> Result<Option<VerifyTokenData>> {
        let url = self
            .base_url
            .join("/auth/verify-token")
            .map_err(|e| GatewayError::transient_upstream(e.to_string()))?;

        let response = self
            .http
            .post(url)
            .query(&[("token", token)])
            .header("Accept", "application/json")
            .timeout(VERIFY_TIMEOUT)
            .send()
            .await
            .map_err(|e| GatewayError::transient_upstream(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GatewayError::transient_upstream(format!(
                "verify-token returned {}",
                response.status()
            )));
        }

        let body: messages::VerifyTokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::transient_upstream(e.to_string()))?;
        Ok(Some(body.data))
    }

    async fn fetch_configs(&self, since: Option<&str>) -> Result<ConfigsResponse> {
        let mut url = self
            .base_url
            .join("/gateway/configs")
            .map_err(|e| GatewayError::transient_upstream(e.to_string()))?;
        if let Some(since) = since {
            url.query_pairs_mut().append_pair("since", since);
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.service_token)
            .header("Accept", "application/json")
            .timeout(SYNC_TIMEOUT)
            .send()
            .await
            .map_err(|e| GatewayError::transient_upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::transient_upstream(format!(
                "gateway/configs returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::transient_upstream(e.to_string()))
    }
}
