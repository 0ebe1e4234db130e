//! HTTP implementation of [`RemoteLicenseClient`].

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::remote::{RemoteError, RemoteLicenseClient, RemoteValidation, RevokeResponse};

/// JSON-over-HTTP license server client.
///
/// Endpoints: `POST {base}/api/licenses/validate` and
/// `POST {base}/api/licenses/revoke`.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    plugin_id: &'a str,
    license_key: &'a str,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    plugin_id: &'a str,
    license_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl HttpRemoteClient {
    /// Creates a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RemoteError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Server(format!("status {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| RemoteError::Server(format!("invalid response body: {e}")))
    }
}

fn map_reqwest(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(e.to_string())
    }
}

#[async_trait]
impl RemoteLicenseClient for HttpRemoteClient {
    async fn validate(
        &self,
        plugin_id: &str,
        license_key: &str,
    ) -> Result<RemoteValidation, RemoteError> {
        self.post(
            "/api/licenses/validate",
            &ValidateRequest {
                plugin_id,
                license_key,
            },
        )
        .await
    }

    async fn revoke(
        &self,
        plugin_id: &str,
        license_key: &str,
        reason: Option<&str>,
    ) -> Result<RevokeResponse, RemoteError> {
        self.post(
            "/api/licenses/revoke",
            &RevokeRequest {
                plugin_id,
                license_key,
                reason,
            },
        )
        .await
    }
}
