//! HTTP transport for the remote object store.

use crate::sync::engine::RemoteTransport;
use crate::sync::models::{
    FetchResponse, PushObject, PushRequest, PushResponse, RevokeRequest, TokenResponse,
};
use crate::sync::SyncError;
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to the object store over HTTPS with reqwest
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self { client })
    }

    /// Base URL for a host; bare host names are addressed over https
    pub fn base_url(host: &str) -> String {
        let host = host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(SyncError::from_status(status.as_u16()))
        }
    }
}

fn network(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

fn parse(e: reqwest::Error) -> SyncError {
    SyncError::Parse(e.to_string())
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn request_token(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<String, SyncError> {
        let url = format!("{}/user/token", Self::base_url(host));
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", username, password));

        let resp = self
            .client
            .put(&url)
            .header("Authorization", format!("Basic {}", credentials))
            .send()
            .await
            .map_err(network)?;

        let body: TokenResponse = Self::check(resp).await?.json().await.map_err(parse)?;
        Ok(body.token)
    }

    async fn revoke_token(&self, host: &str, token: &str) -> Result<(), SyncError> {
        let url = format!("{}/user/token", Self::base_url(host));

        let resp = self
            .client
            .delete(&url)
            .bearer_auth(token)
            .json(&RevokeRequest { token })
            .send()
            .await
            .map_err(network)?;

        Self::check(resp).await?;
        Ok(())
    }

    async fn fetch_objects(
        &self,
        host: &str,
        token: &str,
        since: i64,
    ) -> Result<Vec<serde_json::Value>, SyncError> {
        let url = format!("{}/objects", Self::base_url(host));

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("since", since)])
            .send()
            .await
            .map_err(network)?;

        let body: FetchResponse = Self::check(resp).await?.json().await.map_err(parse)?;
        Ok(body.objects)
    }

    async fn push_objects(
        &self,
        host: &str,
        token: &str,
        objects: &[PushObject],
    ) -> Result<i64, SyncError> {
        let url = format!("{}/objects", Self::base_url(host));

        let resp = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&PushRequest { objects })
            .send()
            .await
            .map_err(network)?;

        let body: PushResponse = Self::check(resp).await?.json().await.map_err(parse)?;
        Ok(body.modified_at)
    }
}
