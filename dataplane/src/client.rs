//! HTTP client for calling back the control plane.

use crate::error::Error;
use serde::Serialize;
use std::time::Duration;
use surf::{http::mime, Url};

/// A reply from the control plane.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A client for the callback and registration endpoints of a control plane.
#[derive(Clone, Debug)]
pub struct ControlPlaneClient {
    client: surf::Client,
}

impl ControlPlaneClient {
    /// Create a client whose requests give up after `timeout`, if any.
    pub fn new(timeout: Option<Duration>) -> Self {
        let client = match surf::Client::try_from(surf::Config::new().set_timeout(timeout)) {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(?timeout, "ignoring control-plane timeout: {err}");
                surf::Client::new()
            }
        };
        Self { client }
    }

    /// POST `body` as JSON to the absolute URL `url`.
    pub async fn post_json(&self, url: &str, body: &impl Serialize) -> Result<Reply, Error> {
        let url = Url::parse(url).map_err(|err| Error::InvalidUrl {
            url: url.into(),
            reason: err.to_string(),
        })?;
        let body = serde_json::to_string(body)?;
        tracing::debug!(%url, %body, "control plane request");

        let mut res = self
            .client
            .post(url)
            .content_type(mime::JSON)
            .body_string(body)
            .send()
            .await?;
        let status = u16::from(res.status());
        let body = res.body_string().await.unwrap_or_default();
        tracing::debug!(status, %body, "control plane response");
        Ok(Reply { status, body })
    }
}
